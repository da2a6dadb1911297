//! Linux i2c-dev backend
//!
//! Talks to `/dev/i2c-N` through the kernel's i2c-dev interface:
//! `I2C_RDWR` for writes and combined write/read, `I2C_SLAVE` + `read(2)` for
//! plain reads, and an SMBus quick write for probing.
//!
//! rustix covers the plain read; the i2c-dev ioctls are not part of its
//! standard API, so those go through libc.

#![allow(clippy::cast_possible_truncation)]

use crate::bus::{BusType, I2cBus};
use crate::error::{OcapiError, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// <linux/i2c-dev.h>
const I2C_SLAVE: libc::c_ulong = 0x0703;
const I2C_RDWR: libc::c_ulong = 0x0707;
const I2C_SMBUS: libc::c_ulong = 0x0720;

// <linux/i2c.h>
const I2C_M_RD: u16 = 0x0001;
const I2C_SMBUS_WRITE: u8 = 0;
const I2C_SMBUS_QUICK: u32 = 0;

/// `struct i2c_msg`
#[repr(C)]
struct I2cMsg {
    addr: u16,
    flags: u16,
    len: u16,
    buf: *mut u8,
}

/// `struct i2c_rdwr_ioctl_data`
#[repr(C)]
struct I2cRdwrIoctlData {
    msgs: *mut I2cMsg,
    nmsgs: u32,
}

/// `struct i2c_smbus_ioctl_data`
#[repr(C)]
struct I2cSmbusIoctlData {
    read_write: u8,
    command: u8,
    size: u32,
    data: *mut libc::c_void,
}

/// Handle on one Linux I2C adapter
#[derive(Debug)]
pub struct LinuxI2c {
    file: File,
    path: PathBuf,
    /// Address last bound with `I2C_SLAVE`
    slave: Option<u8>,
}

impl LinuxI2c {
    /// Open `/dev/i2c-{bus}`
    ///
    /// # Errors
    ///
    /// Returns `BusNotFound` if the device file does not exist, or `Io` if it
    /// cannot be opened read/write.
    pub fn open(bus: u32) -> Result<Self> {
        let path = PathBuf::from(format!("/dev/i2c-{bus}"));
        if !path.exists() {
            return Err(OcapiError::bus_not_found(path));
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        info!("Opened I2C adapter {}", path.display());

        Ok(Self {
            file,
            path,
            slave: None,
        })
    }

    /// Adapter device path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn set_slave(&mut self, address: u8) -> Result<()> {
        if self.slave == Some(address) {
            return Ok(());
        }
        // SAFETY: I2C_SLAVE takes the 7-bit address by value.
        // Invariants: (1) fd valid for the lifetime of self.file; (2) no pointer arguments.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                I2C_SLAVE,
                libc::c_ulong::from(address),
            )
        };
        if ret < 0 {
            return Err(OcapiError::bus_io(
                address,
                format!("I2C_SLAVE: {}", std::io::Error::last_os_error()),
            ));
        }
        self.slave = Some(address);
        Ok(())
    }

    fn transfer(&mut self, address: u8, msgs: &mut [I2cMsg]) -> Result<()> {
        let mut data = I2cRdwrIoctlData {
            msgs: msgs.as_mut_ptr(),
            nmsgs: msgs.len() as u32,
        };
        // SAFETY: I2C_RDWR reads the message array and fills read buffers.
        // Invariants: (1) fd valid; (2) every msg.buf points to msg.len live bytes
        // borrowed for the duration of this call; (3) buffers without I2C_M_RD are
        // only read by the kernel; (4) layouts match <linux/i2c.h>.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), I2C_RDWR, &raw mut data) };
        if ret < 0 {
            return Err(OcapiError::bus_io(
                address,
                format!("I2C_RDWR: {}", std::io::Error::last_os_error()),
            ));
        }
        Ok(())
    }
}

fn msg_len(address: u8, len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| OcapiError::bus_io(address, format!("message too long: {len} bytes")))
}

impl I2cBus for LinuxI2c {
    fn write(&mut self, address: u8, payload: &[u8]) -> Result<()> {
        debug!("i2c {address:#04x} <- {payload:02x?}");
        let mut msgs = [I2cMsg {
            addr: u16::from(address),
            flags: 0,
            len: msg_len(address, payload.len())?,
            buf: payload.as_ptr().cast_mut(),
        }];
        self.transfer(address, &mut msgs)
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        self.set_slave(address)?;
        let n = rustix::io::read(&self.file, buffer)
            .map_err(|e| OcapiError::bus_io(address, format!("read: {e}")))?;
        if n != buffer.len() {
            return Err(OcapiError::bus_io(
                address,
                format!("short read: {n} of {} bytes", buffer.len()),
            ));
        }
        debug!("i2c {address:#04x} -> {buffer:02x?}");
        Ok(())
    }

    fn write_read(&mut self, address: u8, command: &[u8], buffer: &mut [u8]) -> Result<()> {
        let mut msgs = [
            I2cMsg {
                addr: u16::from(address),
                flags: 0,
                len: msg_len(address, command.len())?,
                buf: command.as_ptr().cast_mut(),
            },
            I2cMsg {
                addr: u16::from(address),
                flags: I2C_M_RD,
                len: msg_len(address, buffer.len())?,
                buf: buffer.as_mut_ptr(),
            },
        ];
        self.transfer(address, &mut msgs)?;
        debug!("i2c {address:#04x} [{command:02x?}] -> {buffer:02x?}");
        Ok(())
    }

    fn probe(&mut self, address: u8) -> Result<bool> {
        self.set_slave(address)?;
        let mut data = I2cSmbusIoctlData {
            read_write: I2C_SMBUS_WRITE,
            command: 0,
            size: I2C_SMBUS_QUICK,
            data: std::ptr::null_mut(),
        };
        // SAFETY: SMBus quick write carries no data block, so a null data pointer is valid.
        // Invariants: (1) fd valid; (2) layout matches <linux/i2c-dev.h>.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), I2C_SMBUS, &raw mut data) };
        if ret < 0 {
            debug!(
                "probe {address:#04x}: {}",
                std::io::Error::last_os_error()
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn bus_type(&self) -> BusType {
        BusType::Linux
    }
}

impl Drop for LinuxI2c {
    fn drop(&mut self) {
        debug!("Closed I2C adapter {}", self.path.display());
    }
}
