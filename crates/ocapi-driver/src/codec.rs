//! Big-endian byte codec for register addresses and values.
//!
//! Both chips put the most significant byte on the wire first.

use crate::error::{OcapiError, Result};

/// Widest value the codec handles, in bytes.
pub const MAX_WIDTH: usize = 8;

/// Big-endian encoding of the low `width` bytes of `value`.
///
/// # Errors
///
/// Returns `InvalidWidth` if `width` is 0 or above [`MAX_WIDTH`].
pub fn encode(value: u64, width: usize) -> Result<Vec<u8>> {
    check_width(width)?;
    Ok(value.to_be_bytes()[MAX_WIDTH - width..].to_vec())
}

/// Big-endian decoding, zero-extended to 64 bits.
///
/// # Errors
///
/// Returns `InvalidWidth` if `bytes` is empty or longer than [`MAX_WIDTH`].
pub fn decode(bytes: &[u8]) -> Result<u64> {
    check_width(bytes.len())?;
    Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

fn check_width(width: usize) -> Result<()> {
    if width == 0 || width > MAX_WIDTH {
        return Err(OcapiError::InvalidWidth { width });
    }
    Ok(())
}
