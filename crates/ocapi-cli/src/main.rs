//! `ocapi`: bring up and diagnose a FIRE ↔ Explorer OpenCAPI link over I2C.
//!
//! ```text
//! USAGE:
//!   ocapi read --chip fire --register 0x0100000000000000
//!   ocapi write --chip explorer --register 0x2058 --data 1
//!   ocapi i2c-write --chip explorer --data 0304A80940B8    Raw frame
//!   ocapi i2c-read --chip explorer --register 0404A80940B8 Raw frame, then response
//!   ocapi reset-control --ddimm ab --state off
//!   ocapi link-init                  Explorer clock configuration
//!   ocapi link-sync --ddimm a        Explorer sync, FIRE sync, training check
//!   ocapi check-sync --chip fire --ddimm ab
//!   ocapi firmware-info --chip explorer   Firmware, ECID, card id, EEPROM
//!   ocapi firmware-info --chip gemini     ICE FPGA id
//!   ocapi path-setup --ddimm a       Open the bus path and power the DDIMM
//!   ocapi path-status
//!   ocapi scan
//!   ocapi retrain --ddimm a
//! ```
//!
//! `--sim` runs any command against an in-memory board instead of `/dev/i2c-N`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ocapi_chip::ddimm::{Ddimm, DdimmSet, ResetState};
use ocapi_chip::explorer::{LinkFrequency, RESPONSE_COMMAND};
use ocapi_driver::codec;
use ocapi_driver::path::{self, PathConfig, PathTarget};
use ocapi_driver::{
    open_bus, BusSelection, Eeprom, ExplorerBus, ExplorerLink, FireBus, I2cBus, LinkTrainer,
    OcapiError, SimulatedBus, SyncReport, TrainingConfig, TrainingReport,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ocapi", about = "FIRE / Explorer OpenCAPI link control", version)]
struct Cli {
    /// I2C adapter number (/dev/i2c-N).
    #[arg(short, long, global = true, env = "OCAPI_I2C_BUS", default_value_t = 3)]
    bus: u32,

    /// Run against a simulated board instead of hardware.
    #[arg(long, global = true)]
    sim: bool,

    /// Log protocol steps (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Read a register.
    Read {
        #[arg(long, value_enum)]
        chip: Chip,
        /// Register address in hex.
        #[arg(long, value_parser = parse_hex)]
        register: u64,
    },
    /// Write a register and verify it.
    Write {
        #[arg(long, value_enum)]
        chip: Chip,
        /// Register address in hex.
        #[arg(long, value_parser = parse_hex)]
        register: u64,
        /// Data in hex.
        #[arg(long, value_parser = parse_hex)]
        data: u64,
    },
    /// Read without framing: FIRE single read, or an Explorer frame then its response.
    I2cRead {
        #[arg(long, value_enum)]
        chip: Chip,
        /// Register (FIRE) or frame bytes (Explorer) in hex; `02` reads the pending response.
        #[arg(long, value_parser = parse_frame)]
        register: Frame,
    },
    /// Send one raw frame.
    I2cWrite {
        #[arg(long, value_enum)]
        chip: Chip,
        /// Frame bytes in hex, e.g. `0304A80940B8`.
        #[arg(long, value_parser = parse_frame)]
        data: Frame,
    },
    /// Put DDIMMs into or out of reset.
    ResetControl {
        /// Target letters, e.g. `ab` or `abcdw`.
        #[arg(long)]
        ddimm: DdimmSet,
        #[arg(long, value_enum)]
        state: Switch,
    },
    /// Configure the Explorer reference clock.
    LinkInit {
        #[command(flatten)]
        freq: FreqArg,
    },
    /// Run link training on both sides and check the result.
    LinkSync {
        /// Target letters (A-D).
        #[arg(long, default_value = "a")]
        ddimm: DdimmSet,
        #[command(flatten)]
        freq: FreqArg,
    },
    /// Report training status.
    CheckSync {
        #[arg(long, value_enum, default_value = "explorer")]
        chip: Chip,
        /// Target letters (FIRE only).
        #[arg(long, default_value = "a")]
        ddimm: DdimmSet,
    },
    /// Print chip identification and firmware information.
    FirmwareInfo {
        #[arg(long, value_enum, default_value = "explorer")]
        chip: Chip,
    },
    /// Route the bus to a DDIMM port and power it.
    PathSetup {
        /// `none`, `a` or `b`.
        #[arg(long)]
        ddimm: PathTarget,
    },
    /// Show where the bus muxes point.
    PathStatus,
    /// Probe every bus address.
    Scan,
    /// Request a host-side retrain.
    Retrain {
        /// Target letters (A-D).
        #[arg(long)]
        ddimm: DdimmSet,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Chip {
    Fire,
    #[value(alias = "exp")]
    Explorer,
    /// ICE FPGA on a Gemini card; same framing as Explorer.
    #[value(alias = "gemini")]
    Ice,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl From<Switch> for ResetState {
    fn from(s: Switch) -> Self {
        match s {
            Switch::On => Self::On,
            Switch::Off => Self::Off,
        }
    }
}

#[derive(clap::Args)]
struct FreqArg {
    /// Link frequency in MHz (333 or 400); read from the FIRE id when omitted.
    #[arg(long, env = "OCAPI_FREQ_MHZ")]
    freq: Option<u32>,
}

fn parse_hex(s: &str) -> std::result::Result<u64, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| format!("'{s}' is not a hex value: {e}"))
}

/// Raw bytes for one bus frame
#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame(Vec<u8>);

/// Hex digits to bytes, most significant first; an odd count gets a leading zero.
fn parse_frame(s: &str) -> std::result::Result<Frame, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() {
        return Err("empty frame".into());
    }
    let padded = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_owned()
    };
    (0..padded.len())
        .step_by(2)
        .map(|i| {
            padded
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("'{s}' is not a hex frame"))
        })
        .collect::<std::result::Result<_, _>>()
        .map(Frame)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .init();

    let ctx = Ctx::new(&cli);

    match cli.command {
        Cmd::Read { chip, register } => cmd_read(&ctx, chip, register)?,
        Cmd::Write {
            chip,
            register,
            data,
        } => cmd_write(&ctx, chip, register, data)?,
        Cmd::I2cRead { chip, register } => cmd_i2c_read(&ctx, chip, &register.0)?,
        Cmd::I2cWrite { chip, data } => cmd_i2c_write(&ctx, chip, &data.0)?,
        Cmd::ResetControl { ddimm, state } => cmd_reset_control(&ctx, ddimm, state.into())?,
        Cmd::LinkInit { freq } => cmd_link_init(&ctx, freq.freq)?,
        Cmd::LinkSync { ddimm, freq } => cmd_link_sync(&ctx, ddimm, freq.freq)?,
        Cmd::CheckSync { chip, ddimm } => cmd_check_sync(&ctx, chip, ddimm)?,
        Cmd::FirmwareInfo { chip } => cmd_firmware_info(&ctx, chip)?,
        Cmd::PathSetup { ddimm } => cmd_path_setup(&ctx, ddimm)?,
        Cmd::PathStatus => cmd_path_status(&ctx)?,
        Cmd::Scan => cmd_scan(&ctx)?,
        Cmd::Retrain { ddimm } => cmd_retrain(&ctx, ddimm)?,
    }

    Ok(())
}

// ── Bus plumbing ─────────────────────────────────────────────────────────────

type Bus = Box<dyn I2cBus>;

struct Ctx {
    selection: BusSelection,
    sim: bool,
}

impl Ctx {
    fn new(cli: &Cli) -> Self {
        let selection = if cli.sim {
            BusSelection::Simulated(SimulatedBus::new())
        } else {
            BusSelection::Linux(cli.bus)
        };
        info!(sim = cli.sim, bus = cli.bus, "Bus selected");
        Self {
            selection,
            sim: cli.sim,
        }
    }

    fn bus(&self) -> Result<Bus> {
        open_bus(&self.selection).context("opening I2C bus")
    }

    fn fire(&self) -> Result<FireBus<Bus>> {
        FireBus::open(self.bus()?).context("FIRE not reachable")
    }

    fn explorer(&self) -> Result<ExplorerBus<Bus>> {
        ExplorerBus::open(self.bus()?).context("Explorer not reachable (is the path set up?)")
    }

    fn frequency(&self, mhz: Option<u32>) -> Result<LinkFrequency> {
        if let Some(mhz) = mhz {
            let freq =
                LinkFrequency::from_mhz(mhz).ok_or(OcapiError::UnsupportedFrequency { mhz })?;
            return Ok(freq);
        }
        let fid = self.fire()?.chip_id()?;
        info!("Link frequency {} from {fid}", fid.frequency());
        Ok(fid.frequency())
    }

    fn training(&self, frequency: LinkFrequency) -> TrainingConfig {
        if self.sim {
            TrainingConfig::immediate(frequency)
        } else {
            TrainingConfig::new(frequency)
        }
    }
}

fn explorer_register(register: u64) -> Result<u32> {
    u32::try_from(register)
        .with_context(|| format!("Explorer register {register:#x} does not fit 32 bits"))
}

fn print_write_check(ok: bool) -> Result<()> {
    println!("Writing check: {}", if ok { "Success" } else { "Failed" });
    if !ok {
        bail!("register did not read back");
    }
    Ok(())
}

// ── Commands ─────────────────────────────────────────────────────────────────

fn cmd_read(ctx: &Ctx, chip: Chip, register: u64) -> Result<()> {
    let value = match chip {
        Chip::Fire => ctx.fire()?.read_register_stable(register)?,
        Chip::Explorer | Chip::Ice => ctx.explorer()?.double_read(explorer_register(register)?)?,
    };
    println!("{register:#x} : {value:#x}");
    Ok(())
}

fn cmd_write(ctx: &Ctx, chip: Chip, register: u64, data: u64) -> Result<()> {
    let ok = match chip {
        Chip::Fire => ctx.fire()?.write_register(register, data)?,
        Chip::Explorer | Chip::Ice => ctx
            .explorer()?
            .double_write(explorer_register(register)?, data)?,
    };
    print_write_check(ok)
}

fn cmd_i2c_read(ctx: &Ctx, chip: Chip, register: &[u8]) -> Result<()> {
    let value = match chip {
        Chip::Fire => {
            let addr = codec::decode(register).context("FIRE register is at most 8 bytes")?;
            ctx.fire()?.read_register(addr)?
        }
        _ if register == [RESPONSE_COMMAND] => ctx.explorer()?.read_response()?,
        Chip::Explorer => ctx.explorer()?.query(register)?,
        Chip::Ice => bail!("ICE raw reads only accept 02"),
    };
    println!("{value:#x}");
    Ok(())
}

fn cmd_i2c_write(ctx: &Ctx, chip: Chip, frame: &[u8]) -> Result<()> {
    match chip {
        Chip::Fire => ctx.fire()?.write_frame(frame)?,
        Chip::Explorer => ctx.explorer()?.write_frame(frame)?,
        Chip::Ice => bail!("raw writes go to fire or explorer"),
    }
    println!("Wrote {} bytes", frame.len());
    Ok(())
}

fn cmd_reset_control(ctx: &Ctx, ddimm: DdimmSet, state: ResetState) -> Result<()> {
    let value = ctx.fire()?.set_ddimm_reset(state, ddimm)?;
    println!("Reset control [{ddimm}] {state:?}: {value:#x}");
    Ok(())
}

fn cmd_link_init(ctx: &Ctx, mhz: Option<u32>) -> Result<()> {
    let config = ctx.training(ctx.frequency(mhz)?);
    let mut link = ExplorerLink::from_bus(ctx.explorer()?, config.frequency);
    std::thread::sleep(config.init_settle);
    link.init(&config.poll)?;
    println!("Explorer clock configured at {}", config.frequency);
    Ok(())
}

fn cmd_link_sync(ctx: &Ctx, ddimm: DdimmSet, mhz: Option<u32>) -> Result<()> {
    let config = ctx.training(ctx.frequency(mhz)?);
    // link-init ran as its own invocation
    let explorer = ExplorerLink::clock_configured(ctx.explorer()?, config.frequency);
    let mut trainer = LinkTrainer::new(explorer, ctx.fire()?, config);

    let outcome = trainer.run(ddimm)?;
    report_mismatches("Explorer", &outcome.sync);
    report_mismatches("FIRE", &outcome.host_sync);
    report_training(outcome.training)
}

fn report_mismatches(side: &str, report: &SyncReport) {
    for m in &report.mismatches {
        println!(
            "{side} sync write {:#x}: wrote {:#x}, read {:#x}",
            m.register, m.expected, m.actual
        );
    }
}

fn report_training(report: TrainingReport) -> Result<()> {
    println!("Training status: {:#x}", report.status);
    if report.done() {
        println!("Training successfully done");
    } else {
        println!("Training failed");
        for e in report.errors() {
            println!("  bit {:2}: {}", e.bit, e.label);
        }
    }
    report.into_result()?;
    Ok(())
}

fn report_host_status(status: Vec<(Ddimm, ocapi_driver::Result<bool>)>) -> Result<()> {
    let mut all_up = true;
    for (d, up) in status {
        match up {
            Ok(true) => println!("DDIMM{d} is in sync"),
            Ok(false) => {
                println!("DDIMM{d} is NOT in sync");
                all_up = false;
            }
            Err(e) => {
                println!("DDIMM{d}: {e}");
                all_up = false;
            }
        }
    }
    if !all_up {
        bail!("link down on at least one DDIMM");
    }
    Ok(())
}

fn cmd_check_sync(ctx: &Ctx, chip: Chip, ddimm: DdimmSet) -> Result<()> {
    match chip {
        Chip::Explorer | Chip::Ice => {
            let mut link = ExplorerLink::from_bus(ctx.explorer()?, LinkFrequency::Mhz333);
            report_training(link.check_sync()?)
        }
        Chip::Fire => report_host_status(ctx.fire()?.fire_check_sync(ddimm)?),
    }
}

fn cmd_firmware_info(ctx: &Ctx, chip: Chip) -> Result<()> {
    match chip {
        Chip::Fire => {
            let fid = ctx.fire()?.chip_id()?;
            println!("{fid}");
            println!("Link frequency: {}", fid.frequency());
        }
        Chip::Explorer => {
            let mut exp = ctx.explorer()?;
            for (label, value) in exp.firmware_info()? {
                println!("{label} : {value:#x}");
            }
            let id = exp.identity()?;
            println!("Enterprise mode : {:#x}", id.enterprise_mode);
            for (i, word) in id.ecid.iter().enumerate() {
                println!("ECID[{i:2}] : {word:#010x}");
            }
            println!("Card ID : {:#x}", id.card_id);
            report_eeprom(ctx)?;
        }
        Chip::Ice => {
            println!("ICE FPGA info:");
            println!("{}", ctx.explorer()?.ice_id()?);
        }
    }
    Ok(())
}

fn report_eeprom(ctx: &Ctx) -> Result<()> {
    let mut rom = match Eeprom::open(ctx.bus()?) {
        Ok(rom) => rom,
        Err(e @ OcapiError::DeviceNotPresent { .. }) => {
            println!("EEPROM data: {e}");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let header = rom.header()?;
    let hex: String = header.iter().map(|b| format!("{b:02x}")).collect();
    println!("EEPROM data: First Bytes 0x{hex}...");
    println!("{}", rom.info()?);
    Ok(())
}

fn cmd_path_setup(ctx: &Ctx, target: PathTarget) -> Result<()> {
    let config = if ctx.sim {
        PathConfig {
            pmic_settle: std::time::Duration::ZERO,
        }
    } else {
        PathConfig::default()
    };
    path::setup_path(&mut ctx.bus()?, target, &config)?;
    println!("Path: {}", path::path_status(&mut ctx.bus()?)?);
    Ok(())
}

fn cmd_path_status(ctx: &Ctx) -> Result<()> {
    println!("Path: {}", path::path_status(&mut ctx.bus()?)?);
    Ok(())
}

fn cmd_scan(ctx: &Ctx) -> Result<()> {
    let result = ocapi_driver::scan(&mut ctx.bus()?)?;
    println!("Devices: {}", result.alive.len());
    for (address, name) in result.devices() {
        println!("  {address:#04x}  {}", name.unwrap_or("unknown"));
    }
    println!("Card: {}", result.card);
    Ok(())
}

fn cmd_retrain(ctx: &Ctx, ddimm: DdimmSet) -> Result<()> {
    report_host_status(ctx.fire()?.retrain(ddimm)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_with_and_without_prefix() {
        assert_eq!(parse_hex("0x2058"), Ok(0x2058));
        assert_eq!(parse_hex("0X2058"), Ok(0x2058));
        assert_eq!(parse_hex("ffffffffffffffff"), Ok(u64::MAX));
        assert!(parse_hex("0xzz").is_err());
    }

    #[test]
    fn frames_keep_written_bytes() {
        assert_eq!(
            parse_frame("0304A80940B8"),
            Ok(Frame(vec![0x03, 0x04, 0xA8, 0x09, 0x40, 0xB8]))
        );
        assert_eq!(parse_frame("0x2"), Ok(Frame(vec![0x02])));
        assert_eq!(parse_frame("abc"), Ok(Frame(vec![0x0A, 0xBC])));
        assert!(parse_frame("").is_err());
        assert!(parse_frame("0g").is_err());
    }

    #[test]
    fn cli_parses_chip_aliases() {
        let cli = Cli::try_parse_from(["ocapi", "read", "--chip", "exp", "--register", "0x2058"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Cmd::Read {
                chip: Chip::Explorer,
                register: 0x2058
            }
        ));
        assert_eq!(cli.bus, 3);

        let cli = Cli::try_parse_from(["ocapi", "firmware-info", "--chip", "gemini"]).unwrap();
        assert!(matches!(cli.command, Cmd::FirmwareInfo { chip: Chip::Ice }));
    }

    #[test]
    fn sim_raw_frames() {
        let cli = Cli::try_parse_from(["ocapi", "--sim", "scan"]).unwrap();
        let ctx = Ctx::new(&cli);
        // write slot 0x2058 <- 0x11, then fetch it
        cmd_i2c_write(&ctx, Chip::Explorer, &parse_frame("0508A000205800000011").unwrap().0).unwrap();
        assert_eq!(ctx.explorer().unwrap().double_read(0x2058).unwrap(), 0x11);
        cmd_i2c_read(&ctx, Chip::Explorer, &parse_frame("0404A0002058").unwrap().0).unwrap();
        cmd_i2c_read(&ctx, Chip::Ice, &[0x02]).unwrap();
        assert!(cmd_i2c_read(&ctx, Chip::Ice, &[0x04]).is_err());
        assert!(cmd_i2c_write(&ctx, Chip::Ice, &[0x01]).is_err());
        assert!(cmd_i2c_read(&ctx, Chip::Fire, &[0; 9]).is_err());
    }

    #[test]
    fn sim_firmware_info_all_chips() {
        let cli = Cli::try_parse_from(["ocapi", "--sim", "scan"]).unwrap();
        let ctx = Ctx::new(&cli);
        for chip in [Chip::Fire, Chip::Explorer, Chip::Ice] {
            cmd_firmware_info(&ctx, chip).unwrap();
        }
    }

    #[test]
    fn sim_link_sync_survives_host_mismatch() {
        let sim = SimulatedBus::new()
            .with_fire_clear_on_write(Ddimm::A.dl_control().unwrap(), 1 << 16);
        let ctx = Ctx {
            selection: BusSelection::Simulated(sim.clone()),
            sim: true,
        };
        cmd_link_init(&ctx, None).unwrap();
        cmd_link_sync(&ctx, "a".parse().unwrap(), Some(400)).unwrap();
        assert_eq!(
            sim.fire_register(Ddimm::A.dl_control().unwrap()),
            ocapi_chip::fire::host_conf::SYNC_SEQUENCE[1]
        );
    }

    #[test]
    fn cli_parses_raw_frame() {
        let args = ["ocapi", "i2c-write", "--chip", "exp", "--data", "0304A80940B8"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(
            cli.command,
            Cmd::I2cWrite { chip: Chip::Explorer, data } if data.0.len() == 6
        ));
    }

    #[test]
    fn cli_rejects_bad_ddimm() {
        assert!(Cli::try_parse_from(["ocapi", "retrain", "--ddimm", "ax"]).is_err());
    }

    #[test]
    fn sim_write_then_read() {
        let cli = Cli::try_parse_from(["ocapi", "--sim", "scan"]).unwrap();
        let ctx = Ctx::new(&cli);
        cmd_write(&ctx, Chip::Explorer, 0x2058, 0x7).unwrap();
        assert_eq!(ctx.explorer().unwrap().double_read(0x2058).unwrap(), 0x7);
        assert!(cmd_write(&ctx, Chip::Explorer, 0x2058, 0x1_0000_0000).is_err());
    }

    #[test]
    fn sim_link_sync_completes() {
        let cli = Cli::try_parse_from(["ocapi", "--sim", "scan"]).unwrap();
        let ctx = Ctx::new(&cli);
        cmd_link_init(&ctx, None).unwrap();
        cmd_link_sync(&ctx, "a".parse().unwrap(), Some(400)).unwrap();
        cmd_check_sync(&ctx, Chip::Fire, "a".parse().unwrap()).unwrap();
        assert!(cmd_check_sync(&ctx, Chip::Fire, "ab".parse().unwrap()).is_err());
    }

    #[test]
    fn unsupported_frequency_rejected() {
        let cli = Cli::try_parse_from(["ocapi", "--sim", "scan"]).unwrap();
        let ctx = Ctx::new(&cli);
        let err = ctx.frequency(Some(250)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OcapiError>(),
            Some(OcapiError::UnsupportedFrequency { mhz: 250 })
        ));
    }
}
