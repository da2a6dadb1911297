//! Link bring-up against the simulated board
//!
//! Walks the same steps an operator runs on hardware: path setup, FIRE id,
//! Explorer clock configuration, training, host-side status.

use ocapi_driver::path::{self, PathConfig, PathTarget};
use ocapi_driver::prelude::*;
use std::time::Duration;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("ocapi_driver=info")
        .init();

    println!("OpenCAPI link bring-up (simulated)\n");

    let board = SimulatedBus::new();

    let quick = PathConfig {
        pmic_settle: Duration::ZERO,
    };
    path::setup_path(&mut board.clone(), PathTarget::A, &quick)?;
    println!("Path: {}", path::path_status(&mut board.clone())?);

    let mut fire = FireBus::open(board.clone())?;
    let fid = fire.chip_id()?;
    println!("FIRE {fid}, link at {}", fid.frequency());

    let config = TrainingConfig::immediate(fid.frequency());
    let mut explorer = ExplorerLink::open(board.clone(), config.frequency)?;
    explorer.init(&config.poll)?;
    println!("Explorer: {:?}", explorer.state());

    let mut trainer = LinkTrainer::new(explorer, fire, config);
    let targets: DdimmSet = [Ddimm::A].into_iter().collect();
    let outcome = trainer.run(targets)?;
    println!(
        "Sync mismatches: Explorer {}, FIRE {}",
        outcome.sync.mismatches.len(),
        outcome.host_sync.mismatches.len()
    );
    println!(
        "Training status {:#x}: {}",
        outcome.training.status,
        if outcome.training.done() { "done" } else { "failed" }
    );

    for (d, up) in trainer.host_status(targets)? {
        println!("DDIMM{d}: {}", if up? { "in sync" } else { "NOT in sync" });
    }

    println!("\n{} bus transactions", board.transactions().len());
    Ok(())
}
