//! Single Price Shock Run
//!
//! Runs one simulation with the configured parameters and prints protocol
//! status reports along the way.
//!
//! ## Usage
//! ```bash
//! RISK_SIM_CONFIG=params.toml cargo run --bin stress --release
//! ```

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use vault_risk_simulation::config::{SimulationConfig, CONFIG_ENV_VAR};
use vault_risk_simulation::simulation::{Phase, Simulation, TerminationReason};

/// Print a status report every this many steps.
const REPORT_EVERY: usize = 100;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    println!("=======================================================");
    println!("  Vault Risk Simulation");
    println!("=======================================================");
    println!();
    println!("Parameters:");
    println!("  Vaults: {}", config.num_vaults);
    println!(
        "  Price: {} -> {} over {} hours",
        config.start_price, config.end_price, config.price_drop_duration
    );
    println!(
        "  Block time: {} min, Throughput: {} per block ({} for recovery)",
        config.block_time, config.txs_per_block, config.recovery_throughput
    );
    println!("  Reserve fund: {}% of debt", config.reserve_fund_percentage);
    println!();

    let mut sim = Simulation::new(config, "stress");
    let run = sim.run(0);

    for record in &run.records {
        let last = record.termination.is_some();
        if record.step % REPORT_EVERY != 0 && record.phase != Phase::Initial && !last {
            continue;
        }
        println!("=======================================================");
        println!(
            "Step {} ({}) - hour {:.1}",
            record.step,
            record.phase.name(),
            record.simulation_hour
        );
        println!("{}", "-".repeat(55));
        record.metrics.print();
        println!(
            "  Queues:                  {} liquidation, {} recovery",
            record.liquidation_queue_size, record.recovery_queue_size
        );
        println!(
            "  Reserve fund:            ${:.2} ({:.1}% remaining, ${:.2} used{})",
            record.reserve.reserve_fund,
            record.reserve_fund_percentage_remaining,
            record.reserve.reserve_fund_used,
            if record.reserve.reserve_fund_depleted { ", DEPLETED" } else { "" }
        );
        println!();
    }

    println!("=======================================================");
    println!("  Result");
    println!("=======================================================");
    println!("  Termination:             {}", run.termination.name());
    println!("  Steps:                   {}", sim.step());
    println!("  Liquidated:              {}", run.total_liquidated());
    println!("  Recovered:               {}", run.total_recovered());
    println!(
        "  Initial HF:              mean {:.1}, median {:.1}, std {:.1}",
        run.distribution.mean, run.distribution.median, run.distribution.std_dev
    );
    match run.termination {
        TerminationReason::StepCapReached => {
            println!("  WARNING: run hit the step cap and is incomplete")
        }
        TerminationReason::RecoveryStalled => {
            println!("  WARNING: recovery made no progress with funds remaining")
        }
        _ => {}
    }

    Ok(())
}

fn load_config() -> Result<SimulationConfig> {
    match std::env::var(CONFIG_ENV_VAR) {
        Ok(path) => {
            let config = SimulationConfig::load(&path)
                .with_context(|| format!("Failed to load config from {}", path))?;
            tracing::info!(path = %path, "Loaded config");
            Ok(config)
        }
        Err(_) => {
            tracing::info!("{} not set, using default parameters", CONFIG_ENV_VAR);
            Ok(SimulationConfig::default())
        }
    }
}
