//! Scenario Grid Batch
//!
//! Runs every price × risk × scale scenario and writes step records,
//! initial distributions and summaries to `results/`.
//!
//! ## Usage
//! ```bash
//! cargo run --bin scenarios --release
//! ITERATIONS=5 RISK_SIM_CONFIG=params.toml cargo run --bin scenarios --release
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use tracing_subscriber::EnvFilter;
use vault_risk_simulation::config::{SimulationConfig, CONFIG_ENV_VAR};
use vault_risk_simulation::export::{timestamped_path, BatchExport};
use vault_risk_simulation::scenarios::{generate_scenarios, run_batch};

const DEFAULT_ITERATIONS: usize = 1;
const RESULTS_DIR: &str = "results";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let base = match std::env::var(CONFIG_ENV_VAR) {
        Ok(path) => SimulationConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        Err(_) => SimulationConfig::default(),
    };
    let iterations = match std::env::var("ITERATIONS") {
        Ok(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("ITERATIONS must be a count, got {:?}", raw))?,
        Err(_) => DEFAULT_ITERATIONS,
    };

    let scenarios = generate_scenarios(&base);

    println!("=======================================================");
    println!("  Scenario Grid");
    println!("=======================================================");
    for scenario in &scenarios {
        println!();
        println!("{}:", scenario.name);
        println!("  Description: {}", scenario.description);
        println!("  Vaults: {}", scenario.config.num_vaults);
        println!(
            "  Health factor: mean {} std {} min {}",
            scenario.config.health_factor_mean,
            scenario.config.health_factor_std,
            scenario.config.min_health_factor
        );
        println!(
            "  Price drop: {} -> {} over {} hours",
            scenario.config.start_price, scenario.config.end_price, scenario.config.price_drop_duration
        );
        for warning in scenario.config.validate() {
            tracing::warn!(scenario = %scenario.name, "{}", warning);
        }
    }
    println!();

    let batch = run_batch(&scenarios, iterations);
    let export = BatchExport::from_batch(&batch);

    let path = timestamped_path(RESULTS_DIR, Utc::now());
    export
        .write_to_file(&path)
        .with_context(|| format!("Failed to write results to {}", path.display()))?;

    println!("=======================================================");
    println!("  Summary");
    println!("=======================================================");
    println!("  Scenarios run:   {}", scenarios.len());
    println!("  Rows of data:    {}", batch.records.len());
    println!("  Truncated runs:  {}", batch.truncated_runs());
    println!("  Results saved:   {}", path.display());
    println!();
    println!(
        "| {:45} | {:>8} | {:>8} | {:>8} | {:>10} | {:>6} |",
        "Scenario", "HF mean", "HF min", "HF max", "Liq. mean", "Liq. max"
    );
    println!("|{}|", "-".repeat(106));
    for summary in &export.summaries {
        summary.print();
    }

    Ok(())
}
