//! Vault Risk Simulation Library
//!
//! Models a lending protocol's vault population under a collateral price
//! shock: per-block liquidation with bounded throughput, and a reserve fund
//! that settles insolvent vaults.
//!
//! ## Modules
//!
//! - `config`: immutable simulation parameters (TOML loadable)
//! - `vault`: single position state and health factor
//! - `engine`: liquidation/recovery queues and the reserve fund
//! - `simulation`: phase state machine and per-block stepping
//! - `metrics`: protocol snapshot, step records, initial distribution
//! - `scenarios`: price × risk × scale grid and batch runner
//! - `export`: JSON export of batch results
//!
//! ## Usage
//!
//! ```bash
//! # Single run with a console status report
//! cargo run --bin stress --release
//!
//! # Full scenario grid, results written to results/
//! cargo run --bin scenarios --release
//! ```

pub mod config;
pub mod vault;
pub mod engine;
pub mod metrics;
pub mod simulation;
pub mod scenarios;
pub mod export;

/// Crate version constant
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
