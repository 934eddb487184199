//! Simulation parameters
//!
//! A single immutable parameter set per scenario. Every field has a default
//! so partial TOML files are accepted; missing keys fall back to the
//! baseline scenario below.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Environment variable naming the TOML file the binaries read.
pub const CONFIG_ENV_VAR: &str = "RISK_SIM_CONFIG";

/// Collateral amounts are never sampled below this quantity.
pub const MIN_COLLATERAL_AMOUNT: f64 = 1000.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Semantically questionable parameters. The engine runs regardless; these
/// only exist so callers can log them.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarning {
    NonPositive { field: &'static str, value: f64 },
    ThresholdOrder { insolvency: f64, liquidation: f64 },
    EmptyPricePath,
    PriceIncrease { start: f64, end: f64 },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositive { field, value } => {
                write!(f, "{} should be positive, got {}", field, value)
            }
            Self::ThresholdOrder { insolvency, liquidation } => write!(
                f,
                "insolvency threshold {} is not below liquidation threshold {}",
                insolvency, liquidation
            ),
            Self::EmptyPricePath => write!(f, "price drop spans zero blocks"),
            Self::PriceIncrease { start, end } => {
                write!(f, "end price {} is above start price {}", end, start)
            }
        }
    }
}

/// The subset of parameters a vault needs to classify itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    pub collateralisation_ratio: f64,
    pub liquidation_threshold: f64,
    pub insolvency_threshold: f64,
    pub healthy_threshold: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        SimulationConfig::default().risk_params()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Total number of vaults in the simulation
    pub num_vaults: usize,

    /// Mean (and standard deviation) of initial collateral per vault
    pub mean_collateral_amount: f64,

    /// Log-normal initial health factor distribution
    pub health_factor_mean: f64,
    pub health_factor_std: f64,
    pub min_health_factor: f64,

    /// Price shock, in currency units
    pub start_price: f64,
    pub end_price: f64,
    /// Hours
    pub price_drop_duration: f64,

    /// Minutes per block
    pub block_time: f64,
    /// Vault transitions processed per block
    pub txs_per_block: usize,
    /// Share of each block reserved for reserve-fund recoveries
    pub recovery_throughput: usize,

    /// Percentage
    pub collateralisation_ratio: f64,
    pub health_factor_liquidation_threshold: f64,
    pub health_factor_insolvency_threshold: f64,
    pub healthy_threshold: f64,

    /// Percentage of genesis debt held in the reserve fund
    pub reserve_fund_percentage: f64,
    /// Credit seized collateral value back to the fund after a recovery
    pub recycle_seized_collateral: bool,

    /// Hours the price is held at the end price after the drop
    pub recovery_duration: f64,
    pub max_simulation_steps: usize,

    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_vaults: 1000,
            mean_collateral_amount: 50_000.0,
            health_factor_mean: 180.0,
            health_factor_std: 35.0,
            min_health_factor: 108.0,
            start_price: 1.0,
            end_price: 0.4,
            price_drop_duration: 24.0,
            block_time: 3.0,
            txs_per_block: 14,
            recovery_throughput: 4,
            collateralisation_ratio: 150.0,
            health_factor_liquidation_threshold: 100.0,
            health_factor_insolvency_threshold: 66.0,
            healthy_threshold: 150.0,
            reserve_fund_percentage: 5.0,
            recycle_seized_collateral: true,
            recovery_duration: 48.0,
            max_simulation_steps: 100_000,
            seed: 42,
        }
    }
}

impl SimulationConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn risk_params(&self) -> RiskParams {
        RiskParams {
            collateralisation_ratio: self.collateralisation_ratio,
            liquidation_threshold: self.health_factor_liquidation_threshold,
            insolvency_threshold: self.health_factor_insolvency_threshold,
            healthy_threshold: self.healthy_threshold,
        }
    }

    /// Number of blocks over which the price falls. Negative or NaN
    /// durations produce zero blocks.
    pub fn price_drop_blocks(&self) -> usize {
        blocks_for_hours(self.price_drop_duration, self.block_time)
    }

    /// Number of blocks the recovery phase may last.
    pub fn recovery_blocks(&self) -> usize {
        blocks_for_hours(self.recovery_duration, self.block_time)
    }

    /// Hours of simulated time elapsed at `step`.
    pub fn hours_at(&self, step: usize) -> f64 {
        step as f64 * self.block_time / 60.0
    }

    /// Collects parameters that will produce a degenerate run.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let magnitudes = [
            ("num_vaults", self.num_vaults as f64),
            ("mean_collateral_amount", self.mean_collateral_amount),
            ("health_factor_mean", self.health_factor_mean),
            ("start_price", self.start_price),
            ("end_price", self.end_price),
            ("price_drop_duration", self.price_drop_duration),
            ("block_time", self.block_time),
            ("txs_per_block", self.txs_per_block as f64),
            ("collateralisation_ratio", self.collateralisation_ratio),
            ("max_simulation_steps", self.max_simulation_steps as f64),
        ];
        for (field, value) in magnitudes {
            if !(value > 0.0) {
                warnings.push(ConfigWarning::NonPositive { field, value });
            }
        }

        if self.health_factor_insolvency_threshold >= self.health_factor_liquidation_threshold {
            warnings.push(ConfigWarning::ThresholdOrder {
                insolvency: self.health_factor_insolvency_threshold,
                liquidation: self.health_factor_liquidation_threshold,
            });
        }

        if self.price_drop_blocks() == 0 {
            warnings.push(ConfigWarning::EmptyPricePath);
        }

        if self.end_price > self.start_price {
            warnings.push(ConfigWarning::PriceIncrease {
                start: self.start_price,
                end: self.end_price,
            });
        }

        warnings
    }
}

fn blocks_for_hours(hours: f64, block_time_minutes: f64) -> usize {
    let blocks = hours * 60.0 / block_time_minutes;
    if blocks.is_finite() && blocks > 0.0 {
        blocks.floor() as usize
    } else {
        0
    }
}
