//! Protocol metrics
//!
//! Per-step snapshot of the whole vault population, the per-step record
//! handed to result collectors, and the one-off summary of the sampled
//! initial health factors.

use serde::{Deserialize, Serialize};

use crate::config::RiskParams;
use crate::engine::ReserveFund;
use crate::simulation::{Phase, TerminationReason};
use crate::vault::{health_factor, Vault, VaultStatus};

/// Number of histogram bins in `HealthDistribution`.
pub const HISTOGRAM_BINS: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolStatus {
    SuccessfullyLiquidated,
    VeryHealthy,
    Healthy,
    Caution,
    HighRisk,
    ImminentInsolvency,
    Insolvent,
}

impl ProtocolStatus {
    /// Status from the protocol-wide health factor. `None` means there is no
    /// outstanding debt.
    pub fn from_health_factor(hf: Option<f64>, open_vaults: usize) -> Self {
        if open_vaults == 0 {
            return Self::SuccessfullyLiquidated;
        }
        match hf {
            None => Self::VeryHealthy,
            Some(hf) if hf >= 200.0 => Self::VeryHealthy,
            Some(hf) if hf >= 150.0 => Self::Healthy,
            Some(hf) if hf >= 120.0 => Self::Caution,
            Some(hf) if hf >= 100.0 => Self::HighRisk,
            Some(hf) if hf >= 66.0 => Self::ImminentInsolvency,
            Some(_) => Self::Insolvent,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SuccessfullyLiquidated => "SUCCESSFULLY LIQUIDATED POSITIONS",
            Self::VeryHealthy => "VERY HEALTHY",
            Self::Healthy => "HEALTHY",
            Self::Caution => "CAUTION",
            Self::HighRisk => "HIGH RISK",
            Self::ImminentInsolvency => "IMMINENT INSOLVENCY",
            Self::Insolvent => "INSOLVENT",
        }
    }
}

/// Aggregate state of every vault at one price.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMetrics {
    pub price: f64,
    pub total_vaults: usize,
    pub total_collateral: f64,
    pub total_collateral_value: f64,
    pub total_debt: f64,
    /// `None` once no debt remains
    pub protocol_health_factor: Option<f64>,
    pub num_healthy_vaults: usize,
    pub num_at_risk_vaults: usize,
    pub num_liquidatable_vaults: usize,
    pub num_insolvent_vaults: usize,
    pub num_liquidated_vaults: usize,
    pub insolvent_collateral: f64,
    pub insolvent_collateral_value: f64,
    pub insolvent_debt: f64,
}

impl ProtocolMetrics {
    /// Single pass over the population.
    pub fn collect(vaults: &[Vault], price: f64, params: &RiskParams) -> Self {
        let mut m = Self {
            price,
            total_vaults: vaults.len(),
            ..Self::default()
        };

        for vault in vaults {
            let collateral = vault.collateral_amount();
            let value = vault.collateral_value(price);
            let debt = vault.debt_amount();

            m.total_collateral += collateral;
            m.total_collateral_value += value;
            m.total_debt += debt;

            match vault.status(price) {
                VaultStatus::Healthy => m.num_healthy_vaults += 1,
                VaultStatus::AtRisk => m.num_at_risk_vaults += 1,
                VaultStatus::Liquidatable => m.num_liquidatable_vaults += 1,
                VaultStatus::Insolvent => {
                    m.num_insolvent_vaults += 1;
                    m.insolvent_collateral += collateral;
                    m.insolvent_collateral_value += value;
                    m.insolvent_debt += debt;
                }
                VaultStatus::Liquidated => m.num_liquidated_vaults += 1,
            }
        }

        m.protocol_health_factor = health_factor(
            m.total_collateral,
            m.total_debt,
            price,
            params.collateralisation_ratio,
        )
        .value();
        m
    }

    pub fn count(&self, status: VaultStatus) -> usize {
        match status {
            VaultStatus::Healthy => self.num_healthy_vaults,
            VaultStatus::AtRisk => self.num_at_risk_vaults,
            VaultStatus::Liquidatable => self.num_liquidatable_vaults,
            VaultStatus::Insolvent => self.num_insolvent_vaults,
            VaultStatus::Liquidated => self.num_liquidated_vaults,
        }
    }

    pub fn open_vaults(&self) -> usize {
        self.total_vaults - self.num_liquidated_vaults
    }

    pub fn protocol_status(&self) -> ProtocolStatus {
        ProtocolStatus::from_health_factor(self.protocol_health_factor, self.open_vaults())
    }

    /// Collateral value over debt, as a percentage.
    pub fn collateralization_ratio(&self) -> Option<f64> {
        if self.total_debt > 0.0 {
            Some(self.total_collateral_value / self.total_debt * 100.0)
        } else {
            None
        }
    }

    pub fn print(&self) {
        println!("  Total collateral:        {:.0}", self.total_collateral);
        println!("  Price:                   ${:.3}", self.price);
        match self.protocol_health_factor {
            Some(hf) => println!("  Protocol health factor:  {:.0}", hf),
            None => println!("  Protocol health factor:  no debt"),
        }
        println!("  Status:                  {}", self.protocol_status().name());
        println!("  Collateral value:        ${:.2}", self.total_collateral_value);
        println!("  Total debt:              ${:.2}", self.total_debt);
        if let Some(ratio) = self.collateralization_ratio() {
            println!("  Collateralization:       {:.2}%", ratio);
        }
        println!("  Vault distribution:");
        let total = self.total_vaults.max(1) as f64;
        for status in VaultStatus::all() {
            let n = self.count(status);
            println!(
                "    {:14} {:>8} ({:.1}%)",
                status.name(),
                n,
                n as f64 / total * 100.0
            );
        }
        if self.num_insolvent_vaults > 0 {
            println!(
                "  Insolvent debt:          ${:.2} against ${:.2} collateral",
                self.insolvent_debt, self.insolvent_collateral_value
            );
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Summary of the sampled initial health factors of one iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthDistribution {
    pub scenario_name: String,
    pub iteration: usize,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub histogram: Vec<HistogramBin>,
}

impl HealthDistribution {
    pub fn from_values(scenario_name: &str, iteration: usize, values: &[f64]) -> Self {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        if count == 0 {
            return Self {
                scenario_name: scenario_name.to_string(),
                iteration,
                count,
                mean: 0.0,
                median: 0.0,
                std_dev: 0.0,
                min: 0.0,
                max: 0.0,
                histogram: Vec::new(),
            };
        }

        let n = count as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };
        let min = sorted[0];
        let max = sorted[count - 1];

        Self {
            scenario_name: scenario_name.to_string(),
            iteration,
            count,
            mean,
            median,
            std_dev: variance.sqrt(),
            min,
            max,
            histogram: histogram(&sorted, min, max, HISTOGRAM_BINS),
        }
    }
}

fn histogram(values: &[f64], min: f64, max: f64, bins: usize) -> Vec<HistogramBin> {
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };
    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: min + width * i as f64,
            upper: min + width * (i + 1) as f64,
            count: 0,
        })
        .collect();

    for v in values {
        let idx = (((v - min) / width) as usize).min(bins - 1);
        out[idx].count += 1;
    }
    out
}

/// One row of simulation output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub scenario_name: String,
    pub iteration: usize,
    pub step: usize,
    pub phase: Phase,
    pub simulation_hour: f64,
    #[serde(flatten)]
    pub metrics: ProtocolMetrics,
    pub liquidation_queue_size: usize,
    pub recovery_queue_size: usize,
    pub liquidated_this_step: usize,
    pub recovered_this_step: usize,
    #[serde(flatten)]
    pub reserve: ReserveFund,
    pub reserve_fund_percentage_remaining: f64,
    /// Set on the final record of a run only
    pub termination: Option<TerminationReason>,
}

impl StepRecord {
    pub fn transitions(&self) -> usize {
        self.liquidated_this_step + self.recovered_this_step
    }
}
