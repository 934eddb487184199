//! Scenario grid and batch runner
//!
//! Every scenario combines a price shock, a risk setup (initial health
//! factor distribution) and a protocol scale. Each is run for a number of
//! iterations, each with its own engine and seed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::config::SimulationConfig;
use crate::metrics::{HealthDistribution, StepRecord};
use crate::simulation::{Simulation, TerminationReason};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceScenario {
    pub name: &'static str,
    pub start_price: f64,
    pub end_price: f64,
    /// Hours
    pub duration: f64,
    pub description: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RiskSetup {
    pub name: &'static str,
    pub health_factor_mean: f64,
    pub health_factor_std: f64,
    pub min_health_factor: f64,
    pub description: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleSetup {
    pub name: &'static str,
    pub num_vaults: usize,
    pub description: &'static str,
}

pub const PRICE_SCENARIOS: [PriceScenario; 8] = [
    PriceScenario { name: "30%_drop_1_day", start_price: 1.0, end_price: 0.7, duration: 24.0, description: "30% drop in 1 day" },
    PriceScenario { name: "50%_drop_1_day", start_price: 1.0, end_price: 0.5, duration: 24.0, description: "50% drop in 1 day" },
    PriceScenario { name: "40%_drop_3_days", start_price: 1.0, end_price: 0.6, duration: 72.0, description: "40% drop in 3 days" },
    PriceScenario { name: "60%_drop_3_days", start_price: 1.0, end_price: 0.4, duration: 72.0, description: "60% drop in 3 days" },
    PriceScenario { name: "30%_drop_5_days", start_price: 1.0, end_price: 0.7, duration: 120.0, description: "30% drop in 5 days" },
    PriceScenario { name: "70%_drop_5_days", start_price: 1.0, end_price: 0.3, duration: 120.0, description: "70% drop in 5 days" },
    PriceScenario { name: "50%_drop_7_days", start_price: 1.0, end_price: 0.5, duration: 168.0, description: "50% drop in 7 days" },
    PriceScenario { name: "80%_drop_7_days", start_price: 1.0, end_price: 0.2, duration: 168.0, description: "80% drop in 7 days" },
];

pub const RISK_SETUPS: [RiskSetup; 3] = [
    RiskSetup { name: "low_risk", health_factor_mean: 220.0, health_factor_std: 40.0, min_health_factor: 110.0, description: "Conservative risk parameters" },
    RiskSetup { name: "medium_risk", health_factor_mean: 180.0, health_factor_std: 35.0, min_health_factor: 108.0, description: "Balanced risk parameters" },
    RiskSetup { name: "high_risk", health_factor_mean: 140.0, health_factor_std: 25.0, min_health_factor: 105.0, description: "Aggressive risk parameters" },
];

pub const SCALE_SETUPS: [ScaleSetup; 3] = [
    ScaleSetup { name: "low_scale", num_vaults: 5_000, description: "Small protocol scale" },
    ScaleSetup { name: "medium_scale", num_vaults: 20_000, description: "Medium protocol scale" },
    ScaleSetup { name: "high_scale", num_vaults: 50_000, description: "Large protocol scale" },
];

#[derive(Clone, Debug, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub config: SimulationConfig,
}

impl Scenario {
    pub fn new(
        base: &SimulationConfig,
        price: &PriceScenario,
        risk: &RiskSetup,
        scale: &ScaleSetup,
    ) -> Self {
        let config = SimulationConfig {
            start_price: price.start_price,
            end_price: price.end_price,
            price_drop_duration: price.duration,
            health_factor_mean: risk.health_factor_mean,
            health_factor_std: risk.health_factor_std,
            min_health_factor: risk.min_health_factor,
            num_vaults: scale.num_vaults,
            ..base.clone()
        };

        Self {
            name: format!("{}_{}_{}", price.name, risk.name, scale.name),
            description: format!(
                "{} with {} at {}",
                price.description, risk.description, scale.description
            ),
            config,
        }
    }
}

/// Every price × risk × scale combination over `base`.
pub fn generate_scenarios(base: &SimulationConfig) -> Vec<Scenario> {
    let mut scenarios = Vec::with_capacity(PRICE_SCENARIOS.len() * RISK_SETUPS.len() * SCALE_SETUPS.len());
    for price in &PRICE_SCENARIOS {
        for risk in &RISK_SETUPS {
            for scale in &SCALE_SETUPS {
                scenarios.push(Scenario::new(base, price, risk, scale));
            }
        }
    }
    scenarios
}

#[derive(Clone, Debug, Default)]
pub struct BatchResult {
    pub records: Vec<StepRecord>,
    pub distributions: Vec<HealthDistribution>,
    pub terminations: Vec<(String, usize, TerminationReason)>,
}

impl BatchResult {
    pub fn truncated_runs(&self) -> usize {
        self.terminations
            .iter()
            .filter(|(_, _, t)| *t == TerminationReason::StepCapReached)
            .count()
    }
}

/// Run each scenario `iterations` times with a fresh simulation per run.
pub fn run_batch(scenarios: &[Scenario], iterations: usize) -> BatchResult {
    let mut batch = BatchResult::default();

    info!(
        scenarios = scenarios.len(),
        iterations, "Running scenario batch"
    );

    for scenario in scenarios {
        for iteration in 0..iterations {
            let mut sim = Simulation::new(scenario.config.clone(), scenario.name.clone());
            let run = sim.run(iteration);
            batch
                .terminations
                .push((scenario.name.clone(), iteration, run.termination));
            batch.records.extend(run.records);
            batch.distributions.push(run.distribution);
        }
        info!(scenario = %scenario.name, "Completed all iterations");
    }

    batch
}

/// Per-scenario aggregates over every recorded step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub scenario_name: String,
    pub steps: usize,
    pub mean_health_factor: Option<f64>,
    pub min_health_factor: Option<f64>,
    pub max_health_factor: Option<f64>,
    pub mean_liquidated_vaults: f64,
    pub max_liquidated_vaults: usize,
    pub max_reserve_fund_used: f64,
}

pub fn summarize(records: &[StepRecord]) -> Vec<ScenarioSummary> {
    let mut grouped: BTreeMap<&str, Vec<&StepRecord>> = BTreeMap::new();
    for record in records {
        grouped
            .entry(record.scenario_name.as_str())
            .or_default()
            .push(record);
    }

    grouped
        .into_iter()
        .map(|(name, rows)| {
            let hfs: Vec<f64> = rows
                .iter()
                .filter_map(|r| r.metrics.protocol_health_factor)
                .collect();
            let liquidated: Vec<usize> = rows.iter().map(|r| r.metrics.num_liquidated_vaults).collect();

            ScenarioSummary {
                scenario_name: name.to_string(),
                steps: rows.len(),
                mean_health_factor: if hfs.is_empty() {
                    None
                } else {
                    Some(hfs.iter().sum::<f64>() / hfs.len() as f64)
                },
                min_health_factor: hfs.iter().copied().reduce(f64::min),
                max_health_factor: hfs.iter().copied().reduce(f64::max),
                mean_liquidated_vaults: liquidated.iter().sum::<usize>() as f64
                    / liquidated.len().max(1) as f64,
                max_liquidated_vaults: liquidated.iter().copied().max().unwrap_or(0),
                max_reserve_fund_used: rows
                    .iter()
                    .map(|r| r.reserve.reserve_fund_used)
                    .fold(0.0, f64::max),
            }
        })
        .collect()
}

impl ScenarioSummary {
    pub fn print(&self) {
        let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v));
        println!(
            "| {:45} | {:>8} | {:>8} | {:>8} | {:>10.1} | {:>6} |",
            self.scenario_name,
            fmt(self.mean_health_factor),
            fmt(self.min_health_factor),
            fmt(self.max_health_factor),
            self.mean_liquidated_vaults,
            self.max_liquidated_vaults,
        );
    }
}
