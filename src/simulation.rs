//! Price Shock Simulation
//!
//! Drives a `RiskEngine` through a collateral price shock one block at a
//! time and records the protocol state after every block.
//!
//! ## Phases
//! 1. Initial: vaults sampled, reserve fund capitalized, step 0 recorded
//! 2. Price drop: price follows a linear path from start to end price
//! 3. Recovery: price held at the end price while queues drain
//!
//! ## Block sequence
//! set price -> admit -> allocate throughput -> drain recoveries ->
//! drain liquidations -> snapshot
//!
//! ## Termination
//! - Stabilized: nothing liquidatable, liquidation queue empty and no
//!   recovery left that the fund can pay for
//! - Recovery stalled: a recovery block moved no vault although the fund
//!   can still pay for queued recoveries
//! - Recovery window elapsed
//! - Step cap reached (the run is truncated)

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SimulationConfig;
use crate::engine::RiskEngine;
use crate::metrics::{HealthDistribution, ProtocolMetrics, StepRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initial,
    PriceDrop,
    Recovery,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::PriceDrop => "price_drop",
            Self::Recovery => "recovery",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Stabilized,
    RecoveryStalled,
    RecoveryWindowElapsed,
    StepCapReached,
}

impl TerminationReason {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stabilized => "stabilized",
            Self::RecoveryStalled => "recovery stalled",
            Self::RecoveryWindowElapsed => "recovery window elapsed",
            Self::StepCapReached => "step cap reached",
        }
    }
}

/// Price at block `index` of a `blocks`-long linear path from `start` to
/// `end`, both endpoints included.
pub fn price_at(start: f64, end: f64, blocks: usize, index: usize) -> f64 {
    if blocks < 2 || index == 0 {
        return start;
    }
    if index >= blocks - 1 {
        return end;
    }
    start + (end - start) * index as f64 / (blocks - 1) as f64
}

#[derive(Clone, Debug)]
pub struct SimulationRun {
    pub records: Vec<StepRecord>,
    pub distribution: HealthDistribution,
    pub termination: TerminationReason,
}

impl SimulationRun {
    /// True when the step cap cut the run short.
    pub fn is_truncated(&self) -> bool {
        self.termination == TerminationReason::StepCapReached
    }

    pub fn final_record(&self) -> Option<&StepRecord> {
        self.records.last()
    }

    pub fn total_liquidated(&self) -> usize {
        self.records.iter().map(|r| r.liquidated_this_step).sum()
    }

    pub fn total_recovered(&self) -> usize {
        self.records.iter().map(|r| r.recovered_this_step).sum()
    }
}

pub struct Simulation {
    config: SimulationConfig,
    scenario_name: String,
    engine: RiskEngine,
    drop_blocks: usize,
    phase: Phase,
    step: usize,
}

impl Simulation {
    pub fn new(config: SimulationConfig, scenario_name: impl Into<String>) -> Self {
        let engine = RiskEngine::new(&config);
        Self::with_engine(config, scenario_name, engine)
    }

    /// Simulation over an already populated engine. Use `run_prepared` to
    /// keep its vaults and reserve fund.
    pub fn with_engine(
        config: SimulationConfig,
        scenario_name: impl Into<String>,
        engine: RiskEngine,
    ) -> Self {
        let drop_blocks = config.price_drop_blocks();
        Self {
            config,
            scenario_name: scenario_name.into(),
            engine,
            drop_blocks,
            phase: Phase::Initial,
            step: 0,
        }
    }

    pub fn engine(&self) -> &RiskEngine {
        &self.engine
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Length of the price drop in blocks, before the step cap applies.
    pub fn drop_blocks(&self) -> usize {
        self.drop_blocks
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Sample a fresh population seeded by `seed + iteration`, capitalize the
    /// reserve fund and run to termination.
    pub fn run(&mut self, iteration: usize) -> SimulationRun {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(iteration as u64));
        self.engine.create_vaults(&self.config, &mut rng);
        self.engine
            .capitalize_reserve_fund(self.config.reserve_fund_percentage);
        self.run_prepared(iteration)
    }

    /// Run to termination with the engine's current population and fund.
    pub fn run_prepared(&mut self, iteration: usize) -> SimulationRun {
        self.phase = Phase::Initial;
        self.step = 0;
        self.engine.set_price(self.config.start_price);

        let initial_hfs: Vec<f64> = self
            .engine
            .vaults()
            .iter()
            .map(|v| v.initial_health_factor())
            .collect();
        let distribution = HealthDistribution::from_values(&self.scenario_name, iteration, &initial_hfs);

        info!(
            scenario = %self.scenario_name,
            iteration,
            vaults = self.engine.vaults().len(),
            reserve_fund = self.engine.reserve_fund().reserve_fund,
            drop_blocks = self.drop_blocks,
            "Starting simulation"
        );

        let mut records = vec![self.record(iteration, self.engine.metrics(), 0, 0)];
        let termination = self.drive(iteration, &mut records);

        if let Some(last) = records.last_mut() {
            last.termination = Some(termination);
        }

        info!(
            scenario = %self.scenario_name,
            iteration,
            steps = self.step,
            termination = termination.name(),
            "Simulation finished"
        );

        SimulationRun {
            records,
            distribution,
            termination,
        }
    }

    fn drive(&mut self, iteration: usize, records: &mut Vec<StepRecord>) -> TerminationReason {
        let max_steps = self.config.max_simulation_steps;

        self.phase = Phase::PriceDrop;
        debug!(blocks = self.drop_blocks, "Entering price drop");

        let (start, end) = (self.config.start_price, self.config.end_price);
        for i in 0..self.drop_blocks {
            if self.step >= max_steps {
                return TerminationReason::StepCapReached;
            }
            let price = price_at(start, end, self.drop_blocks, i);
            records.push(self.advance(iteration, price));
        }

        self.phase = Phase::Recovery;
        let recovery_blocks = self.config.recovery_blocks();
        debug!(blocks = recovery_blocks, "Entering recovery");

        let end_price = self.config.end_price;
        let mut recovery_steps = 0;
        loop {
            let stalled = recovery_steps > 0
                && records.last().is_some_and(|r| r.transitions() == 0);
            if let Some(last) = records.last() {
                if let Some(reason) = self.settled(&last.metrics, stalled) {
                    return reason;
                }
            }
            if recovery_steps >= recovery_blocks {
                return TerminationReason::RecoveryWindowElapsed;
            }
            if self.step >= max_steps {
                return TerminationReason::StepCapReached;
            }
            records.push(self.advance(iteration, end_price));
            recovery_steps += 1;
        }
    }

    /// With nothing left to liquidate: `Stabilized` once nothing is left to
    /// recover or the fund is depleted, `RecoveryStalled` when the last
    /// block moved no vault although the fund could still pay.
    fn settled(&self, metrics: &ProtocolMetrics, stalled: bool) -> Option<TerminationReason> {
        if metrics.num_liquidatable_vaults > 0 || self.engine.liquidation_queue_size() > 0 {
            return None;
        }
        let nothing_to_recover =
            metrics.num_insolvent_vaults == 0 && self.engine.recovery_queue_size() == 0;
        if nothing_to_recover || self.engine.reserve_fund().reserve_fund_depleted {
            Some(TerminationReason::Stabilized)
        } else if stalled {
            Some(TerminationReason::RecoveryStalled)
        } else {
            None
        }
    }

    /// Process one block at `price` and snapshot the result.
    fn advance(&mut self, iteration: usize, price: f64) -> StepRecord {
        self.step += 1;
        self.engine.set_price(price);
        self.engine.admit_to_queues();

        let allocation = self.engine.allocate_throughput(self.config.txs_per_block);
        let recovered = self.engine.drain_recoveries(allocation.recovery);
        let liquidated = self.engine.drain_liquidations(allocation.liquidation);

        debug!(
            step = self.step,
            phase = self.phase.name(),
            price,
            liquidated = liquidated.len(),
            recovered = recovered.len(),
            "Block processed"
        );

        let metrics = self.engine.metrics();
        self.record(iteration, metrics, liquidated.len(), recovered.len())
    }

    fn record(
        &self,
        iteration: usize,
        metrics: ProtocolMetrics,
        liquidated: usize,
        recovered: usize,
    ) -> StepRecord {
        let reserve = self.engine.reserve_fund().clone();
        StepRecord {
            scenario_name: self.scenario_name.clone(),
            iteration,
            step: self.step,
            phase: self.phase,
            simulation_hour: self.config.hours_at(self.step),
            metrics,
            liquidation_queue_size: self.engine.liquidation_queue_size(),
            recovery_queue_size: self.engine.recovery_queue_size(),
            liquidated_this_step: liquidated,
            recovered_this_step: recovered,
            reserve_fund_percentage_remaining: reserve.percentage_remaining(),
            reserve,
            termination: None,
        }
    }
}
