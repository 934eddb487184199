//! Liquidation and recovery engine
//!
//! Owns the vault population, the collateral price, two FIFO work queues and
//! the reserve fund. Each block the simulation admits newly unhealthy vaults
//! and then drains both queues within that block's throughput.
//!
//! ## Queues
//! - Liquidation queue: vaults between the insolvency and liquidation
//!   thresholds. Their own collateral settles their debt.
//! - Recovery queue: insolvent vaults. Settling them debits the reserve
//!   fund, which is a hard gate: once it cannot cover the head of the queue,
//!   recovery stops for good.
//!
//! A vault sits in at most one queue, at most once, tracked by its
//! `QueueTag`. Nothing here returns an error; contention is resolved by
//! requeueing or skipping.

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::config::{RiskParams, SimulationConfig};
use crate::metrics::ProtocolMetrics;
use crate::vault::{LiquidationOutcome, QueueTag, Vault};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReserveFund {
    pub reserve_fund: f64,
    pub initial_reserve_fund: f64,
    pub reserve_fund_used: f64,
    pub reserve_fund_depleted: bool,
}

impl ReserveFund {
    pub fn with_balance(amount: f64) -> Self {
        Self {
            reserve_fund: amount,
            initial_reserve_fund: amount,
            reserve_fund_used: 0.0,
            reserve_fund_depleted: false,
        }
    }

    /// Current balance as a percentage of the initial capitalization.
    pub fn percentage_remaining(&self) -> f64 {
        if self.initial_reserve_fund > 0.0 {
            self.reserve_fund / self.initial_reserve_fund * 100.0
        } else {
            0.0
        }
    }
}

/// How one block's throughput is split between the two queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThroughputAllocation {
    pub recovery: usize,
    pub liquidation: usize,
}

pub struct RiskEngine {
    vaults: Vec<Vault>,
    current_price: f64,
    liquidation_queue: VecDeque<usize>,
    recovery_queue: VecDeque<usize>,
    reserve: ReserveFund,
    params: RiskParams,
    recovery_throughput: usize,
    recycle_seized_collateral: bool,
}

impl RiskEngine {
    /// Empty engine priced at the configured start price.
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            vaults: Vec::new(),
            current_price: config.start_price,
            liquidation_queue: VecDeque::new(),
            recovery_queue: VecDeque::new(),
            reserve: ReserveFund::default(),
            params: config.risk_params(),
            recovery_throughput: config.recovery_throughput,
            recycle_seized_collateral: config.recycle_seized_collateral,
        }
    }

    /// Engine over a prepared population. Vault ids are reassigned to match
    /// their position.
    pub fn with_vaults(config: &SimulationConfig, vaults: Vec<Vault>) -> Self {
        let mut engine = Self::new(config);
        engine.vaults = vaults
            .into_iter()
            .enumerate()
            .map(|(id, mut vault)| {
                vault.id = id;
                vault.queue = QueueTag::None;
                vault
            })
            .collect();
        engine
    }

    /// Materialize `config.num_vaults` sampled vaults, replacing any
    /// existing population and clearing both queues.
    pub fn create_vaults(&mut self, config: &SimulationConfig, rng: &mut impl Rng) {
        self.vaults = (0..config.num_vaults)
            .map(|id| Vault::sample(id, config, rng))
            .collect();
        self.liquidation_queue.clear();
        self.recovery_queue.clear();
    }

    /// Fund the reserve with `percentage` of current total debt. Called once,
    /// after vault creation.
    pub fn capitalize_reserve_fund(&mut self, percentage: f64) {
        let amount = self.total_debt() * percentage / 100.0;
        self.reserve = ReserveFund::with_balance(amount.max(0.0));
    }

    /// Overwrite the reserve fund with a fresh balance.
    pub fn set_reserve_fund(&mut self, amount: f64) {
        self.reserve = ReserveFund::with_balance(amount);
    }

    pub fn vaults(&self) -> &[Vault] {
        &self.vaults
    }

    pub fn vault(&self, id: usize) -> Option<&Vault> {
        self.vaults.get(id)
    }

    pub fn set_price(&mut self, price: f64) {
        self.current_price = price;
    }

    pub fn price(&self) -> f64 {
        self.current_price
    }

    pub fn params(&self) -> &RiskParams {
        &self.params
    }

    pub fn reserve_fund(&self) -> &ReserveFund {
        &self.reserve
    }

    pub fn liquidation_queue(&self) -> &VecDeque<usize> {
        &self.liquidation_queue
    }

    pub fn recovery_queue(&self) -> &VecDeque<usize> {
        &self.recovery_queue
    }

    pub fn liquidation_queue_size(&self) -> usize {
        self.liquidation_queue.len()
    }

    pub fn recovery_queue_size(&self) -> usize {
        self.recovery_queue.len()
    }

    pub fn total_debt(&self) -> f64 {
        self.vaults.iter().map(|v| v.debt_amount()).sum()
    }

    /// Queue every open, unqueued vault below the liquidation threshold.
    /// Insolvent vaults go to the recovery queue instead. Returns how many
    /// vaults were newly queued.
    pub fn admit_to_queues(&mut self) -> usize {
        let price = self.current_price;
        let mut newly_queued = 0;

        for (idx, vault) in self.vaults.iter_mut().enumerate() {
            if vault.is_liquidated() || vault.queue != QueueTag::None {
                continue;
            }

            let hf = vault.health_factor(price);
            if !hf.is_below(self.params.liquidation_threshold) {
                continue;
            }

            if hf.is_below(self.params.insolvency_threshold) {
                vault.queue = QueueTag::Recovery;
                self.recovery_queue.push_back(idx);
            } else {
                vault.queue = QueueTag::Liquidation;
                self.liquidation_queue.push_back(idx);
            }
            newly_queued += 1;
        }

        if newly_queued > 0 {
            debug!(
                newly_queued,
                liquidation_queue = self.liquidation_queue.len(),
                recovery_queue = self.recovery_queue.len(),
                "Admitted vaults"
            );
        }
        newly_queued
    }

    /// Liquidate up to `budget` vaults from the front of the liquidation
    /// queue. Vaults that have turned insolvent since admission move to the
    /// back of the recovery queue instead. Returns the ids liquidated.
    pub fn drain_liquidations(&mut self, budget: usize) -> Vec<usize> {
        let price = self.current_price;
        let mut liquidated = Vec::new();

        for _ in 0..budget {
            let Some(idx) = self.liquidation_queue.pop_front() else {
                break;
            };
            let vault = &mut self.vaults[idx];
            vault.queue = QueueTag::None;

            if vault.health_factor(price).is_below(self.params.insolvency_threshold) {
                vault.queue = QueueTag::Recovery;
                self.recovery_queue.push_back(idx);
                continue;
            }

            if vault.liquidate(price) == LiquidationOutcome::Liquidated {
                liquidated.push(idx);
            }
        }

        liquidated
    }

    /// Settle up to `budget` insolvent vaults from the reserve fund.
    ///
    /// A successful recovery debits the fund by the vault's debt and, when
    /// recycling is enabled, credits back the seized collateral at the
    /// current price. The first vault the fund cannot cover goes back to the
    /// front of the queue, the fund is marked depleted and the call stops.
    /// Returns the ids recovered.
    pub fn drain_recoveries(&mut self, budget: usize) -> Vec<usize> {
        let price = self.current_price;
        let mut recovered = Vec::new();

        for _ in 0..budget {
            let Some(idx) = self.recovery_queue.pop_front() else {
                break;
            };
            let vault = &mut self.vaults[idx];
            vault.queue = QueueTag::None;

            let debt = vault.debt_amount();
            if debt == 0.0 {
                continue;
            }
            // Released vaults are re-admitted on the next pass if needed.
            if !vault.health_factor(price).is_below(self.params.liquidation_threshold) {
                continue;
            }

            if self.reserve.reserve_fund < debt {
                vault.queue = QueueTag::Recovery;
                self.recovery_queue.push_front(idx);
                if !self.reserve.reserve_fund_depleted {
                    warn!(
                        reserve_fund = self.reserve.reserve_fund,
                        debt,
                        queued = self.recovery_queue.len(),
                        "Reserve fund depleted"
                    );
                }
                self.reserve.reserve_fund_depleted = true;
                break;
            }

            let seized_value = vault.collateral_value(price);
            self.reserve.reserve_fund -= debt;
            self.reserve.reserve_fund_used += debt;
            vault.liquidate(price);
            if self.recycle_seized_collateral {
                self.reserve.reserve_fund += seized_value;
            }
            recovered.push(idx);
        }

        recovered
    }

    /// Split `capacity` between recovery and liquidation for one block.
    ///
    /// Recovery gets its fixed sub-budget while both queues have work, the
    /// whole block when only recoveries are pending, and nothing once the
    /// fund is depleted.
    pub fn allocate_throughput(&self, capacity: usize) -> ThroughputAllocation {
        if self.reserve.reserve_fund_depleted || self.recovery_queue.is_empty() {
            return ThroughputAllocation {
                recovery: 0,
                liquidation: capacity,
            };
        }

        let recovery = if self.liquidation_queue.is_empty() {
            capacity
        } else {
            self.recovery_throughput.min(capacity)
        };

        ThroughputAllocation {
            recovery,
            liquidation: capacity - recovery,
        }
    }

    pub fn metrics(&self) -> ProtocolMetrics {
        ProtocolMetrics::collect(&self.vaults, self.current_price, &self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimulationConfig {
        SimulationConfig::default()
    }

    fn engine_with(vaults: Vec<Vault>) -> RiskEngine {
        RiskEngine::with_vaults(&config(), vaults)
    }

    fn at_hf(id: usize, hf: f64) -> Vault {
        Vault::with_health_factor(id, 10_000.0, hf, 1.0, config().risk_params())
    }

    fn insolvent(id: usize) -> Vault {
        // HF 40 at price 1.0: 600 collateral against 1000 debt
        Vault::new(id, 600.0, 1000.0, 1.0, config().risk_params())
    }

    #[test]
    fn test_admission_bifurcates_by_threshold() {
        let mut engine = engine_with(vec![at_hf(0, 200.0), at_hf(0, 90.0), at_hf(0, 40.0)]);
        assert_eq!(engine.admit_to_queues(), 2);
        assert_eq!(engine.liquidation_queue().iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(engine.recovery_queue().iter().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(engine.vault(1).unwrap().queue(), QueueTag::Liquidation);
        assert_eq!(engine.vault(2).unwrap().queue(), QueueTag::Recovery);

        // A second pass must not duplicate anything
        assert_eq!(engine.admit_to_queues(), 0);
        assert_eq!(engine.liquidation_queue_size(), 1);
        assert_eq!(engine.recovery_queue_size(), 1);
    }

    #[test]
    fn test_drain_liquidations_respects_budget_and_order() {
        let vaults = (0..5).map(|i| at_hf(i, 90.0)).collect();
        let mut engine = engine_with(vaults);
        engine.admit_to_queues();

        assert_eq!(engine.drain_liquidations(3), vec![0, 1, 2]);
        assert_eq!(engine.drain_liquidations(3), vec![3, 4]);
        assert!(engine.drain_liquidations(3).is_empty());
        assert!(engine.vaults().iter().all(|v| v.is_liquidated()));
    }

    #[test]
    fn test_drain_liquidations_redirects_insolvent() {
        let mut engine = engine_with(vec![at_hf(0, 90.0), at_hf(1, 95.0)]);
        engine.admit_to_queues();
        // 90 * 0.5 = 45, below insolvency; 95 * 0.5 = 47.5 as well
        engine.set_price(0.5);

        assert!(engine.drain_liquidations(10).is_empty());
        assert_eq!(engine.liquidation_queue_size(), 0);
        assert_eq!(engine.recovery_queue().iter().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert!(engine.vaults().iter().all(|v| !v.is_liquidated()));
        assert!(engine
            .vaults()
            .iter()
            .all(|v| v.queue() == QueueTag::Recovery));
    }

    #[test]
    fn test_recovery_debits_and_recycles() {
        let mut engine = engine_with(vec![insolvent(0)]);
        engine.set_reserve_fund(5_000.0);
        engine.admit_to_queues();

        assert_eq!(engine.drain_recoveries(4), vec![0]);
        let fund = engine.reserve_fund();
        assert_eq!(fund.reserve_fund, 5_000.0 - 1_000.0 + 600.0);
        assert_eq!(fund.reserve_fund_used, 1_000.0);
        assert!(!fund.reserve_fund_depleted);
        assert!(engine.vault(0).unwrap().is_liquidated());
    }

    #[test]
    fn test_recovery_without_recycling() {
        let cfg = SimulationConfig {
            recycle_seized_collateral: false,
            ..config()
        };
        let mut engine = RiskEngine::with_vaults(&cfg, vec![insolvent(0)]);
        engine.set_reserve_fund(5_000.0);
        engine.admit_to_queues();

        assert_eq!(engine.drain_recoveries(4), vec![0]);
        assert_eq!(engine.reserve_fund().reserve_fund, 4_000.0);
    }

    #[test]
    fn test_insufficient_fund_requeues_at_front() {
        let mut engine = engine_with(vec![insolvent(0), insolvent(1)]);
        engine.set_reserve_fund(999.0);
        engine.admit_to_queues();

        assert!(engine.drain_recoveries(10).is_empty());
        let fund = engine.reserve_fund();
        assert!(fund.reserve_fund_depleted);
        assert_eq!(fund.reserve_fund, 999.0);
        assert_eq!(fund.reserve_fund_used, 0.0);
        assert_eq!(engine.recovery_queue().iter().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(engine.vault(0).unwrap().queue(), QueueTag::Recovery);
    }

    #[test]
    fn test_recovered_price_releases_without_touching_fund() {
        let mut engine = engine_with(vec![insolvent(0)]);
        engine.set_reserve_fund(5_000.0);
        engine.admit_to_queues();
        // HF 40 * 3 = 120, no longer below the liquidation threshold
        engine.set_price(3.0);

        assert!(engine.drain_recoveries(4).is_empty());
        let fund = engine.reserve_fund();
        assert_eq!(fund.reserve_fund, 5_000.0);
        assert_eq!(fund.reserve_fund_used, 0.0);
        assert!(!fund.reserve_fund_depleted);
        assert_eq!(engine.recovery_queue_size(), 0);

        let vault = engine.vault(0).unwrap();
        assert_eq!(vault.queue(), QueueTag::None);
        assert!(!vault.is_liquidated());
        assert_eq!(vault.debt_amount(), 1_000.0);

        assert_eq!(engine.admit_to_queues(), 0);
    }

    #[test]
    fn test_allocation() {
        let mut engine = engine_with(vec![at_hf(0, 90.0), insolvent(1)]);
        engine.set_reserve_fund(10_000.0);

        // Nothing queued
        assert_eq!(
            engine.allocate_throughput(14),
            ThroughputAllocation { recovery: 0, liquidation: 14 }
        );

        engine.admit_to_queues();
        assert_eq!(
            engine.allocate_throughput(14),
            ThroughputAllocation { recovery: 4, liquidation: 10 }
        );
        assert_eq!(
            engine.allocate_throughput(3),
            ThroughputAllocation { recovery: 3, liquidation: 0 }
        );

        engine.drain_liquidations(10);
        assert_eq!(
            engine.allocate_throughput(14),
            ThroughputAllocation { recovery: 14, liquidation: 0 }
        );
    }

    #[test]
    fn test_allocation_after_depletion() {
        let mut engine = engine_with(vec![at_hf(0, 90.0), insolvent(1)]);
        engine.set_reserve_fund(0.0);
        engine.admit_to_queues();
        engine.drain_recoveries(4);
        assert!(engine.reserve_fund().reserve_fund_depleted);
        assert_eq!(
            engine.allocate_throughput(14),
            ThroughputAllocation { recovery: 0, liquidation: 14 }
        );
    }

    #[test]
    fn test_capitalize_reserve_fund() {
        let mut engine = engine_with(vec![insolvent(0), insolvent(1)]);
        engine.capitalize_reserve_fund(10.0);
        let fund = engine.reserve_fund();
        assert_eq!(fund.initial_reserve_fund, 200.0);
        assert_eq!(fund.reserve_fund, 200.0);
        assert_eq!(fund.percentage_remaining(), 100.0);
    }

    #[test]
    fn test_liquidated_vaults_never_readmitted() {
        let mut engine = engine_with(vec![at_hf(0, 90.0)]);
        engine.admit_to_queues();
        engine.drain_liquidations(1);
        engine.set_price(0.01);
        assert_eq!(engine.admit_to_queues(), 0);
        assert_eq!(engine.liquidation_queue_size(), 0);
        assert_eq!(engine.recovery_queue_size(), 0);
    }
}
