//! Property tests for vault and engine invariants

use proptest::prelude::*;
use std::collections::HashSet;
use vault_risk_simulation::config::SimulationConfig;
use vault_risk_simulation::engine::RiskEngine;
use vault_risk_simulation::vault::{HealthFactor, QueueTag, Vault};

fn assert_queue_invariants(engine: &RiskEngine) {
    let mut seen = HashSet::new();
    for (queue, tag) in [
        (engine.liquidation_queue(), QueueTag::Liquidation),
        (engine.recovery_queue(), QueueTag::Recovery),
    ] {
        for &id in queue {
            assert!(seen.insert(id), "vault {} queued twice", id);
            let vault = engine.vault(id).unwrap();
            assert_eq!(vault.queue(), tag);
            assert!(!vault.is_liquidated(), "liquidated vault {} still queued", id);
        }
    }
    let tagged = engine
        .vaults()
        .iter()
        .filter(|v| v.queue() != QueueTag::None)
        .count();
    assert_eq!(tagged, seen.len());
}

fn population(specs: &[(f64, f64)], config: &SimulationConfig) -> Vec<Vault> {
    specs
        .iter()
        .enumerate()
        .map(|(i, &(collateral, hf))| {
            Vault::with_health_factor(i, collateral, hf, config.start_price, config.risk_params())
        })
        .collect()
}

proptest! {
    #[test]
    fn health_factor_falls_with_price(
        collateral in 1_000.0f64..1_000_000.0,
        initial_hf in 50.0f64..400.0,
        p1 in 0.0f64..2.0,
        p2 in 0.0f64..2.0,
    ) {
        let vault = Vault::with_health_factor(0, collateral, initial_hf, 1.0, SimulationConfig::default().risk_params());
        let (low, high) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };
        let hf_low = vault.health_factor(low).value().unwrap();
        let hf_high = vault.health_factor(high).value().unwrap();
        prop_assert!(hf_low <= hf_high);
    }

    #[test]
    fn liquidated_vaults_have_no_debt_at_any_price(
        collateral in 1_000.0f64..100_000.0,
        initial_hf in 67.0f64..99.0,
        price in 0.0f64..10.0,
    ) {
        let mut vault = Vault::with_health_factor(0, collateral, initial_hf, 1.0, SimulationConfig::default().risk_params());
        vault.liquidate(1.0);
        prop_assert!(vault.is_liquidated());
        prop_assert_eq!(vault.health_factor(price), HealthFactor::NoDebt);
    }

    #[test]
    fn engine_invariants_hold_every_block(
        specs in prop::collection::vec((1_000.0f64..50_000.0, 60.0f64..300.0), 1..120),
        drops in prop::collection::vec(0.90f64..1.0, 1..60),
        fund_fraction in 0.0f64..0.3,
        capacity in 1usize..20,
        recovery_budget in 0usize..8,
        recycle in any::<bool>(),
    ) {
        let config = SimulationConfig {
            recovery_throughput: recovery_budget,
            recycle_seized_collateral: recycle,
            ..SimulationConfig::default()
        };
        let mut engine = RiskEngine::with_vaults(&config, population(&specs, &config));
        engine.capitalize_reserve_fund(fund_fraction * 100.0);

        let mut price = config.start_price;
        let mut used_before = 0.0;
        for drop in drops {
            price *= drop;
            engine.set_price(price);
            engine.admit_to_queues();
            assert_queue_invariants(&engine);

            let allocation = engine.allocate_throughput(capacity);
            prop_assert_eq!(allocation.recovery + allocation.liquidation, capacity);

            // Expected fund movement from the vaults recovery may touch
            let before = engine.reserve_fund().clone();
            let snapshot: Vec<(f64, f64)> = engine
                .vaults()
                .iter()
                .map(|v| (v.debt_amount(), v.collateral_value(price)))
                .collect();

            let recovered = engine.drain_recoveries(allocation.recovery);
            let after = engine.reserve_fund().clone();

            let debt: f64 = recovered.iter().map(|&id| snapshot[id].0).sum();
            let seized: f64 = if recycle {
                recovered.iter().map(|&id| snapshot[id].1).sum()
            } else {
                0.0
            };
            let expected = before.reserve_fund - debt + seized;
            prop_assert!((after.reserve_fund - expected).abs() <= 1e-6 * expected.abs().max(1.0));
            prop_assert!(after.reserve_fund_used >= used_before);
            used_before = after.reserve_fund_used;
            if recovered.is_empty() {
                prop_assert_eq!(after.reserve_fund, before.reserve_fund);
            }

            let liquidated = engine.drain_liquidations(allocation.liquidation);
            prop_assert!(recovered.len() + liquidated.len() <= capacity);
            assert_queue_invariants(&engine);

            for id in recovered.iter().chain(liquidated.iter()) {
                prop_assert!(engine.vault(*id).unwrap().is_liquidated());
            }
        }
    }
}
