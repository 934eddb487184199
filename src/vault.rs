//! Vault state model
//!
//! A vault holds one borrower's collateral (a quantity of the collateral
//! asset) and debt (currency). Debt is fixed at creation and only ever
//! zeroed, so every state change is a liquidation.

use rand::prelude::*;
use rand_distr::{Distribution, LogNormal, Normal};
use serde::{Deserialize, Serialize};

use crate::config::{RiskParams, SimulationConfig, MIN_COLLATERAL_AMOUNT};

/// Health factor of a position. A position without debt cannot be
/// liquidated and has no finite health factor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum HealthFactor {
    Finite(f64),
    NoDebt,
}

impl HealthFactor {
    /// True only for finite health factors strictly below `threshold`.
    pub fn is_below(&self, threshold: f64) -> bool {
        match self {
            Self::Finite(hf) => *hf < threshold,
            Self::NoDebt => false,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Finite(hf) => Some(*hf),
            Self::NoDebt => None,
        }
    }
}

/// Maximum debt a given collateral value supports.
pub fn max_allowed_debt(collateral_value: f64, collateralisation_ratio: f64) -> f64 {
    collateral_value / collateralisation_ratio * 100.0
}

/// Health factor formula shared by vaults and protocol-wide aggregates.
pub fn health_factor(
    collateral_amount: f64,
    debt_amount: f64,
    price: f64,
    collateralisation_ratio: f64,
) -> HealthFactor {
    if debt_amount == 0.0 {
        return HealthFactor::NoDebt;
    }
    let max_debt = max_allowed_debt(collateral_amount * price, collateralisation_ratio);
    HealthFactor::Finite(max_debt / debt_amount * 100.0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VaultStatus {
    Healthy,
    AtRisk,
    Liquidatable,
    Insolvent,
    Liquidated,
}

impl VaultStatus {
    pub fn all() -> [Self; 5] {
        [
            Self::Healthy,
            Self::AtRisk,
            Self::Liquidatable,
            Self::Insolvent,
            Self::Liquidated,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::AtRisk => "AT RISK",
            Self::Liquidatable => "LIQUIDATABLE",
            Self::Insolvent => "INSOLVENT",
            Self::Liquidated => "LIQUIDATED",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiquidationOutcome {
    Liquidated,
    NotLiquidatable,
    AlreadyLiquidated,
}

/// Which engine queue, if any, currently holds the vault.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueTag {
    #[default]
    None,
    Liquidation,
    Recovery,
}

#[derive(Clone, Debug)]
pub struct Vault {
    pub id: usize,
    collateral_amount: f64,
    debt_amount: f64,
    initial_health_factor: f64,
    pub(crate) queue: QueueTag,
    params: RiskParams,
}

impl Vault {
    /// Build a vault from explicit amounts. The initial health factor is
    /// measured at `price`.
    pub fn new(
        id: usize,
        collateral_amount: f64,
        debt_amount: f64,
        price: f64,
        params: RiskParams,
    ) -> Self {
        let initial_health_factor = health_factor(
            collateral_amount,
            debt_amount,
            price,
            params.collateralisation_ratio,
        )
        .value()
        .unwrap_or(f64::INFINITY);

        Self {
            id,
            collateral_amount,
            debt_amount,
            initial_health_factor,
            queue: QueueTag::None,
            params,
        }
    }

    /// Build a vault whose debt gives it `initial_health_factor` at `price`.
    pub fn with_health_factor(
        id: usize,
        collateral_amount: f64,
        initial_health_factor: f64,
        price: f64,
        params: RiskParams,
    ) -> Self {
        let max_debt = max_allowed_debt(collateral_amount * price, params.collateralisation_ratio);
        let debt_amount = max_debt / (initial_health_factor / 100.0);

        Self {
            id,
            collateral_amount,
            debt_amount,
            initial_health_factor,
            queue: QueueTag::None,
            params,
        }
    }

    /// Draw collateral and initial health factor from the configured
    /// distributions and derive debt at the start price.
    pub fn sample(id: usize, config: &SimulationConfig, rng: &mut impl Rng) -> Self {
        let mean = config.mean_collateral_amount;
        let raw_collateral = Normal::new(mean, mean.abs())
            .map(|normal| normal.sample(rng))
            .unwrap_or(mean);
        let collateral_amount = raw_collateral.round().max(MIN_COLLATERAL_AMOUNT);

        let initial_health_factor = sample_health_factor(
            config.health_factor_mean,
            config.health_factor_std,
            rng,
        )
        .max(config.min_health_factor);

        Self::with_health_factor(
            id,
            collateral_amount,
            initial_health_factor,
            config.start_price,
            config.risk_params(),
        )
    }

    pub fn collateral_amount(&self) -> f64 {
        self.collateral_amount
    }

    pub fn debt_amount(&self) -> f64 {
        self.debt_amount
    }

    pub fn initial_health_factor(&self) -> f64 {
        self.initial_health_factor
    }

    pub fn queue(&self) -> QueueTag {
        self.queue
    }

    pub fn is_liquidated(&self) -> bool {
        self.collateral_amount == 0.0
    }

    pub fn collateral_value(&self, price: f64) -> f64 {
        self.collateral_amount * price
    }

    pub fn health_factor(&self, price: f64) -> HealthFactor {
        health_factor(
            self.collateral_amount,
            self.debt_amount,
            price,
            self.params.collateralisation_ratio,
        )
    }

    pub fn status(&self, price: f64) -> VaultStatus {
        if self.is_liquidated() {
            return VaultStatus::Liquidated;
        }
        classify(self.health_factor(price), &self.params)
    }

    /// Seize the whole position if it is below the liquidation threshold.
    pub fn liquidate(&mut self, price: f64) -> LiquidationOutcome {
        if self.is_liquidated() {
            return LiquidationOutcome::AlreadyLiquidated;
        }
        if !self
            .health_factor(price)
            .is_below(self.params.liquidation_threshold)
        {
            return LiquidationOutcome::NotLiquidatable;
        }
        self.collateral_amount = 0.0;
        self.debt_amount = 0.0;
        self.queue = QueueTag::None;
        LiquidationOutcome::Liquidated
    }
}

/// Classify an open position by health factor.
pub fn classify(hf: HealthFactor, params: &RiskParams) -> VaultStatus {
    match hf {
        HealthFactor::NoDebt => VaultStatus::Healthy,
        HealthFactor::Finite(v) if v >= params.healthy_threshold => VaultStatus::Healthy,
        HealthFactor::Finite(v) if v >= params.liquidation_threshold => VaultStatus::AtRisk,
        HealthFactor::Finite(v) if v >= params.insolvency_threshold => VaultStatus::Liquidatable,
        HealthFactor::Finite(_) => VaultStatus::Insolvent,
    }
}

/// Log-normal draw whose resulting mean and std match the arguments.
fn sample_health_factor(mean: f64, std: f64, rng: &mut impl Rng) -> f64 {
    if mean.is_nan() || mean <= 0.0 {
        return mean;
    }
    let sigma_sq = (1.0 + (std / mean).powi(2)).ln();
    let mu = mean.ln() - sigma_sq / 2.0;
    LogNormal::new(mu, sigma_sq.sqrt())
        .map(|dist| dist.sample(rng))
        .unwrap_or(mean)
}
