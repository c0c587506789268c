//! Volatility Regime Engine domain types (§4.C).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Regime {
    Low,
    Normal,
    High,
    Extreme,
}

impl Regime {
    /// Regimes are totally ordered LOW < NORMAL < HIGH < EXTREME; only adjacent
    /// transitions are permitted by the hysteresis state machine.
    pub fn is_adjacent(self, other: Self) -> bool {
        (self as i8 - other as i8).abs() == 1
    }

    pub fn rank(self) -> i8 {
        self as i8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeMethod {
    ZScore,
    RvRatio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VreContext {
    pub symbol: String,
    pub current_regime: Regime,
    pub pending_regime: Option<Regime>,
    pub confirmations: u32,
    pub cooldown_remaining: u32,
    pub cycles_in_regime: u64,
    pub last_regime_change: Option<DateTime<Utc>>,
    /// Timestamp until which pyramiding/add-ons are blocked after an extreme spike (§4.C).
    pub spike_guard_until: Option<DateTime<Utc>>,
    /// Rolling timestamps of realized losses, for the whipsaw guard.
    pub recent_loss_ts: Vec<DateTime<Utc>>,
    pub whipsaw_blocked_until: Option<DateTime<Utc>>,
}

impl VreContext {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            current_regime: Regime::Normal,
            pending_regime: None,
            confirmations: 0,
            cooldown_remaining: 0,
            cycles_in_regime: 0,
            last_regime_change: None,
            spike_guard_until: None,
            recent_loss_ts: Vec::new(),
            whipsaw_blocked_until: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VreDecision {
    pub symbol: String,
    pub regime: Regime,
    pub raw_regime: Regime,
    pub method: RegimeMethod,
    pub z_score: Option<f64>,
    pub rv_ratio: Option<f64>,
    pub rv_short: f64,
    pub rv_long: f64,
    pub confidence: f64,
    pub blocked_by_cooldown: bool,
    pub blocked_by_hysteresis: bool,
    pub decision_hash: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvestorProfile {
    Conservative,
    Moderate,
    Aggressive,
    SuperAggressive,
    Franchise,
}

impl InvestorProfile {
    pub fn allows_regime(self, regime: Regime) -> bool {
        match self {
            InvestorProfile::Conservative => matches!(regime, Regime::Low | Regime::Normal),
            InvestorProfile::Moderate => !matches!(regime, Regime::Extreme),
            _ => true,
        }
    }

    pub fn allows_pyramiding(self, regime: Regime) -> bool {
        match self {
            InvestorProfile::SuperAggressive | InvestorProfile::Franchise => {
                matches!(regime, Regime::High | Regime::Extreme)
            }
            _ => false,
        }
    }

    /// Position size multiplier by regime (§4.C table). Returned as an exact
    /// `Decimal` rather than `f64` so position sizing never loses precision
    /// through a binary-float round trip (§9 Design Notes: exact decimal for
    /// anything persisted/financial).
    pub fn size_multiplier(self, regime: Regime) -> Decimal {
        match (self, regime) {
            (InvestorProfile::Conservative, _) => Decimal::new(80, 2),
            (InvestorProfile::Moderate, Regime::High) => Decimal::new(100, 2),
            (InvestorProfile::Moderate, _) => Decimal::new(90, 2),
            (InvestorProfile::Aggressive, Regime::Extreme) => Decimal::new(110, 2),
            (InvestorProfile::Aggressive, _) => Decimal::new(100, 2),
            (InvestorProfile::SuperAggressive, Regime::Extreme) => Decimal::new(125, 2),
            (InvestorProfile::SuperAggressive, _) => Decimal::new(110, 2),
            (InvestorProfile::Franchise, _) => Decimal::new(125, 2),
        }
    }

    pub fn max_spread_bps(self, regime: Regime) -> u32 {
        match regime {
            Regime::Low => 12,
            Regime::Normal => 10,
            Regime::High => 8,
            Regime::Extreme => 6,
        }
    }

    pub fn max_slippage_bps(self, regime: Regime) -> u32 {
        match regime {
            Regime::Low => 8,
            Regime::Normal => 6,
            Regime::High => 5,
            Regime::Extreme => 4,
        }
    }
}
