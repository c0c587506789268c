//! Signal engine domain types (§4.E).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::types::Side;

/// Per (portfolio, symbol) configuration. UNIQUE on (portfolio_id, symbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub symbol: String,
    pub timeframe: String,
    pub long_mult: Decimal,
    pub short_mult: Decimal,
    pub tp1_mult: Decimal,
    pub tp2_mult: Decimal,
    pub sl_mult: Decimal,
    pub tp1_close_pct: Decimal,
    pub risk_per_trade_bps: u32,
    pub enabled: bool,
}

impl SignalConfig {
    pub fn default_for(portfolio_id: Uuid, symbol: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            portfolio_id,
            symbol: symbol.into(),
            timeframe: "1m".to_string(),
            long_mult: Decimal::new(20, 1),  // 2.0
            short_mult: Decimal::new(20, 1), // 2.0
            tp1_mult: Decimal::new(30, 1),   // 3.0
            tp2_mult: Decimal::new(50, 1),   // 5.0
            sl_mult: Decimal::new(10, 1),    // 1.0
            tp1_close_pct: Decimal::new(50, 2), // 0.50
            risk_per_trade_bps: 50,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Pending,
    Executed,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub ema_fast: Decimal,
    pub ema_slow: Decimal,
    pub atr: Decimal,
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub sl: Decimal,
    pub size: Decimal,
    pub risk_per_trade_bps_used: u32,
    /// Immutable clone of the `SignalConfig` active at generation time (§4.E, §9.1).
    pub config_snapshot: SignalConfig,
    pub circuit_breaker_state_snapshot: String,
    pub status: SignalStatus,
    pub execution_reason: Option<String>,
    pub expiration_reason: Option<String>,
    pub generated_at: DateTime<Utc>,
}
