//! Circuit breaker domain types (§4.D). A tagged-variant `BreakerKey` stands in
//! for separate Asset/Cluster/Global breaker classes, evaluated through one
//! common `Evaluate(metrics)` capability in the application layer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakerKey {
    Asset { portfolio_id: Uuid, symbol: String },
    Cluster { portfolio_id: Uuid, cluster: String },
    Global { portfolio_id: Uuid },
}

impl BreakerKey {
    pub fn level_name(&self) -> &'static str {
        match self {
            BreakerKey::Asset { .. } => "asset",
            BreakerKey::Cluster { .. } => "cluster",
            BreakerKey::Global { .. } => "global",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub consecutive_losses: u32,
    pub cumulative_loss_usd: Decimal,
    pub cluster_loss_pct: Decimal,
    pub daily_pnl_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerState {
    pub key: BreakerKey,
    pub triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub auto_reset_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub metrics: BreakerMetrics,
}

impl BreakerState {
    pub fn fresh(key: BreakerKey) -> Self {
        Self {
            key,
            triggered: false,
            triggered_at: None,
            auto_reset_at: None,
            reason: None,
            metrics: BreakerMetrics::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerEventType {
    Triggered,
    Reset,
    AutoReset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerEvent {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub breaker_level: String,
    pub event_type: BreakerEventType,
    pub symbol: Option<String>,
    pub cluster: Option<String>,
    pub reason: String,
    pub metadata_json: String,
    pub ts: DateTime<Utc>,
}

/// Default thresholds (§4.D); overridable via `RiskEnvConfig`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerThresholds {
    pub asset_consecutive_losses: u32,
    pub asset_cumulative_loss_usd: Decimal,
    pub cluster_loss_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub asset_auto_reset_hours: i64,
    pub cluster_auto_reset_hours: i64,
}

impl Default for BreakerThresholds {
    fn default() -> Self {
        Self {
            asset_consecutive_losses: 3,
            asset_cumulative_loss_usd: Decimal::from(500),
            cluster_loss_pct: Decimal::new(15, 2),
            max_daily_loss_pct: Decimal::new(5, 2),
            asset_auto_reset_hours: 24,
            cluster_auto_reset_hours: 12,
        }
    }
}
