//! Circuit Breaker Service (§4.D). A process-singleton shared by every
//! campaign. Generalizes the teacher's two separate breaker concepts —
//! `application::risk_management::circuit_breaker_service::HaltLevel`
//! (trading-loss escalation) and `infrastructure::core::circuit_breaker`
//! (generic Closed/Open/HalfOpen) — into one tagged-variant `BreakerKey` over
//! a common `evaluate(metrics)` capability, per the Design Notes' explicit
//! guidance (§9: "tagged variant over a common Evaluate(metrics) capability
//! rather than inheritance").

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::staleness::StalenessGuard;
use crate::domain::breaker::{BreakerEventType, BreakerKey, BreakerMetrics, BreakerState, BreakerThresholds, CircuitBreakerEvent};
use crate::domain::repositories::CircuitBreakerEventRepository;
use crate::domain::staleness::{FeedType, StalenessLevel};

pub struct CircuitBreakerService {
    thresholds: BreakerThresholds,
    states: RwLock<HashMap<BreakerKey, BreakerState>>,
    event_repo: Arc<dyn CircuitBreakerEventRepository>,
    staleness: Arc<StalenessGuard>,
}

impl CircuitBreakerService {
    pub fn new(thresholds: BreakerThresholds, event_repo: Arc<dyn CircuitBreakerEventRepository>, staleness: Arc<StalenessGuard>) -> Self {
        Self {
            thresholds,
            states: RwLock::new(HashMap::new()),
            event_repo,
            staleness,
        }
    }

    async fn emit(&self, key: &BreakerKey, portfolio_id: Uuid, event_type: BreakerEventType, reason: String) {
        let (symbol, cluster) = match key {
            BreakerKey::Asset { symbol, .. } => (Some(symbol.clone()), None),
            BreakerKey::Cluster { cluster, .. } => (None, Some(cluster.clone())),
            BreakerKey::Global { .. } => (None, None),
        };
        let event = CircuitBreakerEvent {
            id: Uuid::new_v4(),
            portfolio_id,
            breaker_level: key.level_name().to_string(),
            event_type,
            symbol,
            cluster,
            reason,
            metadata_json: "{}".to_string(),
            ts: Utc::now(),
        };
        let _ = self.event_repo.save(&event).await;
    }

    /// The common tagged-variant evaluation capability. Returns `Some(reason)`
    /// if the metrics cross this breaker's trigger threshold.
    fn evaluate(&self, key: &BreakerKey, metrics: &BreakerMetrics) -> Option<String> {
        match key {
            BreakerKey::Asset { .. } => {
                if metrics.consecutive_losses >= self.thresholds.asset_consecutive_losses {
                    return Some(format!(
                        "consecutive_losses={} >= limit={}",
                        metrics.consecutive_losses, self.thresholds.asset_consecutive_losses
                    ));
                }
                if metrics.cumulative_loss_usd >= self.thresholds.asset_cumulative_loss_usd {
                    return Some(format!(
                        "cumulative_loss_usd={} >= limit={}",
                        metrics.cumulative_loss_usd, self.thresholds.asset_cumulative_loss_usd
                    ));
                }
                None
            }
            BreakerKey::Cluster { .. } => {
                if metrics.cluster_loss_pct >= self.thresholds.cluster_loss_pct {
                    Some(format!(
                        "cluster_loss_pct={} >= limit={}",
                        metrics.cluster_loss_pct, self.thresholds.cluster_loss_pct
                    ))
                } else {
                    None
                }
            }
            BreakerKey::Global { .. } => {
                if metrics.daily_pnl_pct <= -self.thresholds.max_daily_loss_pct {
                    Some(format!(
                        "daily_pnl_pct={} <= -max_daily_loss_pct={}",
                        metrics.daily_pnl_pct, self.thresholds.max_daily_loss_pct
                    ))
                } else {
                    None
                }
            }
        }
    }

    fn auto_reset_delay(&self, key: &BreakerKey) -> chrono::Duration {
        match key {
            BreakerKey::Asset { .. } => chrono::Duration::hours(self.thresholds.asset_auto_reset_hours),
            BreakerKey::Cluster { .. } => chrono::Duration::hours(self.thresholds.cluster_auto_reset_hours),
            BreakerKey::Global { .. } => {
                // Resets at the start of the next UTC day (§4.D).
                let now = Utc::now();
                let tomorrow = (now.date_naive() + chrono::Duration::days(1)).and_hms_opt(0, 0, 0).unwrap();
                chrono::DateTime::<Utc>::from_naive_utc_and_offset(tomorrow, Utc) - now
            }
        }
    }

    /// Records a realized trade outcome against its asset/cluster breakers and
    /// may trigger them.
    pub async fn record_trade(&self, portfolio_id: Uuid, symbol: &str, realized_pnl: Decimal, cluster: Option<&str>) {
        let asset_key = BreakerKey::Asset { portfolio_id, symbol: symbol.to_string() };
        let mut states = self.states.write().await;
        let asset_state = states.entry(asset_key.clone()).or_insert_with(|| BreakerState::fresh(asset_key.clone()));
        if realized_pnl < Decimal::ZERO {
            asset_state.metrics.consecutive_losses += 1;
            asset_state.metrics.cumulative_loss_usd += -realized_pnl;
        } else {
            asset_state.metrics.consecutive_losses = 0;
        }

        if !asset_state.triggered
            && let Some(reason) = self.evaluate(&asset_key, &asset_state.metrics)
        {
            asset_state.triggered = true;
            asset_state.triggered_at = Some(Utc::now());
            asset_state.reason = Some(reason.clone());
            asset_state.auto_reset_at = Some(Utc::now() + self.auto_reset_delay(&asset_key));
            warn!(symbol, reason, "asset circuit breaker triggered");
            drop(states);
            self.emit(&asset_key, portfolio_id, BreakerEventType::Triggered, reason).await;
            states = self.states.write().await;
        }

        if let Some(cluster) = cluster {
            let cluster_key = BreakerKey::Cluster { portfolio_id, cluster: cluster.to_string() };
            let cluster_state = states.entry(cluster_key.clone()).or_insert_with(|| BreakerState::fresh(cluster_key.clone()));
            if realized_pnl < Decimal::ZERO {
                cluster_state.metrics.cluster_loss_pct += Decimal::new(1, 2); // coarse per-loss increment; refined by portfolio valuation upstream
            }
            if !cluster_state.triggered
                && let Some(reason) = self.evaluate(&cluster_key, &cluster_state.metrics)
            {
                cluster_state.triggered = true;
                cluster_state.triggered_at = Some(Utc::now());
                cluster_state.reason = Some(reason.clone());
                cluster_state.auto_reset_at = Some(Utc::now() + self.auto_reset_delay(&cluster_key));
                drop(states);
                self.emit(&cluster_key, portfolio_id, BreakerEventType::Triggered, reason).await;
            }
        }
    }

    pub async fn record_daily_pnl_pct(&self, portfolio_id: Uuid, daily_pnl_pct: Decimal) {
        let key = BreakerKey::Global { portfolio_id };
        let mut states = self.states.write().await;
        let state = states.entry(key.clone()).or_insert_with(|| BreakerState::fresh(key.clone()));
        state.metrics.daily_pnl_pct = daily_pnl_pct;
        if !state.triggered
            && let Some(reason) = self.evaluate(&key, &state.metrics)
        {
            state.triggered = true;
            state.triggered_at = Some(Utc::now());
            state.reason = Some(reason.clone());
            state.auto_reset_at = Some(Utc::now() + self.auto_reset_delay(&key));
            drop(states);
            self.emit(&key, portfolio_id, BreakerEventType::Triggered, reason).await;
        }
    }

    /// The single unified gate used before every position open (§4.D contract).
    pub async fn can_open(&self, portfolio_id: Uuid, symbol: &str, cluster: Option<&str>) -> (bool, Option<String>) {
        if self.staleness.level_for(symbol, FeedType::Tick).await.blocks_new_opens() {
            return (false, Some("staleness guard blocks new opens".to_string()));
        }
        if self.staleness.is_global_kill().await {
            return (false, Some("global staleness KILL pause".to_string()));
        }

        let states = self.states.read().await;
        if let Some(s) = states.get(&BreakerKey::Asset { portfolio_id, symbol: symbol.to_string() })
            && s.triggered
        {
            return (false, s.reason.clone());
        }
        if let Some(cluster) = cluster
            && let Some(s) = states.get(&BreakerKey::Cluster { portfolio_id, cluster: cluster.to_string() })
            && s.triggered
        {
            return (false, s.reason.clone());
        }
        if let Some(s) = states.get(&BreakerKey::Global { portfolio_id })
            && s.triggered
        {
            return (false, s.reason.clone());
        }
        (true, None)
    }

    pub async fn reset(&self, portfolio_id: Uuid, key: BreakerKey, user_id: &str) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&key) {
            state.triggered = false;
            state.triggered_at = None;
            state.auto_reset_at = None;
            state.reason = None;
            state.metrics = BreakerMetrics::default();
        }
        drop(states);
        info!(user_id, ?key, "circuit breaker manually reset");
        self.emit(&key, portfolio_id, BreakerEventType::Reset, format!("manual reset by {user_id}")).await;
    }

    /// Auto-reset timer tick (§4.D): inspects every breaker once a minute and
    /// resets any whose `auto_reset_at` has passed.
    pub async fn run_auto_reset_tick(&self) {
        let now = Utc::now();
        let mut to_reset = Vec::new();
        {
            let states = self.states.read().await;
            for (key, state) in states.iter() {
                if state.triggered && state.auto_reset_at.is_some_and(|t| t <= now) {
                    to_reset.push(key.clone());
                }
            }
        }
        for key in to_reset {
            let portfolio_id = match &key {
                BreakerKey::Asset { portfolio_id, .. }
                | BreakerKey::Cluster { portfolio_id, .. }
                | BreakerKey::Global { portfolio_id } => *portfolio_id,
            };
            {
                let mut states = self.states.write().await;
                if let Some(state) = states.get_mut(&key) {
                    state.triggered = false;
                    state.triggered_at = None;
                    state.auto_reset_at = None;
                    state.reason = None;
                    state.metrics = BreakerMetrics::default();
                }
            }
            self.emit(&key, portfolio_id, BreakerEventType::AutoReset, "auto-reset timer".to_string()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullRepo;
    #[async_trait::async_trait]
    impl CircuitBreakerEventRepository for NullRepo {
        async fn save(&self, _event: &CircuitBreakerEvent) -> anyhow::Result<()> {
            Ok(())
        }
    }
    struct NullStalenessLog;
    #[async_trait::async_trait]
    impl crate::domain::repositories::StalenessLogRepository for NullStalenessLog {
        async fn save(&self, _event: &crate::domain::staleness::StalenessEvent) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn service() -> CircuitBreakerService {
        CircuitBreakerService::new(
            BreakerThresholds::default(),
            Arc::new(NullRepo),
            Arc::new(StalenessGuard::new(Arc::new(NullStalenessLog))),
        )
    }

    #[tokio::test]
    async fn consecutive_losses_trigger_asset_breaker() {
        let svc = service();
        let portfolio = Uuid::new_v4();
        for _ in 0..3 {
            svc.record_trade(portfolio, "BTC/USD", Decimal::from(-10), None).await;
        }
        let (allowed, reason) = svc.can_open(portfolio, "BTC/USD", None).await;
        assert!(!allowed);
        assert!(reason.unwrap().contains("consecutive_losses"));
    }

    #[tokio::test]
    async fn winning_trade_resets_consecutive_counter() {
        let svc = service();
        let portfolio = Uuid::new_v4();
        svc.record_trade(portfolio, "BTC/USD", Decimal::from(-10), None).await;
        svc.record_trade(portfolio, "BTC/USD", Decimal::from(10), None).await;
        let (allowed, _) = svc.can_open(portfolio, "BTC/USD", None).await;
        assert!(allowed);
    }
}
