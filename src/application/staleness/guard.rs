//! Staleness Guard (§4.B). Evaluated at >= 1 Hz over every tracked
//! (symbol, feed) pair. Grounded on the teacher's `infrastructure::core::circuit_breaker`
//! state-machine idiom (Closed/Open/HalfOpen), adapted to the five-level
//! staleness ladder instead of a binary breaker.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::repositories::StalenessLogRepository;
use crate::domain::staleness::{FeedType, StalenessEvent, StalenessLevel, StalenessState};

pub struct StalenessGuard {
    states: RwLock<HashMap<(String, FeedType), StalenessState>>,
    log_repo: Arc<dyn StalenessLogRepository>,
    quarantine_secs: i64,
}

impl StalenessGuard {
    pub fn new(log_repo: Arc<dyn StalenessLogRepository>) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            log_repo,
            quarantine_secs: StalenessLevel::QUARANTINE_SECS,
        }
    }

    pub async fn record_update(&self, exchange: &str, symbol: &str, feed: FeedType) {
        let mut states = self.states.write().await;
        let key = (symbol.to_string(), feed.clone());
        let now = Utc::now();
        let entry = states
            .entry(key)
            .or_insert_with(|| StalenessState::new(exchange, symbol, feed, now));
        let was_quarantined = entry.level == StalenessLevel::Quarantine;
        entry.last_update_ts = now;
        entry.level = StalenessLevel::Fresh;
        entry.hard_streak_secs = 0;
        if was_quarantined {
            info!(symbol, "staleness guard: quarantine exit on fresh tick");
        }
    }

    /// Re-evaluates every tracked feed against the current wall clock; called
    /// on a >= 1 Hz ticker. Returns the events that should be logged/published.
    pub async fn evaluate_all(&self, tick_interval_secs: i64) -> Vec<StalenessEvent> {
        let mut states = self.states.write().await;
        let now = Utc::now();
        let mut events = Vec::new();

        for state in states.values_mut() {
            let elapsed = (now - state.last_update_ts).num_seconds();
            let previous = state.level;
            let raw = StalenessLevel::classify(elapsed);

            let new_level = if previous == StalenessLevel::Quarantine {
                // Quarantine only clears via record_update (a fresh tick), never via
                // elapsed-time decay (§4.B: requires exactly one fresh tick).
                StalenessLevel::Quarantine
            } else if raw >= StalenessLevel::Hard {
                state.hard_streak_secs += tick_interval_secs;
                if state.hard_streak_secs >= self.quarantine_secs {
                    StalenessLevel::Quarantine
                } else {
                    raw
                }
            } else {
                state.hard_streak_secs = 0;
                raw
            };

            if new_level != previous {
                let action = match new_level {
                    StalenessLevel::Warn => "blocked_new_opens",
                    StalenessLevel::Hard => "zeroed_signals",
                    StalenessLevel::Kill => "global_pause_candidate",
                    StalenessLevel::Quarantine => "quarantined",
                    StalenessLevel::Fresh => "resumed",
                };
                warn!(symbol = %state.symbol, from = ?previous, to = ?new_level, "staleness level change");
                events.push(StalenessEvent {
                    exchange: state.exchange.clone(),
                    symbol: Some(state.symbol.clone()),
                    feed: None,
                    staleness_seconds: elapsed,
                    severity: new_level,
                    action_taken: action.to_string(),
                    ts: now,
                });
            }
            state.level = new_level;
        }

        for event in &events {
            let _ = self.log_repo.save(event).await;
        }

        events
    }

    pub async fn level_for(&self, symbol: &str, feed: FeedType) -> StalenessLevel {
        self.states
            .read()
            .await
            .get(&(symbol.to_string(), feed))
            .map(|s| s.level)
            .unwrap_or(StalenessLevel::Kill) // unseen symbols are treated as unsafe to trade
    }

    /// Global KILL aggregation (§4.B): true only if every *non-quarantined*
    /// tracked symbol is at KILL or worse.
    pub async fn is_global_kill(&self) -> bool {
        let states = self.states.read().await;
        let relevant: Vec<&StalenessState> = states
            .values()
            .filter(|s| s.level != StalenessLevel::Quarantine)
            .collect();
        !relevant.is_empty() && relevant.iter().all(|s| s.level >= StalenessLevel::Kill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullLog;
    #[async_trait::async_trait]
    impl StalenessLogRepository for NullLog {
        async fn save(&self, _event: &StalenessEvent) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fresh_tick_resets_level() {
        let guard = StalenessGuard::new(Arc::new(NullLog));
        guard.record_update("test", "BTC/USD", FeedType::Tick).await;
        assert_eq!(guard.level_for("BTC/USD", FeedType::Tick).await, StalenessLevel::Fresh);
    }

    #[test]
    fn classify_boundaries() {
        assert_eq!(StalenessLevel::classify(3), StalenessLevel::Fresh);
        assert_eq!(StalenessLevel::classify(4), StalenessLevel::Warn);
        assert_eq!(StalenessLevel::classify(12), StalenessLevel::Hard);
        assert_eq!(StalenessLevel::classify(60), StalenessLevel::Kill);
        assert_eq!(StalenessLevel::classify(300), StalenessLevel::Quarantine);
    }
}
