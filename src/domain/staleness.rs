//! Staleness guard domain types (§4.B).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StalenessLevel {
    Fresh,
    Warn,
    Hard,
    Kill,
    Quarantine,
}

impl StalenessLevel {
    /// Thresholds in seconds since last update (§4.B).
    pub const WARN_SECS: i64 = 4;
    pub const HARD_SECS: i64 = 12;
    pub const KILL_SECS: i64 = 60;
    pub const QUARANTINE_SECS: i64 = 300;

    pub fn classify(seconds_since_update: i64) -> Self {
        if seconds_since_update >= Self::QUARANTINE_SECS {
            StalenessLevel::Quarantine
        } else if seconds_since_update >= Self::KILL_SECS {
            StalenessLevel::Kill
        } else if seconds_since_update >= Self::HARD_SECS {
            StalenessLevel::Hard
        } else if seconds_since_update >= Self::WARN_SECS {
            StalenessLevel::Warn
        } else {
            StalenessLevel::Fresh
        }
    }

    pub fn blocks_new_opens(self) -> bool {
        matches!(
            self,
            StalenessLevel::Warn | StalenessLevel::Hard | StalenessLevel::Kill | StalenessLevel::Quarantine
        )
    }

    pub fn zeros_signals(self) -> bool {
        matches!(self, StalenessLevel::Hard | StalenessLevel::Kill | StalenessLevel::Quarantine)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedType {
    Tick,
    L1,
    L2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalenessState {
    pub exchange: String,
    pub symbol: String,
    pub feed: FeedType,
    pub last_update_ts: DateTime<Utc>,
    pub level: StalenessLevel,
    /// Continuous seconds spent at level >= Hard, used to derive Quarantine.
    pub hard_streak_secs: i64,
}

impl StalenessState {
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>, feed: FeedType, now: DateTime<Utc>) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            feed,
            last_update_ts: now,
            level: StalenessLevel::Fresh,
            hard_streak_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalenessEvent {
    pub exchange: String,
    pub symbol: Option<String>,
    pub feed: Option<String>,
    pub staleness_seconds: i64,
    pub severity: StalenessLevel,
    pub action_taken: String,
    pub ts: DateTime<Utc>,
}
