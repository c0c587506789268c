//! Domain-level error taxonomies (§7 Error Handling Design).

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StalenessError {
    #[error("unknown symbol/feed pair: {0}")]
    UnknownFeed(String),
}

#[derive(Debug, Error)]
pub enum SizingError {
    #[error("entry and stop-loss are equal or invalid: entry={entry} sl={sl}")]
    InvalidSizing { entry: String, sl: String },
    #[error("computed size is non-positive")]
    NonPositiveSize,
}

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("campaign {campaign_id} position {position_id} requires manual reconciliation: {reason}")]
    ManualReconciliationRequired {
        campaign_id: Uuid,
        position_id: Uuid,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("campaign {0} is not active")]
    NotActive(Uuid),
    #[error("circuit breaker refused open for {symbol}: {reason}")]
    BreakerRefusal { symbol: String, reason: String },
    #[error("staleness refusal for {symbol}: level={level}")]
    StalenessRefusal { symbol: String, level: String },
    #[error(transparent)]
    Sizing(#[from] SizingError),
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
