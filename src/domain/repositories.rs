//! Repository port traits. Grounded on the teacher's `domain/repositories.rs`
//! `TradeRepository`/`PortfolioRepository` pattern, generalized to every
//! durable entity this core persists (§6, §9.8).

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::audit::AuditRecord;
use crate::domain::breaker::CircuitBreakerEvent;
use crate::domain::campaign::{Campaign, CampaignOrder, CampaignPosition, CampaignRiskState};
use crate::domain::signal::{Signal, SignalConfig};
use crate::domain::staleness::StalenessEvent;
use crate::domain::types::{Bar, BarPeriod};
use crate::domain::vre::VreDecision;

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn save(&self, campaign: &Campaign) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Campaign>>;
    async fn list_active(&self) -> Result<Vec<Campaign>>;
}

#[async_trait]
pub trait CampaignRiskStateRepository: Send + Sync {
    async fn save(&self, state: &CampaignRiskState) -> Result<()>;
    async fn get(&self, campaign_id: Uuid) -> Result<Option<CampaignRiskState>>;
}

#[async_trait]
pub trait CampaignPositionRepository: Send + Sync {
    async fn save(&self, position: &CampaignPosition) -> Result<()>;
    async fn get_open(&self, campaign_id: Uuid) -> Result<Vec<CampaignPosition>>;
}

#[async_trait]
pub trait CampaignOrderRepository: Send + Sync {
    async fn save(&self, order: &CampaignOrder) -> Result<()>;
    async fn find_by_internal_id(&self, internal_order_id: Uuid) -> Result<Option<CampaignOrder>>;
    async fn find_by_oco_group(&self, oco_group_id: Uuid) -> Result<Vec<CampaignOrder>>;
}

#[async_trait]
pub trait BarRepository: Send + Sync {
    async fn save(&self, bar: &Bar) -> Result<()>;
    async fn get_range(&self, symbol: &str, period: BarPeriod, start_ts: DateTime<Utc>, end_ts: DateTime<Utc>) -> Result<Vec<Bar>>;
}

#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn save(&self, signal: &Signal) -> Result<()>;
    async fn find_pending(&self, portfolio_id: Uuid, symbol: &str) -> Result<Option<Signal>>;
}

#[async_trait]
pub trait SignalConfigRepository: Send + Sync {
    async fn upsert(&self, config: &SignalConfig) -> Result<()>;
    async fn get(&self, portfolio_id: Uuid, symbol: &str) -> Result<Option<SignalConfig>>;
}

#[async_trait]
pub trait CircuitBreakerEventRepository: Send + Sync {
    async fn save(&self, event: &CircuitBreakerEvent) -> Result<()>;
}

#[async_trait]
pub trait StalenessLogRepository: Send + Sync {
    async fn save(&self, event: &StalenessEvent) -> Result<()>;
}

#[async_trait]
pub trait VreDecisionRepository: Send + Sync {
    async fn save(&self, decision: &VreDecision) -> Result<()>;
}

#[async_trait]
pub trait AuditTrailRepository: Send + Sync {
    async fn append(&self, category: &str, payload_json: String) -> Result<AuditRecord>;
    async fn tail(&self, limit: i64) -> Result<Vec<AuditRecord>>;
}
