//! SQLite repository implementations, grounded on the teacher's
//! `infrastructure::persistence::repositories::{SqliteOrderRepository, SqliteCandleRepository}`
//! (raw `sqlx::query` binds, Decimal-as-TEXT, `ON CONFLICT`/`INSERT OR IGNORE`
//! idempotency).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::audit::{AuditRecord, GENESIS_HASH};
use crate::domain::breaker::{BreakerEventType, CircuitBreakerEvent};
use crate::domain::campaign::{Campaign, CampaignOrder, CampaignPosition, CampaignRiskState};
use crate::domain::repositories::*;
use crate::domain::signal::{Signal, SignalConfig};
use crate::domain::staleness::StalenessEvent;
use crate::domain::types::{Bar, BarPeriod};
use crate::domain::vre::VreDecision;

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

fn to_unix(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

fn period_str(p: BarPeriod) -> &'static str {
    match p {
        BarPeriod::OneSecond => "1s",
        BarPeriod::OneMinute => "1m",
        BarPeriod::OneHour => "1h",
    }
}

fn period_from_str(s: &str) -> BarPeriod {
    match s {
        "1s" => BarPeriod::OneSecond,
        "1h" => BarPeriod::OneHour,
        _ => BarPeriod::OneMinute,
    }
}

pub struct SqliteCampaignRepository {
    pool: SqlitePool,
}

impl SqliteCampaignRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for SqliteCampaignRepository {
    async fn save(&self, campaign: &Campaign) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (id, portfolio_id, investor_profile, start_date, end_date, initial_capital, current_equity, status, risk_config_json, selection_config_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET current_equity = excluded.current_equity, status = excluded.status
            "#,
        )
        .bind(campaign.id.to_string())
        .bind(campaign.portfolio_id.to_string())
        .bind(format!("{:?}", campaign.investor_profile))
        .bind(to_unix(campaign.start_date))
        .bind(to_unix(campaign.end_date))
        .bind(campaign.initial_capital.to_string())
        .bind(campaign.current_equity.to_string())
        .bind(format!("{:?}", campaign.status))
        .bind(serde_json::to_string(&campaign.risk_config)?)
        .bind(serde_json::to_string(&campaign.selection_config)?)
        .execute(&self.pool)
        .await
        .context("failed to save campaign")?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Campaign>> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_campaign).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Campaign>> {
        let rows = sqlx::query("SELECT * FROM campaigns WHERE status = 'Active'").fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_campaign).collect()
    }
}

fn row_to_campaign(row: sqlx::sqlite::SqliteRow) -> Result<Campaign> {
    let risk_config_json: String = row.try_get("risk_config_json")?;
    let selection_config_json: String = row.try_get("selection_config_json")?;
    let status_str: String = row.try_get("status")?;
    let profile_str: String = row.try_get("investor_profile")?;
    Ok(Campaign {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
        portfolio_id: Uuid::parse_str(&row.try_get::<String, _>("portfolio_id")?)?,
        investor_profile: parse_investor_profile(&profile_str),
        start_date: from_unix(row.try_get("start_date")?),
        end_date: from_unix(row.try_get("end_date")?),
        initial_capital: parse_decimal(&row.try_get::<String, _>("initial_capital")?),
        current_equity: parse_decimal(&row.try_get::<String, _>("current_equity")?),
        status: parse_campaign_status(&status_str),
        risk_config: serde_json::from_str(&risk_config_json)?,
        selection_config: serde_json::from_str(&selection_config_json)?,
    })
}

fn parse_investor_profile(s: &str) -> crate::domain::vre::InvestorProfile {
    use crate::domain::vre::InvestorProfile::*;
    match s {
        "Conservative" => Conservative,
        "Aggressive" => Aggressive,
        "SuperAggressive" => SuperAggressive,
        "Franchise" => Franchise,
        _ => Moderate,
    }
}

fn parse_campaign_status(s: &str) -> crate::domain::campaign::CampaignStatus {
    use crate::domain::campaign::CampaignStatus::*;
    match s {
        "Paused" => Paused,
        "Completed" => Completed,
        "Stopped" => Stopped,
        _ => Active,
    }
}

pub struct SqliteCampaignRiskStateRepository {
    pool: SqlitePool,
}

impl SqliteCampaignRiskStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRiskStateRepository for SqliteCampaignRiskStateRepository {
    async fn save(&self, state: &CampaignRiskState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaign_risk_state (campaign_id, current_equity, equity_high_watermark, daily_pnl, daily_loss_pct, current_dd_pct, state_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(campaign_id) DO UPDATE SET
                current_equity = excluded.current_equity,
                equity_high_watermark = excluded.equity_high_watermark,
                daily_pnl = excluded.daily_pnl,
                daily_loss_pct = excluded.daily_loss_pct,
                current_dd_pct = excluded.current_dd_pct,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(state.campaign_id.to_string())
        .bind(state.current_equity.to_string())
        .bind(state.equity_high_watermark.to_string())
        .bind(state.daily_pnl.to_string())
        .bind(state.daily_loss_pct.to_string())
        .bind(state.current_dd_pct.to_string())
        .bind(serde_json::to_string(state)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("failed to save campaign risk state")?;
        Ok(())
    }

    async fn get(&self, campaign_id: Uuid) -> Result<Option<CampaignRiskState>> {
        let row = sqlx::query("SELECT state_json FROM campaign_risk_state WHERE campaign_id = ?")
            .bind(campaign_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => {
                let json: String = r.try_get("state_json")?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }
}

pub struct SqliteCampaignPositionRepository {
    pool: SqlitePool,
}

impl SqliteCampaignPositionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignPositionRepository for SqliteCampaignPositionRepository {
    async fn save(&self, position: &CampaignPosition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaign_positions (id, campaign_id, symbol, side, quantity, entry_price, stop_loss, take_profit, atr_at_entry, risk_amount, state, close_reason, opened_at, closed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET state = excluded.state, close_reason = excluded.close_reason, closed_at = excluded.closed_at
            "#,
        )
        .bind(position.id.to_string())
        .bind(position.campaign_id.to_string())
        .bind(&position.symbol)
        .bind(format!("{:?}", position.side))
        .bind(position.quantity.to_string())
        .bind(position.entry_price.to_string())
        .bind(position.stop_loss.to_string())
        .bind(position.take_profit.to_string())
        .bind(position.atr_at_entry.to_string())
        .bind(position.risk_amount.to_string())
        .bind(format!("{:?}", position.state))
        .bind(position.close_reason.map(|r| format!("{r:?}")))
        .bind(to_unix(position.opened_at))
        .bind(position.closed_at.map(to_unix))
        .execute(&self.pool)
        .await
        .context("failed to save campaign position")?;
        Ok(())
    }

    async fn get_open(&self, campaign_id: Uuid) -> Result<Vec<CampaignPosition>> {
        let rows = sqlx::query("SELECT * FROM campaign_positions WHERE campaign_id = ? AND state != 'Closed'")
            .bind(campaign_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_position).collect()
    }
}

fn row_to_position(row: sqlx::sqlite::SqliteRow) -> Result<CampaignPosition> {
    use crate::domain::campaign::{CloseReason, PositionState};
    use crate::domain::types::Side;
    let side_str: String = row.try_get("side")?;
    let state_str: String = row.try_get("state")?;
    let close_reason_str: Option<String> = row.try_get("close_reason")?;
    Ok(CampaignPosition {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
        campaign_id: Uuid::parse_str(&row.try_get::<String, _>("campaign_id")?)?,
        symbol: row.try_get("symbol")?,
        side: if side_str == "Short" { Side::Short } else { Side::Long },
        quantity: parse_decimal(&row.try_get::<String, _>("quantity")?),
        entry_price: parse_decimal(&row.try_get::<String, _>("entry_price")?),
        stop_loss: parse_decimal(&row.try_get::<String, _>("stop_loss")?),
        take_profit: parse_decimal(&row.try_get::<String, _>("take_profit")?),
        atr_at_entry: parse_decimal(&row.try_get::<String, _>("atr_at_entry")?),
        risk_amount: parse_decimal(&row.try_get::<String, _>("risk_amount")?),
        state: match state_str.as_str() {
            "Closing" => PositionState::Closing,
            "Closed" => PositionState::Closed,
            _ => PositionState::Open,
        },
        close_reason: close_reason_str.map(|s| match s.as_str() {
            "SlHit" => CloseReason::SlHit,
            "TpHit" => CloseReason::TpHit,
            "SignalExit" => CloseReason::SignalExit,
            "RebalanceExit" => CloseReason::RebalanceExit,
            "BreakerExit" => CloseReason::BreakerExit,
            _ => CloseReason::Manual,
        }),
        opened_at: from_unix(row.try_get("opened_at")?),
        closed_at: row.try_get::<Option<i64>, _>("closed_at")?.map(from_unix),
    })
}

pub struct SqliteCampaignOrderRepository {
    pool: SqlitePool,
}

impl SqliteCampaignOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignOrderRepository for SqliteCampaignOrderRepository {
    async fn save(&self, order: &CampaignOrder) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaign_orders (id, internal_order_id, campaign_id, position_id, symbol, side, order_type, quantity, price, stop_price, oco_group_id, status, cancel_reason, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(internal_order_id) DO UPDATE SET status = excluded.status, cancel_reason = excluded.cancel_reason, updated_at = excluded.updated_at
            "#,
        )
        .bind(order.id.to_string())
        .bind(order.internal_order_id.to_string())
        .bind(order.campaign_id.to_string())
        .bind(order.position_id.map(|p| p.to_string()))
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(order.order_type.to_string())
        .bind(order.quantity.to_string())
        .bind(order.price.map(|p| p.to_string()))
        .bind(order.stop_price.map(|p| p.to_string()))
        .bind(order.oco_group_id.map(|g| g.to_string()))
        .bind(format!("{:?}", order.status))
        .bind(&order.cancel_reason)
        .bind(to_unix(order.created_at))
        .bind(to_unix(order.updated_at))
        .execute(&self.pool)
        .await
        .context("failed to save campaign order")?;
        Ok(())
    }

    async fn find_by_internal_id(&self, internal_order_id: Uuid) -> Result<Option<CampaignOrder>> {
        let row = sqlx::query("SELECT * FROM campaign_orders WHERE internal_order_id = ?")
            .bind(internal_order_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_order).transpose()
    }

    async fn find_by_oco_group(&self, oco_group_id: Uuid) -> Result<Vec<CampaignOrder>> {
        let rows = sqlx::query("SELECT * FROM campaign_orders WHERE oco_group_id = ?")
            .bind(oco_group_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_order).collect()
    }
}

fn row_to_order(row: sqlx::sqlite::SqliteRow) -> Result<CampaignOrder> {
    use crate::domain::types::{OrderSide, OrderStatus, OrderType};
    let side_str: String = row.try_get("side")?;
    let type_str: String = row.try_get("order_type")?;
    let status_str: String = row.try_get("status")?;
    Ok(CampaignOrder {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
        internal_order_id: Uuid::parse_str(&row.try_get::<String, _>("internal_order_id")?)?,
        campaign_id: Uuid::parse_str(&row.try_get::<String, _>("campaign_id")?)?,
        position_id: row.try_get::<Option<String>, _>("position_id")?.map(|s| Uuid::parse_str(&s)).transpose()?,
        symbol: row.try_get("symbol")?,
        side: if side_str == "SELL" { OrderSide::Sell } else { OrderSide::Buy },
        order_type: match type_str.as_str() {
            "LIMIT" => OrderType::Limit,
            "STOP_LOSS" => OrderType::StopLoss,
            "TAKE_PROFIT" => OrderType::TakeProfit,
            _ => OrderType::Market,
        },
        quantity: parse_decimal(&row.try_get::<String, _>("quantity")?),
        price: row.try_get::<Option<String>, _>("price")?.map(|s| parse_decimal(&s)),
        stop_price: row.try_get::<Option<String>, _>("stop_price")?.map(|s| parse_decimal(&s)),
        oco_group_id: row.try_get::<Option<String>, _>("oco_group_id")?.map(|s| Uuid::parse_str(&s)).transpose()?,
        status: match status_str.as_str() {
            "Open" => OrderStatus::Open,
            "Filled" => OrderStatus::Filled,
            "PartiallyFilled" => OrderStatus::PartiallyFilled,
            "Cancelled" => OrderStatus::Cancelled,
            "Expired" => OrderStatus::Expired,
            "Rejected" => OrderStatus::Rejected,
            _ => OrderStatus::Pending,
        },
        cancel_reason: row.try_get("cancel_reason")?,
        created_at: from_unix(row.try_get("created_at")?),
        updated_at: from_unix(row.try_get("updated_at")?),
    })
}

pub struct SqliteBarRepository {
    pool: SqlitePool,
}

impl SqliteBarRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BarRepository for SqliteBarRepository {
    async fn save(&self, bar: &Bar) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO bars (symbol, period, bar_ts, open, high, low, close, volume, trade_count, vwap)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(bar.symbol.canonical())
        .bind(period_str(bar.period))
        .bind(to_unix(bar.bar_ts))
        .bind(bar.open.to_string())
        .bind(bar.high.to_string())
        .bind(bar.low.to_string())
        .bind(bar.close.to_string())
        .bind(bar.volume.to_string())
        .bind(bar.trade_count as i64)
        .bind(bar.vwap.to_string())
        .execute(&self.pool)
        .await
        .context("failed to save bar")?;
        Ok(())
    }

    async fn get_range(&self, symbol: &str, period: BarPeriod, start_ts: DateTime<Utc>, end_ts: DateTime<Utc>) -> Result<Vec<Bar>> {
        let rows = sqlx::query("SELECT * FROM bars WHERE symbol = ? AND period = ? AND bar_ts >= ? AND bar_ts <= ? ORDER BY bar_ts ASC")
            .bind(symbol)
            .bind(period_str(period))
            .bind(to_unix(start_ts))
            .bind(to_unix(end_ts))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let symbol_str: String = row.try_get("symbol")?;
                let (exchange, pair) = symbol_str.split_once(':').unwrap_or(("default", symbol_str.as_str()));
                Ok(Bar {
                    symbol: crate::domain::types::Symbol::new(exchange, pair),
                    period: period_from_str(&row.try_get::<String, _>("period")?),
                    bar_ts: from_unix(row.try_get("bar_ts")?),
                    open: parse_decimal(&row.try_get::<String, _>("open")?),
                    high: parse_decimal(&row.try_get::<String, _>("high")?),
                    low: parse_decimal(&row.try_get::<String, _>("low")?),
                    close: parse_decimal(&row.try_get::<String, _>("close")?),
                    volume: parse_decimal(&row.try_get::<String, _>("volume")?),
                    trade_count: row.try_get::<i64, _>("trade_count")? as u64,
                    vwap: parse_decimal(&row.try_get::<String, _>("vwap")?),
                })
            })
            .collect()
    }
}

pub struct SqliteSignalConfigRepository {
    pool: SqlitePool,
}

impl SqliteSignalConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SignalConfigRepository for SqliteSignalConfigRepository {
    async fn upsert(&self, config: &SignalConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signal_configs (id, portfolio_id, symbol, config_json)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(portfolio_id, symbol) DO UPDATE SET config_json = excluded.config_json
            "#,
        )
        .bind(config.id.to_string())
        .bind(config.portfolio_id.to_string())
        .bind(&config.symbol)
        .bind(serde_json::to_string(config)?)
        .execute(&self.pool)
        .await
        .context("failed to upsert signal config")?;
        Ok(())
    }

    async fn get(&self, portfolio_id: Uuid, symbol: &str) -> Result<Option<SignalConfig>> {
        let row = sqlx::query("SELECT config_json FROM signal_configs WHERE portfolio_id = ? AND symbol = ?")
            .bind(portfolio_id.to_string())
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(serde_json::from_str(&r.try_get::<String, _>("config_json")?)?)),
            None => Ok(None),
        }
    }
}

pub struct SqliteSignalRepository {
    pool: SqlitePool,
}

impl SqliteSignalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SignalRepository for SqliteSignalRepository {
    async fn save(&self, signal: &Signal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signals (id, portfolio_id, symbol, status, signal_json, generated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET status = excluded.status, signal_json = excluded.signal_json
            "#,
        )
        .bind(signal.id.to_string())
        .bind(signal.portfolio_id.to_string())
        .bind(&signal.symbol)
        .bind(format!("{:?}", signal.status))
        .bind(serde_json::to_string(signal)?)
        .bind(to_unix(signal.generated_at))
        .execute(&self.pool)
        .await
        .context("failed to save signal")?;
        Ok(())
    }

    async fn find_pending(&self, portfolio_id: Uuid, symbol: &str) -> Result<Option<Signal>> {
        let row = sqlx::query(
            "SELECT signal_json FROM signals WHERE portfolio_id = ? AND symbol = ? AND status = 'Pending' ORDER BY generated_at DESC LIMIT 1",
        )
        .bind(portfolio_id.to_string())
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(Some(serde_json::from_str(&r.try_get::<String, _>("signal_json")?)?)),
            None => Ok(None),
        }
    }
}

pub struct SqliteCircuitBreakerEventRepository {
    pool: SqlitePool,
}

impl SqliteCircuitBreakerEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CircuitBreakerEventRepository for SqliteCircuitBreakerEventRepository {
    async fn save(&self, event: &CircuitBreakerEvent) -> Result<()> {
        let event_type = match event.event_type {
            BreakerEventType::Triggered => "triggered",
            BreakerEventType::Reset => "reset",
            BreakerEventType::AutoReset => "auto_reset",
        };
        sqlx::query(
            r#"
            INSERT INTO circuit_breaker_events (id, portfolio_id, breaker_level, event_type, symbol, cluster, reason, metadata_json, ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.portfolio_id.to_string())
        .bind(&event.breaker_level)
        .bind(event_type)
        .bind(&event.symbol)
        .bind(&event.cluster)
        .bind(&event.reason)
        .bind(&event.metadata_json)
        .bind(to_unix(event.ts))
        .execute(&self.pool)
        .await
        .context("failed to save circuit breaker event")?;
        Ok(())
    }
}

pub struct SqliteStalenessLogRepository {
    pool: SqlitePool,
}

impl SqliteStalenessLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StalenessLogRepository for SqliteStalenessLogRepository {
    async fn save(&self, event: &StalenessEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO staleness_log (exchange, symbol, feed, staleness_seconds, severity, action_taken, ts)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.exchange)
        .bind(&event.symbol)
        .bind(&event.feed)
        .bind(event.staleness_seconds)
        .bind(format!("{:?}", event.severity))
        .bind(&event.action_taken)
        .bind(to_unix(event.ts))
        .execute(&self.pool)
        .await
        .context("failed to save staleness event")?;
        Ok(())
    }
}

pub struct SqliteVreDecisionRepository {
    pool: SqlitePool,
}

impl SqliteVreDecisionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VreDecisionRepository for SqliteVreDecisionRepository {
    async fn save(&self, decision: &VreDecision) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vre_decision_log (symbol, regime, decision_json, decision_hash, ts)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&decision.symbol)
        .bind(format!("{:?}", decision.regime))
        .bind(serde_json::to_string(decision)?)
        .bind(&decision.decision_hash)
        .bind(to_unix(decision.ts))
        .execute(&self.pool)
        .await
        .context("failed to save VRE decision")?;
        Ok(())
    }
}

pub struct SqliteAuditTrailRepository {
    pool: SqlitePool,
}

impl SqliteAuditTrailRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditTrailRepository for SqliteAuditTrailRepository {
    async fn append(&self, category: &str, payload_json: String) -> Result<AuditRecord> {
        let last = sqlx::query("SELECT sequence, hash FROM audit_trail ORDER BY sequence DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        let (sequence, prev_hash) = match last {
            Some(row) => (row.try_get::<i64, _>("sequence")? + 1, row.try_get::<String, _>("hash")?),
            None => (0, GENESIS_HASH.to_string()),
        };

        let record = AuditRecord::new(sequence, prev_hash, category, payload_json, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO audit_trail (id, sequence, category, payload_json, prev_hash, hash, ts)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.sequence)
        .bind(&record.category)
        .bind(&record.payload_json)
        .bind(&record.prev_hash)
        .bind(&record.hash)
        .bind(to_unix(record.ts))
        .execute(&self.pool)
        .await
        .context("failed to append audit record")?;

        Ok(record)
    }

    async fn tail(&self, limit: i64) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query("SELECT * FROM audit_trail ORDER BY sequence DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        let mut records: Vec<AuditRecord> = rows
            .into_iter()
            .map(|row| {
                Ok(AuditRecord {
                    id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
                    sequence: row.try_get("sequence")?,
                    category: row.try_get("category")?,
                    payload_json: row.try_get("payload_json")?,
                    prev_hash: row.try_get("prev_hash")?,
                    hash: row.try_get("hash")?,
                    ts: from_unix(row.try_get("ts")?),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        records.reverse();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::campaign::{CampaignRiskConfig, CampaignStatus};
    use crate::domain::vre::InvestorProfile;
    use crate::infrastructure::persistence::database::Database;
    use std::collections::{HashMap, HashSet};

    async fn test_pool() -> (SqlitePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.db");
        let db = Database::new(&format!("sqlite://{}", path.display())).await.unwrap();
        (db.pool, dir)
    }

    #[tokio::test]
    async fn campaign_save_and_get_roundtrip() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteCampaignRepository::new(pool);
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            investor_profile: InvestorProfile::Aggressive,
            start_date: now,
            end_date: now + chrono::Duration::days(30),
            initial_capital: parse_decimal("10000"),
            current_equity: parse_decimal("10000"),
            status: CampaignStatus::Active,
            risk_config: CampaignRiskConfig::default(),
            selection_config: vec!["mock:BTC/USD".to_string()],
        };

        repo.save(&campaign).await.unwrap();
        let fetched = repo.get(campaign.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, campaign.id);
        assert_eq!(fetched.investor_profile, campaign.investor_profile);
        assert_eq!(fetched.selection_config, campaign.selection_config);

        let active = repo.list_active().await.unwrap();
        assert!(active.iter().any(|c| c.id == campaign.id));
    }

    #[tokio::test]
    async fn position_save_and_get_open_roundtrip() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteCampaignPositionRepository::new(pool);
        let campaign_id = Uuid::new_v4();
        let now = Utc::now();
        let position = CampaignPosition {
            id: Uuid::new_v4(),
            campaign_id,
            symbol: "mock:BTC/USD".to_string(),
            side: crate::domain::types::Side::Long,
            quantity: parse_decimal("1.5"),
            entry_price: parse_decimal("100"),
            stop_loss: parse_decimal("99"),
            take_profit: parse_decimal("103"),
            atr_at_entry: parse_decimal("1"),
            risk_amount: parse_decimal("1.5"),
            state: crate::domain::campaign::PositionState::Open,
            close_reason: None,
            opened_at: now,
            closed_at: None,
        };

        repo.save(&position).await.unwrap();
        let open = repo.get_open(campaign_id).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, position.id);
        assert_eq!(open[0].stop_loss, position.stop_loss);

        let mut closed = position.clone();
        closed.state = crate::domain::campaign::PositionState::Closed;
        closed.close_reason = Some(crate::domain::campaign::CloseReason::TpHit);
        closed.closed_at = Some(now);
        repo.save(&closed).await.unwrap();
        assert!(repo.get_open(campaign_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn audit_append_builds_a_verifiable_chain() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteAuditTrailRepository::new(pool);

        repo.append("position_open", "{\"a\":1}".to_string()).await.unwrap();
        repo.append("position_close", "{\"a\":2}".to_string()).await.unwrap();
        repo.append("campaign_stopped", "{\"a\":3}".to_string()).await.unwrap();

        let tail = repo.tail(10).await.unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].sequence, 0);
        assert_eq!(tail[0].prev_hash, GENESIS_HASH);
        assert_eq!(tail[2].category, "campaign_stopped");
        assert!(crate::domain::audit::verify_chain(&tail));
    }

    #[tokio::test]
    async fn signal_config_upsert_overwrites_existing_row() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteSignalConfigRepository::new(pool);
        let portfolio_id = Uuid::new_v4();
        let mut config = SignalConfig::default_for(portfolio_id, "mock:BTC/USD");
        repo.upsert(&config).await.unwrap();

        config.risk_per_trade_bps = 75;
        repo.upsert(&config).await.unwrap();

        let fetched = repo.get(portfolio_id, "mock:BTC/USD").await.unwrap().unwrap();
        assert_eq!(fetched.risk_per_trade_bps, 75);
    }

    #[tokio::test]
    async fn risk_state_tradable_set_roundtrips() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteCampaignRiskStateRepository::new(pool);
        let campaign_id = Uuid::new_v4();
        let mut tradable = HashSet::new();
        tradable.insert("mock:BTC/USD".to_string());
        tradable.insert("mock:ETH/USD".to_string());
        let mut state = CampaignRiskState::new(campaign_id, parse_decimal("5000"), tradable, Utc::now());
        state.loss_in_r_by_pair = HashMap::from([("mock:BTC/USD".to_string(), parse_decimal("12.5"))]);

        repo.save(&state).await.unwrap();
        let fetched = repo.get(campaign_id).await.unwrap().unwrap();
        assert_eq!(fetched.current_tradable_set, state.current_tradable_set);
        assert_eq!(fetched.loss_in_r_by_pair, state.loss_in_r_by_pair);
    }
}
