//! Campaign engine domain types (§3, §4.F).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::domain::types::{OrderStatus, OrderType, Side};
use crate::domain::vre::InvestorProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
    Stopped,
}

impl CampaignStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Stopped)
    }
}

/// Immutable risk configuration snapshotted at campaign creation (§6: "A
/// campaign's risk_config is immutable for the lifetime of that campaign").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRiskConfig {
    pub max_drawdown_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub rebalance_cadence_hours: i64,
}

impl Default for CampaignRiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_pct: Decimal::new(10, 2), // 10%
            max_daily_loss_pct: Decimal::new(5, 2),
            rebalance_cadence_hours: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub investor_profile: InvestorProfile,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: Decimal,
    pub current_equity: Decimal,
    pub status: CampaignStatus,
    pub risk_config: CampaignRiskConfig,
    pub selection_config: Vec<String>, // symbols selected at creation time
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRiskState {
    pub campaign_id: Uuid,
    pub current_equity: Decimal,
    pub equity_high_watermark: Decimal,
    pub daily_pnl: Decimal,
    pub daily_loss_pct: Decimal,
    pub current_dd_pct: Decimal,
    pub loss_in_r_by_pair: HashMap<String, Decimal>,
    pub cb_pair_triggered: HashSet<String>,
    pub cb_daily_triggered: bool,
    pub cb_campaign_triggered: bool,
    pub cb_cooldown_until: Option<DateTime<Utc>>,
    pub current_tradable_set: HashSet<String>,
    pub last_rebalance_ts: DateTime<Utc>,
    pub last_audit_ts: DateTime<Utc>,
    pub last_daily_reset_ts: DateTime<Utc>,
}

impl CampaignRiskState {
    pub fn new(campaign_id: Uuid, initial_capital: Decimal, tradable_set: HashSet<String>, now: DateTime<Utc>) -> Self {
        Self {
            campaign_id,
            current_equity: initial_capital,
            equity_high_watermark: initial_capital,
            daily_pnl: Decimal::ZERO,
            daily_loss_pct: Decimal::ZERO,
            current_dd_pct: Decimal::ZERO,
            loss_in_r_by_pair: HashMap::new(),
            cb_pair_triggered: HashSet::new(),
            cb_daily_triggered: false,
            cb_campaign_triggered: false,
            cb_cooldown_until: None,
            current_tradable_set: tradable_set,
            last_rebalance_ts: now,
            last_audit_ts: now,
            last_daily_reset_ts: now,
        }
    }

    /// Recomputes watermark and drawdown after an equity update. The watermark
    /// is monotone non-decreasing (§8 invariant).
    pub fn recompute_drawdown(&mut self, new_equity: Decimal) {
        self.current_equity = new_equity;
        if new_equity > self.equity_high_watermark {
            self.equity_high_watermark = new_equity;
        }
        self.current_dd_pct = if self.equity_high_watermark.is_zero() {
            Decimal::ZERO
        } else {
            ((self.equity_high_watermark - new_equity) / self.equity_high_watermark).max(Decimal::ZERO)
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    SlHit,
    TpHit,
    SignalExit,
    RebalanceExit,
    BreakerExit,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignPosition {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub atr_at_entry: Decimal,
    pub risk_amount: Decimal,
    pub state: PositionState,
    pub close_reason: Option<CloseReason>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl CampaignPosition {
    /// §8 invariant: for a long, sl < entry < tp (reversed for short).
    pub fn is_bracket_consistent(&self) -> bool {
        match self.side {
            Side::Long => self.stop_loss < self.entry_price && self.entry_price < self.take_profit,
            Side::Short => self.stop_loss > self.entry_price && self.entry_price > self.take_profit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignOrder {
    pub id: Uuid,
    pub internal_order_id: Uuid,
    pub campaign_id: Uuid,
    pub position_id: Option<Uuid>,
    pub symbol: String,
    pub side: crate::domain::types::OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub oco_group_id: Option<Uuid>,
    pub status: OrderStatus,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
