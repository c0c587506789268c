//! Per-campaign trading robot (§4.F). One `CampaignRobot` instance owns
//! exactly one campaign's risk state, positions, and orders; the campaign
//! manager schedules exactly one 5s tick per campaign at a time, which is
//! what gives "never overlap" (§5) without an explicit lock — the `tick`
//! future is simply never polled concurrently with itself for the same
//! campaign. Grounded on the teacher's `application::agents::analyst::Analyst::run`
//! control loop and `application::agents::position_lifecycle` SL/TP checking,
//! with `application::risk_management::order_reconciler`'s TTL-reconciliation
//! idiom generalized to mandatory OCO bracket orders.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::market_data::MarketDataPipeline;
use crate::application::risk::CircuitBreakerService;
use crate::application::signal::{SignalEngine, SignalOutcome};
use crate::application::vre::VolatilityRegimeEngine;
use crate::domain::campaign::{Campaign, CampaignOrder, CampaignPosition, CampaignRiskState, CampaignStatus, CloseReason, PositionState};
use crate::domain::errors::CampaignError;
use crate::domain::ports::{ExchangeExecutionClient, ExchangeOrderOutcome, ExchangeOrderRequest};
use crate::domain::repositories::{
    AuditTrailRepository, CampaignOrderRepository, CampaignPositionRepository, CampaignRepository, CampaignRiskStateRepository,
};
use crate::domain::signal::Signal;
use crate::domain::types::{OrderSide, OrderStatus, OrderType, Side, Symbol};

pub struct CampaignRobot {
    campaign: RwLock<Campaign>,
    risk_state: RwLock<CampaignRiskState>,
    positions: RwLock<HashMap<Uuid, CampaignPosition>>,
    market: Arc<MarketDataPipeline>,
    vre: Arc<VolatilityRegimeEngine>,
    breaker: Arc<CircuitBreakerService>,
    signal_engine: Arc<SignalEngine>,
    exec_client: Arc<dyn ExchangeExecutionClient>,
    campaign_repo: Arc<dyn CampaignRepository>,
    risk_state_repo: Arc<dyn CampaignRiskStateRepository>,
    position_repo: Arc<dyn CampaignPositionRepository>,
    order_repo: Arc<dyn CampaignOrderRepository>,
    audit: Arc<dyn AuditTrailRepository>,
}

#[allow(clippy::too_many_arguments)]
impl CampaignRobot {
    pub fn new(
        campaign: Campaign,
        risk_state: CampaignRiskState,
        market: Arc<MarketDataPipeline>,
        vre: Arc<VolatilityRegimeEngine>,
        breaker: Arc<CircuitBreakerService>,
        signal_engine: Arc<SignalEngine>,
        exec_client: Arc<dyn ExchangeExecutionClient>,
        campaign_repo: Arc<dyn CampaignRepository>,
        risk_state_repo: Arc<dyn CampaignRiskStateRepository>,
        position_repo: Arc<dyn CampaignPositionRepository>,
        order_repo: Arc<dyn CampaignOrderRepository>,
        audit: Arc<dyn AuditTrailRepository>,
    ) -> Self {
        Self {
            campaign: RwLock::new(campaign),
            risk_state: RwLock::new(risk_state),
            positions: RwLock::new(HashMap::new()),
            market,
            vre,
            breaker,
            signal_engine,
            exec_client,
            campaign_repo,
            risk_state_repo,
            position_repo,
            order_repo,
            audit,
        }
    }

    pub async fn status(&self) -> CampaignStatus {
        self.campaign.read().await.status
    }

    /// One 5-second control loop iteration (§4.F steps 1-8).
    pub async fn tick(&self) -> anyhow::Result<()> {
        let campaign = self.campaign.read().await.clone();
        if campaign.status != CampaignStatus::Active {
            return Ok(());
        }

        let tradable: Vec<String> = {
            let risk_state = self.risk_state.read().await;
            risk_state.current_tradable_set.iter().cloned().collect()
        };

        for symbol in &tradable {
            if let Err(e) = self.evaluate_symbol(&campaign, symbol).await {
                warn!(campaign_id = %campaign.id, symbol, error = %e, "symbol evaluation failed");
            }
        }

        self.check_exits(&campaign).await?;
        self.recompute_equity_and_enforce_drawdown(&campaign).await?;

        {
            let mut risk_state = self.risk_state.write().await;
            risk_state.last_audit_ts = Utc::now();
            let _ = self.risk_state_repo.save(&risk_state).await;
        }

        Ok(())
    }

    async fn evaluate_symbol(&self, campaign: &Campaign, symbol: &str) -> Result<(), CampaignError> {
        let (allowed, reason) = self.breaker.can_open(campaign.portfolio_id, symbol, None).await;
        if !allowed {
            return Err(CampaignError::BreakerRefusal {
                symbol: symbol.to_string(),
                reason: reason.unwrap_or_default(),
            });
        }

        if self.vre.is_open_blocked(symbol).await {
            return Ok(()); // whipsaw guard; not an error, just skip this symbol this tick
        }

        let regime = self.vre.current_regime(symbol).await;
        if !campaign.investor_profile.allows_regime(regime) {
            return Ok(());
        }

        let parts: Vec<&str> = symbol.splitn(2, ':').collect();
        let (exchange, pair) = if parts.len() == 2 { (parts[0], parts[1]) } else { ("default", symbol) };
        let sym = Symbol::new(exchange, pair);
        let Some((quote, _age)) = self.market.get_l1(&sym) else {
            return Ok(());
        };
        let mid = (quote.bid_price + quote.ask_price) / Decimal::TWO;

        {
            let positions = self.positions.read().await;
            if positions.values().any(|p| p.symbol == symbol && p.state != PositionState::Closed) {
                return Ok(()); // one open position per symbol per campaign at a time
            }
        }

        let equity = self.risk_state.read().await.current_equity;
        let outcome = self
            .signal_engine
            .evaluate(campaign.portfolio_id, symbol, mid, equity, campaign.investor_profile, regime)
            .await
            .map_err(CampaignError::Other)?;

        if let SignalOutcome::Generated(signal) = outcome {
            self.open_position(campaign, &signal).await?;
        }

        Ok(())
    }

    /// Opens a position with a mandatory OCO (SL+TP) bracket (§4.F step 6).
    async fn open_position(&self, campaign: &Campaign, signal: &Signal) -> Result<(), CampaignError> {
        let internal_order_id = Uuid::new_v4();
        let order_side = match signal.side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        };

        let request = ExchangeOrderRequest {
            internal_order_id,
            symbol: symbol_from_str(&signal.symbol),
            side: order_side,
            quantity: signal.size,
            price: None,
            stop_price: None,
        };

        let outcome = self.exec_client.place_order(&request).await.map_err(CampaignError::Other)?;
        if !matches!(outcome, ExchangeOrderOutcome::Filled) {
            return Ok(()); // rejected/pending entries simply don't open a position this tick
        }

        let position_id = Uuid::new_v4();
        let oco_group_id = Uuid::new_v4();
        let now = Utc::now();

        let position = CampaignPosition {
            id: position_id,
            campaign_id: campaign.id,
            symbol: signal.symbol.clone(),
            side: signal.side,
            quantity: signal.size,
            entry_price: signal.price,
            stop_loss: signal.sl,
            take_profit: signal.tp1,
            atr_at_entry: signal.atr,
            risk_amount: (signal.price - signal.sl).abs() * signal.size,
            state: PositionState::Open,
            close_reason: None,
            opened_at: now,
            closed_at: None,
        };
        debug_assert!(position.is_bracket_consistent());

        let exit_side = match signal.side {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        };
        let sl_order = CampaignOrder {
            id: Uuid::new_v4(),
            internal_order_id: Uuid::new_v4(),
            campaign_id: campaign.id,
            position_id: Some(position_id),
            symbol: signal.symbol.clone(),
            side: exit_side,
            order_type: OrderType::StopLoss,
            quantity: signal.size,
            price: None,
            stop_price: Some(signal.sl),
            oco_group_id: Some(oco_group_id),
            status: OrderStatus::Open,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };
        let tp_order = CampaignOrder {
            id: Uuid::new_v4(),
            internal_order_id: Uuid::new_v4(),
            campaign_id: campaign.id,
            position_id: Some(position_id),
            symbol: signal.symbol.clone(),
            side: exit_side,
            order_type: OrderType::TakeProfit,
            quantity: signal.size,
            price: Some(signal.tp1),
            stop_price: None,
            oco_group_id: Some(oco_group_id),
            status: OrderStatus::Open,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };

        self.position_repo.save(&position).await.map_err(CampaignError::Other)?;
        self.order_repo.save(&sl_order).await.map_err(CampaignError::Other)?;
        self.order_repo.save(&tp_order).await.map_err(CampaignError::Other)?;
        self.positions.write().await.insert(position_id, position);

        let _ = self
            .audit
            .append(
                "position_open",
                serde_json::json!({"campaign_id": campaign.id, "symbol": signal.symbol, "side": format!("{:?}", signal.side)}).to_string(),
            )
            .await;

        info!(campaign_id = %campaign.id, symbol = %signal.symbol, "position opened with OCO bracket");
        Ok(())
    }

    /// Checks every open position against current market price for SL/TP
    /// breach, closing on a hit (§4.F step 7-8, §8 OCO invariant).
    async fn check_exits(&self, campaign: &Campaign) -> anyhow::Result<()> {
        let open_ids: Vec<Uuid> = {
            let positions = self.positions.read().await;
            positions
                .values()
                .filter(|p| p.state == PositionState::Open)
                .map(|p| p.id)
                .collect()
        };

        for id in open_ids {
            let (symbol, side, sl, tp) = {
                let positions = self.positions.read().await;
                let p = &positions[&id];
                (p.symbol.clone(), p.side, p.stop_loss, p.take_profit)
            };
            let sym = symbol_from_str(&symbol);
            let Some((quote, _age)) = self.market.get_l1(&sym) else { continue };
            let mid = (quote.bid_price + quote.ask_price) / Decimal::TWO;

            let hit = match side {
                Side::Long if mid <= sl => Some((CloseReason::SlHit, sl)),
                Side::Long if mid >= tp => Some((CloseReason::TpHit, tp)),
                Side::Short if mid >= sl => Some((CloseReason::SlHit, sl)),
                Side::Short if mid <= tp => Some((CloseReason::TpHit, tp)),
                _ => None,
            };

            if let Some((reason, exit_price)) = hit {
                self.close_position(campaign, id, reason, exit_price).await?;
            }
        }
        Ok(())
    }

    /// Closes a position, reconciles the sibling OCO leg, records the trade
    /// against the circuit breaker, and updates risk state (§4.F step 8).
    pub async fn close_position(&self, campaign: &Campaign, position_id: Uuid, reason: CloseReason, exit_price: Decimal) -> anyhow::Result<()> {
        {
            let mut positions = self.positions.write().await;
            if let Some(p) = positions.get_mut(&position_id) {
                p.state = PositionState::Closing;
            }
        }

        let orders = self.order_repo.find_by_oco_group(position_id).await.unwrap_or_default();
        let mut reconciliation_failed = false;
        for order in orders {
            if order.status == OrderStatus::Open
                && self.exec_client.cancel_order(order.internal_order_id).await.is_err()
            {
                reconciliation_failed = true;
            }
        }

        let (symbol, side, entry_price, quantity) = {
            let positions = self.positions.read().await;
            let p = &positions[&position_id];
            (p.symbol.clone(), p.side, p.entry_price, p.quantity)
        };

        let realized_pnl = match side {
            Side::Long => (exit_price - entry_price) * quantity,
            Side::Short => (entry_price - exit_price) * quantity,
        };

        if reconciliation_failed {
            let _ = self
                .audit
                .append(
                    "manual_reconciliation_required",
                    serde_json::json!({"campaign_id": campaign.id, "position_id": position_id, "symbol": symbol}).to_string(),
                )
                .await;
            warn!(campaign_id = %campaign.id, %position_id, "OCO leg cancellation failed, flagged for manual reconciliation");
            return Ok(()); // position stays Closing until reconciled
        }

        {
            let mut positions = self.positions.write().await;
            if let Some(p) = positions.get_mut(&position_id) {
                p.state = PositionState::Closed;
                p.close_reason = Some(reason);
                p.closed_at = Some(Utc::now());
            }
            if let Some(p) = positions.get(&position_id) {
                let _ = self.position_repo.save(p).await;
            }
        }

        {
            let mut risk_state = self.risk_state.write().await;
            risk_state.daily_pnl += realized_pnl;
            let entry = risk_state.loss_in_r_by_pair.entry(symbol.clone()).or_insert(Decimal::ZERO);
            if realized_pnl < Decimal::ZERO {
                *entry += realized_pnl.abs();
            }
        }

        self.breaker.record_trade(campaign.portfolio_id, &symbol, realized_pnl, None).await;
        if realized_pnl < Decimal::ZERO {
            self.vre.record_loss(&symbol).await;
        }

        let _ = self
            .audit
            .append(
                "position_close",
                serde_json::json!({"campaign_id": campaign.id, "position_id": position_id, "reason": format!("{reason:?}"), "realized_pnl": realized_pnl.to_string()}).to_string(),
            )
            .await;

        Ok(())
    }

    /// Recomputes equity/watermark/drawdown and enforces the drawdown
    /// kill-switch (§4.F equity semantics, §8 invariant).
    async fn recompute_equity_and_enforce_drawdown(&self, campaign: &Campaign) -> anyhow::Result<()> {
        let unrealized: Decimal = {
            let positions = self.positions.read().await;
            let mut total = Decimal::ZERO;
            for p in positions.values().filter(|p| p.state == PositionState::Open) {
                let sym = symbol_from_str(&p.symbol);
                if let Some((quote, _)) = self.market.get_l1(&sym) {
                    let mid = (quote.bid_price + quote.ask_price) / Decimal::TWO;
                    let pnl = match p.side {
                        Side::Long => (mid - p.entry_price) * p.quantity,
                        Side::Short => (p.entry_price - mid) * p.quantity,
                    };
                    total += pnl;
                }
            }
            total
        };

        let new_equity = campaign.initial_capital + self.lifetime_realized_pnl().await + unrealized;

        let should_stop = {
            let mut risk_state = self.risk_state.write().await;
            risk_state.recompute_drawdown(new_equity);
            risk_state.current_dd_pct >= campaign.risk_config.max_drawdown_pct
        };

        if should_stop && campaign.status == CampaignStatus::Active {
            self.stop_campaign_for_drawdown(campaign).await?;
        }

        Ok(())
    }

    async fn lifetime_realized_pnl(&self) -> Decimal {
        let positions = self.positions.read().await;
        positions
            .values()
            .filter(|p| p.state == PositionState::Closed)
            .map(closed_position_pnl)
            .sum::<Decimal>()
    }

    /// Campaign Manager's 60s scheduler pass (§4.G): expiration, daily reset
    /// at 00:00 UTC, and rebalance cadence. Does not re-check drawdown — that
    /// runs every 5s tick already (§4.F).
    pub async fn check_expiration_and_reset(&self, now: chrono::DateTime<Utc>) {
        let campaign = self.campaign.read().await.clone();
        if campaign.status != CampaignStatus::Active {
            return;
        }

        if now >= campaign.end_date {
            let mut c = self.campaign.write().await;
            c.status = CampaignStatus::Completed;
            let _ = self.campaign_repo.save(&c).await;
            info!(campaign_id = %campaign.id, "campaign completed at end_date");
            let _ = self
                .audit
                .append("campaign_completed", serde_json::json!({"campaign_id": campaign.id}).to_string())
                .await;
            return;
        }

        let mut rebalance_triggered = false;
        let tradable_set = {
            let mut risk_state = self.risk_state.write().await;

            if now.date_naive() != risk_state.last_daily_reset_ts.date_naive() {
                risk_state.daily_pnl = Decimal::ZERO;
                risk_state.daily_loss_pct = Decimal::ZERO;
                risk_state.last_daily_reset_ts = now;
                info!(campaign_id = %campaign.id, "daily reset applied");
            }

            let cadence = chrono::Duration::hours(campaign.risk_config.rebalance_cadence_hours);
            if now - risk_state.last_rebalance_ts >= cadence {
                risk_state.last_rebalance_ts = now; // explicit/manual rebalance also restarts this countdown (§9.3/§4.G)
                rebalance_triggered = true;
                info!(campaign_id = %campaign.id, "rebalance cadence triggered");
            }

            let snapshot = risk_state.current_tradable_set.clone();
            let _ = self.risk_state_repo.save(&risk_state).await;
            snapshot
        };

        if rebalance_triggered {
            self.reconcile_tradable_set(&campaign, &tradable_set).await;
        }
    }

    /// Closes every open position whose symbol fell out of the campaign's
    /// current tradable set on a rebalance, with `close_reason=rebalance_exit`.
    async fn reconcile_tradable_set(&self, campaign: &Campaign, tradable_set: &std::collections::HashSet<String>) {
        let stale_ids: Vec<Uuid> = {
            let positions = self.positions.read().await;
            positions
                .values()
                .filter(|p| p.state == PositionState::Open && !tradable_set.contains(&p.symbol))
                .map(|p| p.id)
                .collect()
        };

        for id in stale_ids {
            let exit_price = {
                let positions = self.positions.read().await;
                let p = &positions[&id];
                let sym = symbol_from_str(&p.symbol);
                self.market.get_l1(&sym).map(|(q, _)| (q.bid_price + q.ask_price) / Decimal::TWO).unwrap_or(p.entry_price)
            };
            if let Err(e) = self.close_position(campaign, id, CloseReason::RebalanceExit, exit_price).await {
                warn!(campaign_id = %campaign.id, position_id = %id, error = %e, "rebalance exit failed");
            }
        }
    }

    async fn stop_campaign_for_drawdown(&self, campaign: &Campaign) -> anyhow::Result<()> {
        warn!(campaign_id = %campaign.id, "max drawdown breached, stopping campaign");
        {
            let mut c = self.campaign.write().await;
            c.status = CampaignStatus::Stopped;
            let _ = self.campaign_repo.save(&c).await;
        }

        let open_ids: Vec<Uuid> = {
            let positions = self.positions.read().await;
            positions.values().filter(|p| p.state == PositionState::Open).map(|p| p.id).collect()
        };
        for id in open_ids {
            let exit_price = {
                let positions = self.positions.read().await;
                let p = &positions[&id];
                let sym = symbol_from_str(&p.symbol);
                self.market.get_l1(&sym).map(|(q, _)| (q.bid_price + q.ask_price) / Decimal::TWO).unwrap_or(p.entry_price)
            };
            self.close_position(campaign, id, CloseReason::BreakerExit, exit_price).await?;
        }

        let _ = self
            .audit
            .append("campaign_stopped", serde_json::json!({"campaign_id": campaign.id, "reason": "max_drawdown"}).to_string())
            .await;
        Ok(())
    }
}

fn closed_position_pnl(p: &CampaignPosition) -> Decimal {
    let exit = match p.close_reason {
        Some(CloseReason::SlHit) => p.stop_loss,
        Some(CloseReason::TpHit) => p.take_profit,
        _ => p.entry_price,
    };
    match p.side {
        Side::Long => (exit - p.entry_price) * p.quantity,
        Side::Short => (p.entry_price - exit) * p.quantity,
    }
}

fn symbol_from_str(s: &str) -> Symbol {
    if let Some((exchange, pair)) = s.split_once(':') {
        Symbol::new(exchange, pair)
    } else {
        Symbol::new("default", s)
    }
}
