//! Black-box coverage of the campaign control loop, driven exclusively
//! through `CampaignRobot`'s public surface (`tick`/`close_position`) against
//! a real sqlite-backed repository stack and the in-memory mock exchange.
//! Covers: signal generation -> OCO bracket open -> TP exit, SL exit,
//! drawdown-triggered campaign stop, and OCO cancel-failure reconciliation.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use campaign_core::application::campaign_engine::CampaignRobot;
use campaign_core::application::market_data::MarketDataPipeline;
use campaign_core::application::risk::CircuitBreakerService;
use campaign_core::application::signal::{SignalEngine, SignalEngineConfig};
use campaign_core::application::staleness::StalenessGuard;
use campaign_core::application::vre::{VolatilityRegimeEngine, VreParams};
use campaign_core::domain::breaker::BreakerThresholds;
use campaign_core::domain::campaign::{Campaign, CampaignRiskConfig, CampaignRiskState, CampaignStatus, CloseReason};
use campaign_core::domain::ports::{ExchangeExecutionClient, ExchangeMarketDataClient, ExchangeOrderOutcome, ExchangeOrderRequest};
use campaign_core::domain::repositories::*;
use campaign_core::domain::signal::SignalConfig;
use campaign_core::domain::types::{Bar, BarPeriod, Symbol, Tick};
use campaign_core::domain::vre::InvestorProfile;
use campaign_core::infrastructure::exchange::MockExchangeClient;
use campaign_core::infrastructure::persistence::repositories::{
    SqliteAuditTrailRepository, SqliteBarRepository, SqliteCampaignOrderRepository, SqliteCampaignPositionRepository,
    SqliteCampaignRepository, SqliteCampaignRiskStateRepository, SqliteCircuitBreakerEventRepository,
    SqliteSignalConfigRepository, SqliteSignalRepository, SqliteStalenessLogRepository, SqliteVreDecisionRepository,
};
use campaign_core::infrastructure::persistence::Database;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Execution client that always fills entries but always fails to cancel,
/// used to drive the OCO reconciliation-failure path (scenario 6) without
/// touching the happy-path mock's fill/reject state.
struct FlakyExecClient {
    inner: MockExchangeClient,
}

impl FlakyExecClient {
    fn new() -> Self {
        Self { inner: MockExchangeClient::new() }
    }
}

#[async_trait]
impl ExchangeExecutionClient for FlakyExecClient {
    async fn place_order(&self, request: &ExchangeOrderRequest) -> Result<ExchangeOrderOutcome> {
        self.inner.place_order(request).await
    }

    async fn cancel_order(&self, _internal_order_id: Uuid) -> Result<()> {
        anyhow::bail!("simulated venue outage: cancel rejected")
    }

    async fn order_status(&self, internal_order_id: Uuid) -> Result<ExchangeOrderOutcome> {
        self.inner.order_status(internal_order_id).await
    }
}

struct Harness {
    robot: Arc<CampaignRobot>,
    market: Arc<MarketDataPipeline>,
    position_repo: Arc<dyn CampaignPositionRepository>,
    audit: Arc<dyn AuditTrailRepository>,
    campaign: Campaign,
    symbol: Symbol,
    symbol_key: String,
    _tmp: tempfile::TempDir,
}

async fn build_harness(exec_client: Arc<dyn ExchangeExecutionClient>, risk_config: CampaignRiskConfig, risk_per_trade_bps: u32) -> Harness {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db_path = tmp.path().join("trading.db");
    let db = Database::new(&format!("sqlite://{}", db_path.display())).await.expect("open db");
    let pool = db.pool.clone();

    let campaign_repo: Arc<dyn CampaignRepository> = Arc::new(SqliteCampaignRepository::new(pool.clone()));
    let risk_state_repo: Arc<dyn CampaignRiskStateRepository> = Arc::new(SqliteCampaignRiskStateRepository::new(pool.clone()));
    let position_repo: Arc<dyn CampaignPositionRepository> = Arc::new(SqliteCampaignPositionRepository::new(pool.clone()));
    let order_repo: Arc<dyn CampaignOrderRepository> = Arc::new(SqliteCampaignOrderRepository::new(pool.clone()));
    let bar_repo: Arc<dyn BarRepository> = Arc::new(SqliteBarRepository::new(pool.clone()));
    let signal_config_repo: Arc<dyn SignalConfigRepository> = Arc::new(SqliteSignalConfigRepository::new(pool.clone()));
    let signal_repo: Arc<dyn SignalRepository> = Arc::new(SqliteSignalRepository::new(pool.clone()));
    let breaker_event_repo: Arc<dyn CircuitBreakerEventRepository> = Arc::new(SqliteCircuitBreakerEventRepository::new(pool.clone()));
    let staleness_log_repo: Arc<dyn StalenessLogRepository> = Arc::new(SqliteStalenessLogRepository::new(pool.clone()));
    let vre_decision_repo: Arc<dyn VreDecisionRepository> = Arc::new(SqliteVreDecisionRepository::new(pool.clone()));
    let audit: Arc<dyn AuditTrailRepository> = Arc::new(SqliteAuditTrailRepository::new(pool));

    let market_client: Arc<dyn ExchangeMarketDataClient> = Arc::new(MockExchangeClient::new());
    let staleness = Arc::new(StalenessGuard::new(staleness_log_repo));
    let market = Arc::new(MarketDataPipeline::new(market_client, bar_repo, staleness.clone()));
    let vre = Arc::new(VolatilityRegimeEngine::new(VreParams::default(), vre_decision_repo));
    let breaker = Arc::new(CircuitBreakerService::new(BreakerThresholds::default(), breaker_event_repo, staleness.clone()));
    let signal_engine = Arc::new(SignalEngine::new(
        SignalEngineConfig { ema_fast_period: 3, ema_slow_period: 6, atr_period: 3 },
        signal_config_repo.clone(),
        signal_repo,
    ));

    let portfolio_id = Uuid::new_v4();
    let campaign_id = Uuid::new_v4();
    let symbol = Symbol::new("mock", "BTC/USD");
    let symbol_key = symbol.canonical();

    let mut config = SignalConfig::default_for(portfolio_id, symbol_key.clone());
    config.risk_per_trade_bps = risk_per_trade_bps;
    signal_config_repo.upsert(&config).await.expect("seed signal config");

    let now = Utc::now();
    // ~30 mildly-ramping 1-minute bars so the EMA/ATR stack has live,
    // strictly-positive values by the time a signal is evaluated.
    for i in 0..30i64 {
        let close = dec!(100) + Decimal::from(i) * dec!(0.05);
        let bar = Bar {
            symbol: symbol.clone(),
            period: BarPeriod::OneMinute,
            bar_ts: now - chrono::Duration::minutes(30 - i),
            open: close - dec!(0.02),
            high: close + dec!(0.1),
            low: close - dec!(0.1),
            close,
            volume: dec!(1),
            trade_count: 1,
            vwap: close,
        };
        signal_engine.on_bar(&bar).await;
    }

    let campaign = Campaign {
        id: campaign_id,
        portfolio_id,
        investor_profile: InvestorProfile::Moderate,
        start_date: now - chrono::Duration::days(1),
        end_date: now + chrono::Duration::days(30),
        initial_capital: dec!(10000),
        current_equity: dec!(10000),
        status: CampaignStatus::Active,
        risk_config,
        selection_config: vec![symbol_key.clone()],
    };

    let mut tradable = HashSet::new();
    tradable.insert(symbol_key.clone());
    let risk_state = CampaignRiskState::new(campaign_id, dec!(10000), tradable, now);

    let robot = Arc::new(CampaignRobot::new(
        campaign.clone(),
        risk_state,
        market.clone(),
        vre,
        breaker,
        signal_engine,
        exec_client,
        campaign_repo,
        risk_state_repo,
        position_repo.clone(),
        order_repo,
        audit.clone(),
    ));

    Harness { robot, market, position_repo, audit, campaign, symbol, symbol_key, _tmp: tmp }
}

/// Primes the staleness guard to FRESH and seeds an L1 quote far enough above
/// the ramped bar history to force a long signal on the next `tick`,
/// regardless of the exact EMA/ATR values the `ta` crate converges to.
async fn prime_and_quote(h: &Harness, price: Decimal) {
    h.market
        .on_tick(Tick { symbol: h.symbol.clone(), price, quantity: dec!(1), ts: Utc::now() })
        .await
        .expect("seed tick");
    h.market.on_l1(&h.symbol, MockExchangeClient::quote(price, Decimal::ZERO));
}

async fn open_one_position(h: &Harness) {
    prime_and_quote(h, dec!(150)).await;
    h.robot.tick().await.expect("tick opens position");
    let open = h.position_repo.get_open(h.campaign.id).await.expect("get_open");
    assert_eq!(open.len(), 1, "expected exactly one open position after the opening tick");
}

#[tokio::test]
async fn happy_path_open_then_take_profit_exit() {
    let exec: Arc<dyn ExchangeExecutionClient> = Arc::new(MockExchangeClient::new());
    let h = build_harness(exec, CampaignRiskConfig::default(), 50).await;
    open_one_position(&h).await;

    let opened = h.position_repo.get_open(h.campaign.id).await.unwrap();
    let take_profit = opened[0].take_profit;
    assert!(take_profit > opened[0].entry_price, "long bracket must have tp above entry");

    prime_and_quote(&h, take_profit).await;
    h.robot.tick().await.expect("tick closes on tp");

    assert!(h.position_repo.get_open(h.campaign.id).await.unwrap().is_empty());
    let tail = h.audit.tail(50).await.unwrap();
    let close_record = tail.iter().find(|r| r.category == "position_close").expect("position_close audit entry");
    assert!(close_record.payload_json.contains("TpHit"));
    assert_eq!(h.robot.status().await, CampaignStatus::Active);
}

#[tokio::test]
async fn stop_loss_hit_before_take_profit() {
    let exec: Arc<dyn ExchangeExecutionClient> = Arc::new(MockExchangeClient::new());
    let h = build_harness(exec, CampaignRiskConfig::default(), 50).await;
    open_one_position(&h).await;

    let opened = h.position_repo.get_open(h.campaign.id).await.unwrap();
    let stop_loss = opened[0].stop_loss;
    assert!(stop_loss < opened[0].entry_price, "long bracket must have sl below entry");

    prime_and_quote(&h, stop_loss).await;
    h.robot.tick().await.expect("tick closes on sl");

    assert!(h.position_repo.get_open(h.campaign.id).await.unwrap().is_empty());
    let tail = h.audit.tail(50).await.unwrap();
    let close_record = tail.iter().find(|r| r.category == "position_close").expect("position_close audit entry");
    assert!(close_record.payload_json.contains("SlHit"));
    assert_eq!(h.robot.status().await, CampaignStatus::Active);
}

#[tokio::test]
async fn a_single_outsized_loss_breaches_drawdown_and_stops_the_campaign() {
    // risk_per_trade_bps=1000 and Moderate/Normal's 0.90 size multiplier make
    // a single SL hit realize a loss of exactly
    // equity * bps/10000 * multiplier = 10000 * 0.10 * 0.90 = 900,
    // i.e. a 9% drawdown — comfortably over a 5% max_drawdown_pct ceiling.
    let risk_config = CampaignRiskConfig { max_drawdown_pct: dec!(0.05), max_daily_loss_pct: dec!(0.05), rebalance_cadence_hours: 8 };
    let exec: Arc<dyn ExchangeExecutionClient> = Arc::new(MockExchangeClient::new());
    let h = build_harness(exec, risk_config, 1000).await;
    open_one_position(&h).await;

    let opened = h.position_repo.get_open(h.campaign.id).await.unwrap();
    let stop_loss = opened[0].stop_loss;

    prime_and_quote(&h, stop_loss).await;
    h.robot.tick().await.expect("tick closes on sl and enforces drawdown");

    assert!(h.position_repo.get_open(h.campaign.id).await.unwrap().is_empty());
    assert_eq!(h.robot.status().await, CampaignStatus::Stopped);

    let tail = h.audit.tail(50).await.unwrap();
    assert!(tail.iter().any(|r| r.category == "campaign_stopped" && r.payload_json.contains("max_drawdown")));
}

#[tokio::test]
async fn failed_oco_cancellation_flags_manual_reconciliation_instead_of_closing() {
    let flaky: Arc<dyn ExchangeExecutionClient> = Arc::new(FlakyExecClient::new());
    let h = build_harness(flaky, CampaignRiskConfig::default(), 50).await;
    open_one_position(&h).await;

    let opened = h.position_repo.get_open(h.campaign.id).await.unwrap();
    let position_id = opened[0].id;
    let exit_price = opened[0].take_profit;

    h.robot
        .close_position(&h.campaign, position_id, CloseReason::TpHit, exit_price)
        .await
        .expect("close_position itself does not error on reconciliation failure");

    // The cancel failure must prevent the position from being marked closed
    // in the durable store — it stays open pending manual reconciliation.
    let still_open = h.position_repo.get_open(h.campaign.id).await.unwrap();
    assert_eq!(still_open.len(), 1);
    assert_eq!(still_open[0].id, position_id);

    let tail = h.audit.tail(50).await.unwrap();
    assert!(tail.iter().any(|r| r.category == "manual_reconciliation_required" && r.payload_json.contains(&position_id.to_string())));
    assert!(!tail.iter().any(|r| r.category == "position_close"));
}

#[tokio::test]
async fn unseen_symbol_defaults_to_kill_staleness_and_blocks_new_opens() {
    // No tick/L1 has been recorded for this campaign's symbol at all, so the
    // staleness guard's unseen-pair default of KILL must refuse every open
    // attempt even though price data would otherwise support a signal.
    let exec: Arc<dyn ExchangeExecutionClient> = Arc::new(MockExchangeClient::new());
    let h = build_harness(exec, CampaignRiskConfig::default(), 50).await;

    h.market.on_l1(&h.symbol, MockExchangeClient::quote(dec!(150), Decimal::ZERO));
    h.robot.tick().await.expect("tick runs without error even when every symbol is blocked");

    assert!(h.position_repo.get_open(h.campaign.id).await.unwrap().is_empty());
    assert_eq!(h.robot.status().await, CampaignStatus::Active);
    let _ = h.symbol_key; // kept for readability of the harness shape, not asserted on directly here
}
