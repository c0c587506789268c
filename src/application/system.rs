//! Top-level wiring: builds every engine and durable repository from
//! `Config`, then spawns the supervised background tasks that drive them.
//! Grounded on the teacher's `application::system::{Application, SystemHandle}`
//! build/start shape; shutdown uses a shared `tokio::sync::watch` signal and
//! stops tasks in the reverse of spawn order (§9 Design Notes).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::campaign_engine::CampaignRobot;
use crate::application::campaign_manager::CampaignManager;
use crate::application::market_data::MarketDataPipeline;
use crate::application::risk::CircuitBreakerService;
use crate::application::signal::{SignalEngine, SignalEngineConfig};
use crate::application::staleness::StalenessGuard;
use crate::application::vre::{VolatilityRegimeEngine, VreParams};
use crate::config::Config;
use crate::domain::campaign::CampaignRiskState;
use crate::domain::ports::{ExchangeExecutionClient, ExchangeMarketDataClient};
use crate::domain::repositories::{
    AuditTrailRepository, BarRepository, CampaignOrderRepository, CampaignPositionRepository, CampaignRepository,
    CampaignRiskStateRepository, CircuitBreakerEventRepository, SignalConfigRepository, SignalRepository,
    StalenessLogRepository, VreDecisionRepository,
};
use crate::domain::types::Symbol;
use crate::infrastructure::exchange::{ExchangeWebSocketIngestor, RestExchangeClient};
use crate::infrastructure::persistence::repositories::{
    SqliteAuditTrailRepository, SqliteBarRepository, SqliteCampaignOrderRepository, SqliteCampaignPositionRepository,
    SqliteCampaignRepository, SqliteCampaignRiskStateRepository, SqliteCircuitBreakerEventRepository,
    SqliteSignalConfigRepository, SqliteSignalRepository, SqliteStalenessLogRepository, SqliteVreDecisionRepository,
};
use crate::infrastructure::persistence::Database;

const STALENESS_EVAL_INTERVAL_SECS: u64 = 1;
const AUTO_RESET_INTERVAL_SECS: u64 = 60;
const SCHEDULER_PASS_INTERVAL_SECS: u64 = 60;
const CAMPAIGN_TICK_INTERVAL_SECS: u64 = 5;
const REST_FALLBACK_POLL_SECS: u64 = 10;

/// Owns every started background task and the shutdown signal that stops
/// them. Dropping without calling `shutdown` leaves the tasks running
/// detached, same as the teacher's `SystemHandle`.
pub struct SystemHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SystemHandle {
    /// Signals every supervised task to stop, then awaits them in the
    /// reverse of the order they were spawned.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.into_iter().rev() {
            if let Err(e) = task.await {
                warn!(error = %e, "supervised task panicked during shutdown");
            }
        }
        info!("application shutdown complete");
    }
}

pub struct Application {
    config: Config,
    market: Arc<MarketDataPipeline>,
    staleness: Arc<StalenessGuard>,
    vre: Arc<VolatilityRegimeEngine>,
    breaker: Arc<CircuitBreakerService>,
    signal_engine: Arc<SignalEngine>,
    manager: Arc<CampaignManager>,
    exec_client: Arc<dyn ExchangeExecutionClient>,
    audit: Arc<dyn AuditTrailRepository>,
    campaign_repo: Arc<dyn CampaignRepository>,
    risk_state_repo: Arc<dyn CampaignRiskStateRepository>,
    position_repo: Arc<dyn CampaignPositionRepository>,
    order_repo: Arc<dyn CampaignOrderRepository>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        let db = Database::new(&config.database_url).await?;
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

        let exec_client: Arc<dyn ExchangeExecutionClient> = Arc::new(RestExchangeClient::new(
            config.broker.rest_url.clone(),
            config.broker.api_key.clone(),
            config.broker.api_secret.clone(),
        ));
        let market_client: Arc<dyn ExchangeMarketDataClient> = Arc::new(RestExchangeClient::new(
            config.broker.rest_url.clone(),
            config.broker.api_key.clone(),
            config.broker.api_secret.clone(),
        ));

        let staleness = Arc::new(StalenessGuard::new(staleness_log_repo));
        let market = Arc::new(MarketDataPipeline::new(market_client, bar_repo, staleness.clone()));
        let vre = Arc::new(VolatilityRegimeEngine::new(VreParams::default(), vre_decision_repo));
        let breaker = Arc::new(CircuitBreakerService::new(config.to_breaker_thresholds(), breaker_event_repo, staleness.clone()));
        let signal_engine = Arc::new(SignalEngine::new(
            SignalEngineConfig { ema_fast_period: 12, ema_slow_period: 36, atr_period: 14 },
            signal_config_repo,
            signal_repo,
        ));
        let manager = Arc::new(CampaignManager::new());

        Ok(Self {
            config,
            market,
            staleness,
            vre,
            breaker,
            signal_engine,
            manager,
            exec_client,
            audit,
            campaign_repo,
            risk_state_repo,
            position_repo,
            order_repo,
        })
    }

    /// Loads every active campaign, builds its robot, subscribes the market
    /// pipeline and exchange websocket to the union of their symbols, and
    /// spawns the supervised background tasks (§5).
    pub async fn start(self) -> Result<SystemHandle> {
        let active_campaigns = self.campaign_repo.list_active().await?;
        info!(count = active_campaigns.len(), "loaded active campaigns");

        let mut all_symbols: HashSet<String> = HashSet::new();
        for campaign in &active_campaigns {
            let risk_state = match self.risk_state_repo.get(campaign.id).await? {
                Some(state) => state,
                None => CampaignRiskState::new(
                    campaign.id,
                    campaign.initial_capital,
                    campaign.selection_config.iter().cloned().collect(),
                    chrono::Utc::now(),
                ),
            };
            all_symbols.extend(risk_state.current_tradable_set.iter().cloned());

            let robot = Arc::new(CampaignRobot::new(
                campaign.clone(),
                risk_state,
                self.market.clone(),
                self.vre.clone(),
                self.breaker.clone(),
                self.signal_engine.clone(),
                self.exec_client.clone(),
                self.campaign_repo.clone(),
                self.risk_state_repo.clone(),
                self.position_repo.clone(),
                self.order_repo.clone(),
                self.audit.clone(),
            ));
            self.manager.register(campaign.id, robot).await;
        }

        let symbols: Vec<Symbol> = all_symbols.iter().map(|s| parse_symbol(s)).collect();
        if !symbols.is_empty() {
            self.market.subscribe(&symbols).await?;
        }

        let ingestor = Arc::new(ExchangeWebSocketIngestor::spawn(
            self.config.broker.ws_url.clone(),
            "default".to_string(),
            self.market.clone(),
        ));
        let pairs: Vec<String> = symbols.iter().map(|s| s.pair.clone()).collect();
        if !pairs.is_empty() {
            let _ = ingestor.update_subscription(pairs).await;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        tasks.push(spawn_ticker(
            "rest-fallback",
            Duration::from_secs(REST_FALLBACK_POLL_SECS),
            shutdown_rx.clone(),
            {
                let market = self.market.clone();
                let symbols = symbols.clone();
                move || {
                    let market = market.clone();
                    let symbols = symbols.clone();
                    async move {
                        if market.should_engage_rest_fallback() {
                            for symbol in &symbols {
                                if let Err(e) = market.rest_refresh(symbol).await {
                                    warn!(symbol = %symbol, error = %e, "rest fallback refresh failed");
                                }
                            }
                        }
                    }
                }
            },
        ));

        tasks.push(spawn_ticker(
            "staleness-eval",
            Duration::from_secs(STALENESS_EVAL_INTERVAL_SECS),
            shutdown_rx.clone(),
            {
                let staleness = self.staleness.clone();
                move || {
                    let staleness = staleness.clone();
                    async move {
                        let _ = staleness.evaluate_all(STALENESS_EVAL_INTERVAL_SECS as i64).await;
                    }
                }
            },
        ));

        tasks.push(spawn_ticker(
            "breaker-auto-reset",
            Duration::from_secs(AUTO_RESET_INTERVAL_SECS),
            shutdown_rx.clone(),
            {
                let breaker = self.breaker.clone();
                move || {
                    let breaker = breaker.clone();
                    async move { breaker.run_auto_reset_tick().await }
                }
            },
        ));

        tasks.push(spawn_ticker(
            "campaign-ticks",
            Duration::from_secs(CAMPAIGN_TICK_INTERVAL_SECS),
            shutdown_rx.clone(),
            {
                let manager = self.manager.clone();
                move || {
                    let manager = manager.clone();
                    async move { manager.run_all_ticks().await }
                }
            },
        ));

        tasks.push(spawn_ticker(
            "campaign-scheduler",
            Duration::from_secs(SCHEDULER_PASS_INTERVAL_SECS),
            shutdown_rx.clone(),
            {
                let manager = self.manager.clone();
                move || {
                    let manager = manager.clone();
                    async move { manager.run_scheduler_pass().await }
                }
            },
        ));

        // Keep the websocket ingestor alive for the lifetime of the handle.
        tasks.push(tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let _ingestor = ingestor;
            let _ = rx.changed().await;
        }));

        Ok(SystemHandle { shutdown_tx, tasks })
    }
}

/// Spawns a named interval-driven background task that stops as soon as the
/// shared shutdown signal flips true, rather than mid-iteration.
fn spawn_ticker<F, Fut>(name: &'static str, period: Duration, mut shutdown_rx: watch::Receiver<bool>, mut make_fut: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    make_fut().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(task = name, "supervised task stopping");
                        break;
                    }
                }
            }
        }
    })
}

fn parse_symbol(s: &str) -> Symbol {
    match s.split_once(':') {
        Some((exchange, pair)) => Symbol::new(exchange, pair),
        None => Symbol::new("default", s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_symbol_strings() {
        let sym = parse_symbol("mock:BTC/USD");
        assert_eq!(sym.exchange, "mock");
        assert_eq!(sym.pair, "BTC/USD");

        let bare = parse_symbol("BTC/USD");
        assert_eq!(bare.exchange, "default");
    }
}
