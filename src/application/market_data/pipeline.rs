//! Market Data Pipeline (§4.A). Owns WebSocket-fed tick ingestion, L1/L2
//! snapshot caches, per-symbol bar aggregation, and the global REST fallback
//! loop. Structurally grounded on the teacher's `application/market_data`
//! module plus `infrastructure/binance_websocket` reconnect-loop idiom.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::application::staleness::StalenessGuard;
use crate::domain::ports::ExchangeMarketDataClient;
use crate::domain::repositories::BarRepository;
use crate::domain::staleness::FeedType;
use crate::domain::types::{Bar, L1Quote, L2Book, Symbol, SymbolStatus, Tick};

use super::aggregator::SymbolAggregator;
use super::cache::TtlCache;

const TICK_CACHE_TTL_SECS: i64 = 300;
const L1_CACHE_TTL_SECS: i64 = 300;
const L2_CACHE_TTL_SECS: i64 = 300;
const GLOBAL_REST_FALLBACK_SECS: i64 = 60;

pub struct MarketDataPipeline {
    client: Arc<dyn ExchangeMarketDataClient>,
    bar_repo: Arc<dyn BarRepository>,
    staleness: Arc<StalenessGuard>,
    ticks: TtlCache<String, Vec<Tick>>,
    l1: TtlCache<String, L1Quote>,
    l2: TtlCache<String, L2Book>,
    aggregators: Mutex<HashMap<String, SymbolAggregator>>,
    symbol_status: RwLock<HashMap<String, SymbolStatus>>,
    bar_tx: broadcast::Sender<Bar>,
    last_global_tick_at: Mutex<chrono::DateTime<Utc>>,
}

impl MarketDataPipeline {
    pub fn new(client: Arc<dyn ExchangeMarketDataClient>, bar_repo: Arc<dyn BarRepository>, staleness: Arc<StalenessGuard>) -> Self {
        let (bar_tx, _) = broadcast::channel(1024);
        Self {
            client,
            bar_repo,
            staleness,
            ticks: TtlCache::new(TICK_CACHE_TTL_SECS),
            l1: TtlCache::new(L1_CACHE_TTL_SECS),
            l2: TtlCache::new(L2_CACHE_TTL_SECS),
            aggregators: Mutex::new(HashMap::new()),
            symbol_status: RwLock::new(HashMap::new()),
            bar_tx,
            last_global_tick_at: Mutex::new(Utc::now()),
        }
    }

    pub fn subscribe_bars(&self) -> broadcast::Receiver<Bar> {
        self.bar_tx.subscribe()
    }

    /// Idempotent subscribe; symbols the exchange rejects are marked
    /// `Unsupported` rather than failing the whole batch (§4.A).
    pub async fn subscribe(&self, symbols: &[Symbol]) -> Result<()> {
        let accepted = self.client.subscribe(symbols).await?;
        let accepted_keys: std::collections::HashSet<String> =
            accepted.iter().map(|s| s.canonical()).collect();
        let mut status = self.symbol_status.write().await;
        for symbol in symbols {
            let key = symbol.canonical();
            if accepted_keys.contains(&key) {
                status.insert(key, SymbolStatus::Active);
            } else {
                warn!(symbol = %symbol, "subscription rejected, marking unsupported");
                status.insert(key, SymbolStatus::Unsupported);
            }
        }
        Ok(())
    }

    pub async fn is_supported(&self, symbol: &Symbol) -> bool {
        matches!(
            self.symbol_status.read().await.get(&symbol.canonical()),
            Some(SymbolStatus::Active) | None
        )
    }

    /// Ingests one tick: updates the tick cache, runs it through the
    /// aggregator cascade, persists any finalized 1m/1h bars durably, and
    /// publishes all finalized bars on the broadcast channel.
    pub async fn on_tick(&self, tick: Tick) -> Result<()> {
        *self.last_global_tick_at.lock().unwrap() = Utc::now();
        self.staleness.record_update(&tick.symbol.exchange, &tick.symbol.canonical(), FeedType::Tick).await;

        let key = tick.symbol.canonical();
        {
            let mut guard = self.ticks.get_raw(&key).map(|(v, _)| v).unwrap_or_default();
            guard.push(tick.clone());
            if guard.len() > 500 {
                guard.drain(0..guard.len() - 500);
            }
            self.ticks.insert(key.clone(), guard);
        }

        let finalized = {
            let mut aggregators = self.aggregators.lock().unwrap();
            let agg = aggregators
                .entry(key.clone())
                .or_insert_with(|| SymbolAggregator::new(tick.symbol.clone()));
            agg.on_tick(&tick)
        };

        for bar in finalized {
            if !matches!(bar.period, crate::domain::types::BarPeriod::OneSecond) {
                self.bar_repo.save(&bar).await?;
            }
            let _ = self.bar_tx.send(bar);
        }

        Ok(())
    }

    pub fn on_l1(&self, symbol: &Symbol, quote: L1Quote) {
        if quote.is_valid() {
            self.l1.insert(symbol.canonical(), quote);
            let staleness = self.staleness.clone();
            let (exchange, canonical) = (symbol.exchange.clone(), symbol.canonical());
            tokio::spawn(async move { staleness.record_update(&exchange, &canonical, FeedType::L1).await });
        }
    }

    pub fn on_l2(&self, symbol: &Symbol, book: L2Book) {
        self.l2.insert(symbol.canonical(), book);
        let staleness = self.staleness.clone();
        let (exchange, canonical) = (symbol.exchange.clone(), symbol.canonical());
        tokio::spawn(async move { staleness.record_update(&exchange, &canonical, FeedType::L2).await });
    }

    pub fn get_l1(&self, symbol: &Symbol) -> Option<(L1Quote, i64)> {
        self.l1.get(&symbol.canonical())
    }

    pub fn get_l2(&self, symbol: &Symbol) -> Option<(L2Book, i64)> {
        self.l2.get(&symbol.canonical())
    }

    pub fn get_recent_ticks(&self, symbol: &Symbol, n: usize) -> Vec<Tick> {
        self.ticks
            .get(&symbol.canonical())
            .map(|(v, _)| {
                let start = v.len().saturating_sub(n);
                v[start..].to_vec()
            })
            .unwrap_or_default()
    }

    /// Global staleness check (§4.A): if no tick has landed for ANY
    /// non-quarantined symbol in 60s, the REST fallback loop should engage.
    pub fn should_engage_rest_fallback(&self) -> bool {
        let last = *self.last_global_tick_at.lock().unwrap();
        (Utc::now() - last).num_seconds() >= GLOBAL_REST_FALLBACK_SECS
    }

    /// One iteration of the REST fallback refresh for a given symbol,
    /// re-seeding the tick/L1 caches from REST when the WebSocket has gone
    /// quiet.
    pub async fn rest_refresh(&self, symbol: &Symbol) -> Result<()> {
        let quote = self.client.fetch_l1(symbol).await?;
        self.on_l1(symbol, quote);
        let ticks = self.client.fetch_recent_ticks(symbol, 1).await?;
        if let Some(tick) = ticks.into_iter().last() {
            self.on_tick(tick).await?;
        }
        info!(symbol = %symbol, "REST fallback refresh completed");
        Ok(())
    }
}
