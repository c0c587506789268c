//! Deterministic in-memory test double for both exchange ports. Grounded on
//! the teacher's `infrastructure::mock::MockMarketDataService`
//! (`Arc<RwLock<HashMap<..>>>` price/book state seeded by the test, no
//! network I/O) — used by integration tests to drive the campaign engine end
//! to end without a live exchange.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::ports::{ExchangeExecutionClient, ExchangeMarketDataClient, ExchangeOrderOutcome, ExchangeOrderRequest};
use crate::domain::types::{L1Quote, L2Book, L2Level, Symbol, Tick};

#[derive(Clone, Default)]
pub struct MockExchangeClient {
    supported: Arc<RwLock<HashMap<String, bool>>>,
    ticks: Arc<RwLock<HashMap<String, Vec<Tick>>>>,
    l1: Arc<RwLock<HashMap<String, L1Quote>>>,
    l2: Arc<RwLock<HashMap<String, L2Book>>>,
    fill_all: Arc<RwLock<bool>>,
    orders: Arc<RwLock<HashMap<Uuid, ExchangeOrderOutcome>>>,
}

impl MockExchangeClient {
    pub fn new() -> Self {
        Self {
            fill_all: Arc::new(RwLock::new(true)),
            ..Default::default()
        }
    }

    pub async fn reject_all_orders(&self) {
        *self.fill_all.write().await = false;
    }

    pub async fn set_supported(&self, symbol: &Symbol, supported: bool) {
        self.supported.write().await.insert(symbol.canonical(), supported);
    }

    pub async fn set_l1(&self, symbol: &Symbol, quote: L1Quote) {
        self.l1.write().await.insert(symbol.canonical(), quote);
    }

    pub async fn push_tick(&self, tick: Tick) {
        self.ticks.write().await.entry(tick.symbol.canonical()).or_default().push(tick);
    }

    pub fn quote(price: Decimal, spread: Decimal) -> L1Quote {
        L1Quote {
            bid_price: price - spread / Decimal::TWO,
            bid_qty: Decimal::ONE,
            ask_price: price + spread / Decimal::TWO,
            ask_qty: Decimal::ONE,
            ts: Utc::now(),
        }
    }
}

#[async_trait]
impl ExchangeMarketDataClient for MockExchangeClient {
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<Vec<Symbol>> {
        let supported = self.supported.read().await;
        Ok(symbols
            .iter()
            .filter(|s| *supported.get(&s.canonical()).unwrap_or(&true))
            .cloned()
            .collect())
    }

    async fn fetch_recent_ticks(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Tick>> {
        let ticks = self.ticks.read().await;
        Ok(ticks
            .get(&symbol.canonical())
            .map(|v| {
                let start = v.len().saturating_sub(limit);
                v[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn fetch_l1(&self, symbol: &Symbol) -> Result<L1Quote> {
        self.l1
            .read()
            .await
            .get(&symbol.canonical())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no mock quote seeded for {symbol}"))
    }

    async fn fetch_l2(&self, symbol: &Symbol) -> Result<L2Book> {
        if let Some(book) = self.l2.read().await.get(&symbol.canonical()) {
            return Ok(book.clone());
        }
        let quote = self.fetch_l1(symbol).await?;
        Ok(L2Book::sanitize(
            vec![L2Level { price: quote.bid_price, quantity: quote.bid_qty }],
            vec![L2Level { price: quote.ask_price, quantity: quote.ask_qty }],
            quote.ts,
        ))
    }
}

#[async_trait]
impl ExchangeExecutionClient for MockExchangeClient {
    async fn place_order(&self, request: &ExchangeOrderRequest) -> Result<ExchangeOrderOutcome> {
        let outcome = if *self.fill_all.read().await {
            ExchangeOrderOutcome::Filled
        } else {
            ExchangeOrderOutcome::Rejected("mock: orders disabled".to_string())
        };
        self.orders.write().await.insert(request.internal_order_id, outcome.clone());
        Ok(outcome)
    }

    async fn cancel_order(&self, internal_order_id: Uuid) -> Result<()> {
        self.orders.write().await.remove(&internal_order_id);
        Ok(())
    }

    async fn order_status(&self, internal_order_id: Uuid) -> Result<ExchangeOrderOutcome> {
        Ok(self
            .orders
            .read()
            .await
            .get(&internal_order_id)
            .cloned()
            .unwrap_or(ExchangeOrderOutcome::Pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unsupported_symbols_are_excluded_from_subscribe() {
        let client = MockExchangeClient::new();
        let btc = Symbol::new("mock", "BTC/USD");
        let eth = Symbol::new("mock", "ETH/USD");
        client.set_supported(&eth, false).await;

        let accepted = client.subscribe(&[btc.clone(), eth]).await.unwrap();
        assert_eq!(accepted, vec![btc]);
    }

    #[tokio::test]
    async fn place_order_respects_reject_switch() {
        let client = MockExchangeClient::new();
        let request = ExchangeOrderRequest {
            internal_order_id: Uuid::new_v4(),
            symbol: Symbol::new("mock", "BTC/USD"),
            side: crate::domain::types::OrderSide::Buy,
            quantity: Decimal::ONE,
            price: None,
            stop_price: None,
        };
        assert_eq!(client.place_order(&request).await.unwrap(), ExchangeOrderOutcome::Filled);

        client.reject_all_orders().await;
        let request2 = ExchangeOrderRequest { internal_order_id: Uuid::new_v4(), ..request };
        assert!(matches!(
            client.place_order(&request2).await.unwrap(),
            ExchangeOrderOutcome::Rejected(_)
        ));
    }
}
