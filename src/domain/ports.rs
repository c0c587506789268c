//! Exchange port traits (§6 External Interfaces). Grounded on the teacher's
//! `domain::ports::{MarketDataService, ExecutionService}` async-trait split.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::types::{L1Quote, L2Book, OrderSide, Symbol, Tick};

#[async_trait]
pub trait ExchangeMarketDataClient: Send + Sync {
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<Vec<Symbol>>;
    async fn fetch_recent_ticks(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Tick>>;
    async fn fetch_l1(&self, symbol: &Symbol) -> Result<L1Quote>;
    async fn fetch_l2(&self, symbol: &Symbol) -> Result<L2Book>;
}

#[derive(Debug, Clone)]
pub struct ExchangeOrderRequest {
    pub internal_order_id: Uuid,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOrderOutcome {
    Filled,
    Rejected(String),
    Pending,
}

#[async_trait]
pub trait ExchangeExecutionClient: Send + Sync {
    async fn place_order(&self, request: &ExchangeOrderRequest) -> Result<ExchangeOrderOutcome>;
    async fn cancel_order(&self, internal_order_id: Uuid) -> Result<()>;
    async fn order_status(&self, internal_order_id: Uuid) -> Result<ExchangeOrderOutcome>;
}
