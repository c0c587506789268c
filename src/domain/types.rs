//! Core market-data value types shared across the pipeline, VRE, and signal engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical exchange-scoped pair identifier, e.g. "BTC/USD".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub exchange: String,
    pub pair: String,
}

impl Symbol {
    pub fn new(exchange: impl Into<String>, pair: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            pair: pair.into(),
        }
    }

    pub fn canonical(&self) -> String {
        format!("{}:{}", self.exchange, self.pair)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolStatus {
    Active,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::TakeProfit => "TAKE_PROFIT",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
    PartiallyFilled,
    Cancelled,
    Expired,
    Rejected,
}

/// A single trade print from the exchange feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: Symbol,
    pub price: Decimal,
    pub quantity: Decimal,
    pub ts: DateTime<Utc>,
}

/// Best bid/ask snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct L1Quote {
    pub bid_price: Decimal,
    pub bid_qty: Decimal,
    pub ask_price: Decimal,
    pub ask_qty: Decimal,
    pub ts: DateTime<Utc>,
}

impl L1Quote {
    pub fn spread(&self) -> Decimal {
        self.ask_price - self.bid_price
    }

    pub fn spread_bps(&self) -> Decimal {
        if self.bid_price.is_zero() {
            return Decimal::ZERO;
        }
        let mid = (self.bid_price + self.ask_price) / Decimal::TWO;
        if mid.is_zero() {
            return Decimal::ZERO;
        }
        (self.spread() / mid) * Decimal::from(10_000)
    }

    /// bid <= ask invariant check, used by the pipeline to reject malformed quotes.
    pub fn is_valid(&self) -> bool {
        self.bid_price > Decimal::ZERO && self.ask_price >= self.bid_price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct L2Level {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Order book snapshot: bids descending by price, asks ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2Book {
    pub bids: Vec<L2Level>,
    pub asks: Vec<L2Level>,
    pub ts: DateTime<Utc>,
}

const L2_MAGNITUDE_CAP: &str = "1000000000000";

impl L2Book {
    /// Filters out levels that violate the wire-format invariants (§3 L2Book):
    /// non-finite/non-positive price or quantity, or magnitude beyond 1e12.
    pub fn sanitize(mut bids: Vec<L2Level>, mut asks: Vec<L2Level>, ts: DateTime<Utc>) -> Self {
        let cap: Decimal = L2_MAGNITUDE_CAP.parse().unwrap();
        let valid = |l: &L2Level| {
            l.price > Decimal::ZERO
                && l.quantity >= Decimal::ZERO
                && l.price.abs() <= cap
                && l.quantity.abs() <= cap
        };
        bids.retain(valid);
        asks.retain(valid);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self { bids, asks, ts }
    }

    pub fn best_bid(&self) -> Option<&L2Level> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&L2Level> {
        self.asks.first()
    }
}

/// Candle / bar period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarPeriod {
    OneSecond,
    OneMinute,
    OneHour,
}

impl BarPeriod {
    pub fn duration_seconds(self) -> i64 {
        match self {
            BarPeriod::OneSecond => 1,
            BarPeriod::OneMinute => 60,
            BarPeriod::OneHour => 3_600,
        }
    }

    pub fn floor(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.duration_seconds();
        let epoch = ts.timestamp();
        let floored = epoch - epoch.rem_euclid(secs);
        DateTime::from_timestamp(floored, 0).unwrap_or(ts)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: Symbol,
    pub period: BarPeriod,
    pub bar_ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: u64,
    pub vwap: Decimal,
}

impl Bar {
    /// Invariant from §3: low <= min(open,close) <= max(open,close) <= high.
    pub fn is_valid(&self) -> bool {
        let lo = self.open.min(self.close);
        let hi = self.open.max(self.close);
        self.low <= lo && lo <= hi && hi <= self.high
    }
}
