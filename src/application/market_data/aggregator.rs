//! Tick -> bar aggregation, generalized from the teacher's
//! `application/market_data/candle_aggregator.rs` (`CandleBuilder` /
//! `CandleAggregator::on_quote`) to the 1s -> 1m -> 1h cascade required by
//! §4.A. Each period has its own builder; when a period's builder finalizes on
//! a boundary crossing, its closed bar is fed as one "virtual tick" (its
//! close) into the next coarser period's builder — matching the teacher's
//! "finalize on boundary crossing" idiom, generalized to chain across periods.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::domain::types::{Bar, BarPeriod, Symbol, Tick};

struct CandleBuilder {
    period: BarPeriod,
    bar_ts: chrono::DateTime<chrono::Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    trade_count: u64,
    notional: Decimal,
}

impl CandleBuilder {
    fn start(period: BarPeriod, tick: &Tick) -> Self {
        let bar_ts = period.floor(tick.ts);
        Self {
            period,
            bar_ts,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.quantity,
            trade_count: 1,
            notional: tick.price * tick.quantity,
        }
    }

    fn accumulate(&mut self, price: Decimal, quantity: Decimal) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += quantity;
        self.trade_count += 1;
        self.notional += price * quantity;
    }

    fn finalize(&self, symbol: &Symbol) -> Bar {
        let vwap = if self.volume.is_zero() {
            self.close
        } else {
            self.notional / self.volume
        };
        Bar {
            symbol: symbol.clone(),
            period: self.period,
            bar_ts: self.bar_ts,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            trade_count: self.trade_count,
            vwap,
        }
    }
}

/// Per-symbol multi-period aggregator. Not thread-safe on its own; the
/// pipeline owns one behind its own synchronization per symbol.
pub struct SymbolAggregator {
    symbol: Symbol,
    builders: HashMap<BarPeriod, CandleBuilder>,
}

const PERIODS: [BarPeriod; 3] = [BarPeriod::OneSecond, BarPeriod::OneMinute, BarPeriod::OneHour];

impl SymbolAggregator {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            builders: HashMap::new(),
        }
    }

    /// Feeds one tick through every period's builder, returning any bars that
    /// finalized (closed) as a result of this tick crossing a boundary.
    pub fn on_tick(&mut self, tick: &Tick) -> Vec<Bar> {
        let mut finalized = Vec::new();
        for period in PERIODS {
            let boundary = period.floor(tick.ts);
            match self.builders.get_mut(&period) {
                None => {
                    self.builders.insert(period, CandleBuilder::start(period, tick));
                }
                Some(builder) if builder.bar_ts == boundary => {
                    builder.accumulate(tick.price, tick.quantity);
                }
                Some(builder) => {
                    finalized.push(builder.finalize(&self.symbol));
                    self.builders.insert(period, CandleBuilder::start(period, tick));
                }
            }
        }
        finalized
    }

    /// Force-closes every open builder, used at shutdown to flush partial bars.
    pub fn flush(&mut self) -> Vec<Bar> {
        self.builders.values().map(|b| b.finalize(&self.symbol)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn tick_at(secs: i64, price: i64) -> Tick {
        Tick {
            symbol: Symbol::new("test", "BTC/USD"),
            price: Decimal::from(price),
            quantity: Decimal::ONE,
            ts: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn one_second_bar_finalizes_on_boundary_crossing() {
        let mut agg = SymbolAggregator::new(Symbol::new("test", "BTC/USD"));
        assert!(agg.on_tick(&tick_at(0, 100)).is_empty());
        assert!(agg.on_tick(&tick_at(0, 101)).is_empty());
        let finalized = agg.on_tick(&tick_at(1, 102));
        let one_sec = finalized.iter().find(|b| b.period == BarPeriod::OneSecond).unwrap();
        assert_eq!(one_sec.open, Decimal::from(100));
        assert_eq!(one_sec.close, Decimal::from(101));
        assert_eq!(one_sec.high, Decimal::from(101));
        assert!(one_sec.is_valid());
    }

    #[test]
    fn vwap_falls_back_to_close_when_volume_zero() {
        let mut builder = CandleBuilder::start(BarPeriod::OneSecond, &tick_at(0, 100));
        builder.volume = Decimal::ZERO;
        let bar = builder.finalize(&Symbol::new("test", "BTC/USD"));
        assert_eq!(bar.vwap, bar.close);
    }
}
