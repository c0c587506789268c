//! Signal Engine (§4.E). Computes EMA12/EMA36/ATR(14) from 1-minute bars via
//! the `ta` crate, matching the teacher's
//! `application::monitoring::feature_engineering_service::TechnicalFeatureEngineeringService`
//! idiom of wrapping `ta` indicators behind `Next<f64>`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use ta::Next;
use ta::indicators::{AverageTrueRange, ExponentialMovingAverage};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::SizingError;
use crate::domain::repositories::{SignalConfigRepository, SignalRepository};
use crate::domain::signal::{Signal, SignalConfig, SignalStatus};
use crate::domain::types::{Bar, Side};
use crate::domain::vre::{InvestorProfile, Regime};

use super::sizing::compute_size;

struct SymbolIndicators {
    ema_fast: ExponentialMovingAverage,
    ema_slow: ExponentialMovingAverage,
    atr: AverageTrueRange,
    last_ema_fast: f64,
    last_ema_slow: f64,
    last_atr: f64,
}

impl SymbolIndicators {
    fn new(fast_period: usize, slow_period: usize, atr_period: usize) -> Self {
        Self {
            ema_fast: ExponentialMovingAverage::new(fast_period).expect("valid EMA period"),
            ema_slow: ExponentialMovingAverage::new(slow_period).expect("valid EMA period"),
            atr: AverageTrueRange::new(atr_period).expect("valid ATR period"),
            last_ema_fast: 0.0,
            last_ema_slow: 0.0,
            last_atr: 0.0,
        }
    }

    fn update(&mut self, bar: &Bar) {
        let close = bar.close.to_f64().unwrap_or_default();
        self.last_ema_fast = self.ema_fast.next(close);
        self.last_ema_slow = self.ema_slow.next(close);
        self.last_atr = self.atr.next(close);
    }
}

pub struct SignalEngineConfig {
    pub ema_fast_period: usize,
    pub ema_slow_period: usize,
    pub atr_period: usize,
}

pub struct SignalEngine {
    config: SignalEngineConfig,
    indicators: RwLock<HashMap<String, SymbolIndicators>>,
    config_repo: Arc<dyn SignalConfigRepository>,
    signal_repo: Arc<dyn SignalRepository>,
}

pub enum SignalOutcome {
    None,
    Generated(Box<Signal>),
}

impl SignalEngine {
    pub fn new(config: SignalEngineConfig, config_repo: Arc<dyn SignalConfigRepository>, signal_repo: Arc<dyn SignalRepository>) -> Self {
        Self {
            config,
            indicators: RwLock::new(HashMap::new()),
            config_repo,
            signal_repo,
        }
    }

    /// Feeds a closed 1-minute bar into this symbol's indicator stack.
    pub async fn on_bar(&self, bar: &Bar) {
        let mut indicators = self.indicators.write().await;
        let key = bar.symbol.canonical();
        let entry = indicators
            .entry(key)
            .or_insert_with(|| SymbolIndicators::new(self.config.ema_fast_period, self.config.ema_slow_period, self.config.atr_period));
        entry.update(bar);
    }

    /// Evaluates the long/short condition for (portfolio, symbol) against the
    /// current price and, if triggered, produces an idempotent `Signal` with
    /// an immutable config snapshot (§4.E, §9.1).
    pub async fn evaluate(
        &self,
        portfolio_id: Uuid,
        symbol: &str,
        price: Decimal,
        equity: Decimal,
        profile: InvestorProfile,
        regime: Regime,
    ) -> anyhow::Result<SignalOutcome> {
        let Some(config) = self.config_repo.get(portfolio_id, symbol).await? else {
            return Ok(SignalOutcome::None);
        };
        if !config.enabled {
            return Ok(SignalOutcome::None);
        }

        if let Some(existing) = self.signal_repo.find_pending(portfolio_id, symbol).await?
            && existing.status == SignalStatus::Pending
        {
            // Idempotency (§4.E): at most one pending signal per (portfolio, symbol).
            return Ok(SignalOutcome::None);
        }

        let (ema_fast, ema_slow, atr) = {
            let indicators = self.indicators.read().await;
            match indicators.get(symbol) {
                Some(i) => (i.last_ema_fast, i.last_ema_slow, i.last_atr),
                None => return Ok(SignalOutcome::None),
            }
        };
        if atr <= 0.0 {
            return Ok(SignalOutcome::None);
        }

        let price_f = price.to_f64().unwrap_or_default();
        let long_threshold = config.long_mult.to_f64().unwrap_or_default() * atr;
        let short_threshold = config.short_mult.to_f64().unwrap_or_default() * atr;

        let side = if (price_f - ema_fast) > long_threshold {
            Side::Long
        } else if (ema_fast - price_f) > short_threshold {
            Side::Short
        } else {
            return Ok(SignalOutcome::None);
        };

        let atr_dec = Decimal::try_from(atr).unwrap_or_default();
        let (tp1, tp2, sl) = match side {
            Side::Long => (
                price + config.tp1_mult * atr_dec,
                price + config.tp2_mult * atr_dec,
                price - config.sl_mult * atr_dec,
            ),
            Side::Short => (
                price - config.tp1_mult * atr_dec,
                price - config.tp2_mult * atr_dec,
                price + config.sl_mult * atr_dec,
            ),
        };

        let size = match compute_size(equity, config.risk_per_trade_bps, price, sl, profile, regime) {
            Ok(size) => size,
            Err(SizingError::InvalidSizing { .. }) | Err(SizingError::NonPositiveSize) => {
                return Ok(SignalOutcome::None);
            }
        };

        let signal = Signal {
            id: Uuid::new_v4(),
            portfolio_id,
            symbol: symbol.to_string(),
            side,
            price,
            ema_fast: Decimal::try_from(ema_fast).unwrap_or_default(),
            ema_slow: Decimal::try_from(ema_slow).unwrap_or_default(),
            atr: atr_dec,
            tp1,
            tp2,
            sl,
            size,
            risk_per_trade_bps_used: config.risk_per_trade_bps,
            config_snapshot: config,
            circuit_breaker_state_snapshot: "allowed".to_string(),
            status: SignalStatus::Pending,
            execution_reason: None,
            expiration_reason: None,
            generated_at: Utc::now(),
        };

        self.signal_repo.save(&signal).await?;
        Ok(SignalOutcome::Generated(Box::new(signal)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct NullConfigRepo(Option<SignalConfig>);
    #[async_trait::async_trait]
    impl SignalConfigRepository for NullConfigRepo {
        async fn upsert(&self, _config: &SignalConfig) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get(&self, _portfolio_id: Uuid, _symbol: &str) -> anyhow::Result<Option<SignalConfig>> {
            Ok(self.0.clone())
        }
    }
    struct NullSignalRepo;
    #[async_trait::async_trait]
    impl SignalRepository for NullSignalRepo {
        async fn save(&self, _signal: &Signal) -> anyhow::Result<()> {
            Ok(())
        }
        async fn find_pending(&self, _portfolio_id: Uuid, _symbol: &str) -> anyhow::Result<Option<Signal>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn no_signal_without_indicator_history() {
        let portfolio = Uuid::new_v4();
        let config = SignalConfig::default_for(portfolio, "BTC/USD");
        let engine = SignalEngine::new(
            SignalEngineConfig { ema_fast_period: 12, ema_slow_period: 36, atr_period: 14 },
            Arc::new(NullConfigRepo(Some(config))),
            Arc::new(NullSignalRepo),
        );
        let outcome = engine
            .evaluate(portfolio, "BTC/USD", dec!(50000), dec!(10000), InvestorProfile::Moderate, Regime::Normal)
            .await
            .unwrap();
        assert!(matches!(outcome, SignalOutcome::None));
    }
}
