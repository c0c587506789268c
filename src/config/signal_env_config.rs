use anyhow::Result;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

fn env_decimal(key: &str, default: Decimal) -> Result<Decimal> {
    match env::var(key) {
        Ok(v) => Ok(Decimal::from_str(&v)?),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32> {
    match env::var(key) {
        Ok(v) => Ok(v.parse()?),
        Err(_) => Ok(default),
    }
}

/// Signal engine defaults (§4.E, §9.5).
#[derive(Debug, Clone)]
pub struct SignalEnvConfig {
    pub ema_fast_period: u32,
    pub ema_slow_period: u32,
    pub atr_period: u32,
    pub long_mult: Decimal,
    pub short_mult: Decimal,
    pub tp1_mult: Decimal,
    pub tp2_mult: Decimal,
    pub sl_mult: Decimal,
    pub risk_per_trade_bps: u32,
}

impl SignalEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            ema_fast_period: env_u32("SIGNAL_EMA_FAST_PERIOD", 12)?,
            ema_slow_period: env_u32("SIGNAL_EMA_SLOW_PERIOD", 36)?,
            atr_period: env_u32("SIGNAL_ATR_PERIOD", 14)?,
            long_mult: env_decimal("SIGNAL_LONG_MULT", Decimal::new(20, 1))?,
            short_mult: env_decimal("SIGNAL_SHORT_MULT", Decimal::new(20, 1))?,
            tp1_mult: env_decimal("SIGNAL_TP1_MULT", Decimal::new(30, 1))?,
            tp2_mult: env_decimal("SIGNAL_TP2_MULT", Decimal::new(50, 1))?,
            sl_mult: env_decimal("SIGNAL_SL_MULT", Decimal::new(10, 1))?,
            risk_per_trade_bps: env_u32("SIGNAL_RISK_PER_TRADE_BPS", 50)?,
        })
    }
}
