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

fn env_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(v) => Ok(v.parse()?),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32> {
    match env::var(key) {
        Ok(v) => Ok(v.parse()?),
        Err(_) => Ok(default),
    }
}

/// Circuit breaker / drawdown / staleness thresholds (§4.B, §4.D defaults).
#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    pub max_drawdown_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub rebalance_cadence_hours: i64,
    pub asset_consecutive_loss_limit: u32,
    pub asset_cumulative_loss_usd: Decimal,
    pub cluster_loss_pct: Decimal,
    pub asset_auto_reset_hours: i64,
    pub cluster_auto_reset_hours: i64,
    pub staleness_warn_secs: i64,
    pub staleness_hard_secs: i64,
    pub staleness_kill_secs: i64,
    pub staleness_quarantine_secs: i64,
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_drawdown_pct: env_decimal("RISK_MAX_DRAWDOWN_PCT", Decimal::new(10, 2))?,
            max_daily_loss_pct: env_decimal("RISK_MAX_DAILY_LOSS_PCT", Decimal::new(5, 2))?,
            rebalance_cadence_hours: env_i64("RISK_REBALANCE_CADENCE_HOURS", 8)?,
            asset_consecutive_loss_limit: env_u32("RISK_ASSET_CONSECUTIVE_LOSS_LIMIT", 3)?,
            asset_cumulative_loss_usd: env_decimal("RISK_ASSET_CUMULATIVE_LOSS_USD", Decimal::from(500))?,
            cluster_loss_pct: env_decimal("RISK_CLUSTER_LOSS_PCT", Decimal::new(15, 2))?,
            asset_auto_reset_hours: env_i64("RISK_ASSET_AUTO_RESET_HOURS", 24)?,
            cluster_auto_reset_hours: env_i64("RISK_CLUSTER_AUTO_RESET_HOURS", 12)?,
            staleness_warn_secs: env_i64("STALENESS_WARN_SECS", 4)?,
            staleness_hard_secs: env_i64("STALENESS_HARD_SECS", 12)?,
            staleness_kill_secs: env_i64("STALENESS_KILL_SECS", 60)?,
            staleness_quarantine_secs: env_i64("STALENESS_QUARANTINE_SECS", 300)?,
        })
    }
}
