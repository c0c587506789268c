//! Structured environment-variable configuration (§9.5), organized by domain:
//! Broker, Risk, Signal, Observability — mirroring the teacher's
//! `config::{BrokerEnvConfig, RiskEnvConfig, StrategyEnvConfig, ObservabilityEnvConfig}` split.

mod broker_config;
mod observability_config;
mod risk_env_config;
mod signal_env_config;

pub use broker_config::BrokerEnvConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use risk_env_config::RiskEnvConfig;
pub use signal_env_config::SignalEnvConfig;

use anyhow::Result;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Paper,
    Backtest,
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(Mode::Live),
            "paper" => Ok(Mode::Paper),
            "backtest" => Ok(Mode::Backtest),
            other => Err(anyhow::anyhow!("unknown mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub database_url: String,
    pub broker: BrokerEnvConfig,
    pub risk: RiskEnvConfig,
    pub signal: SignalEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mode = env::var("TRADING_MODE")
            .unwrap_or_else(|_| "paper".to_string())
            .parse()?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/campaign_core.db".to_string());

        Ok(Self {
            mode,
            database_url,
            broker: BrokerEnvConfig::from_env()?,
            risk: RiskEnvConfig::from_env()?,
            signal: SignalEnvConfig::from_env()?,
            observability: ObservabilityEnvConfig::from_env()?,
        })
    }

    pub fn to_risk_config(&self) -> crate::domain::campaign::CampaignRiskConfig {
        crate::domain::campaign::CampaignRiskConfig {
            max_drawdown_pct: self.risk.max_drawdown_pct,
            max_daily_loss_pct: self.risk.max_daily_loss_pct,
            rebalance_cadence_hours: self.risk.rebalance_cadence_hours,
        }
    }

    pub fn to_breaker_thresholds(&self) -> crate::domain::breaker::BreakerThresholds {
        crate::domain::breaker::BreakerThresholds {
            asset_consecutive_losses: self.risk.asset_consecutive_loss_limit,
            asset_cumulative_loss_usd: self.risk.asset_cumulative_loss_usd,
            cluster_loss_pct: self.risk.cluster_loss_pct,
            max_daily_loss_pct: self.risk.max_daily_loss_pct,
            asset_auto_reset_hours: self.risk.asset_auto_reset_hours,
            cluster_auto_reset_hours: self.risk.cluster_auto_reset_hours,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing() {
        assert_eq!("live".parse::<Mode>().unwrap(), Mode::Live);
        assert_eq!("PAPER".parse::<Mode>().unwrap(), Mode::Paper);
        assert!("bogus".parse::<Mode>().is_err());
    }
}
