use anyhow::Result;
use std::env;
use std::fmt;

/// Exchange connectivity config. `Debug` is hand-rolled so secrets never leak
/// into logs (the teacher's `BrokerEnvConfig` follows the same discipline for
/// Binance/Alpaca credentials).
#[derive(Clone)]
pub struct BrokerEnvConfig {
    pub ws_url: String,
    pub rest_url: String,
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for BrokerEnvConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerEnvConfig")
            .field("ws_url", &self.ws_url)
            .field("rest_url", &self.rest_url)
            .field("api_key", &"***")
            .field("api_secret", &"***")
            .finish()
    }
}

impl BrokerEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            ws_url: env::var("EXCHANGE_WS_URL").unwrap_or_else(|_| "wss://stream.exchange.test/ws".to_string()),
            rest_url: env::var("EXCHANGE_REST_URL").unwrap_or_else(|_| "https://api.exchange.test".to_string()),
            api_key: env::var("EXCHANGE_API_KEY").unwrap_or_default(),
            api_secret: env::var("EXCHANGE_API_SECRET").unwrap_or_default(),
        })
    }
}
