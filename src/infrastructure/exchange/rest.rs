//! REST adapter implementing both exchange ports: snapshot reads for the
//! market-data fallback path and signed order placement for execution.
//! Grounded on the teacher's `infrastructure::binance::{market_data,
//! execution}` (reqwest client with connection pooling/timeouts, builder
//! construction, HMAC-SHA256 request signing via `hmac`+`sha2`+`hex`) — the
//! venue itself is opaque (§6), so the wire shapes here are generic rather
//! than a specific exchange's REST dialect.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::domain::ports::{ExchangeExecutionClient, ExchangeMarketDataClient, ExchangeOrderOutcome, ExchangeOrderRequest};
use crate::domain::types::{L1Quote, L2Book, L2Level, OrderSide, Symbol, Tick};

type HmacSha256 = Hmac<Sha256>;

fn build_client() -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
    let client = Client::builder()
        .pool_max_idle_per_host(5)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| Client::new());
    ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

pub struct RestExchangeClient {
    client: ClientWithMiddleware,
    rest_url: String,
    api_key: String,
    api_secret: String,
}

impl RestExchangeClient {
    pub fn new(rest_url: String, api_key: String, api_secret: String) -> Self {
        Self {
            client: build_client(),
            rest_url,
            api_key,
            api_secret,
        }
    }

    fn sign(&self, query_string: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts a key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let query_string = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query_string);
        format!("{query_string}&signature={signature}")
    }
}

#[derive(Debug, Deserialize)]
struct WireTick {
    price: Decimal,
    quantity: Decimal,
    ts_ms: i64,
}

#[derive(Debug, Deserialize)]
struct WireL1 {
    bid_price: Decimal,
    bid_qty: Decimal,
    ask_price: Decimal,
    ask_qty: Decimal,
    ts_ms: i64,
}

#[derive(Debug, Deserialize)]
struct WireL2Level {
    price: Decimal,
    quantity: Decimal,
}

#[derive(Debug, Deserialize)]
struct WireL2 {
    bids: Vec<WireL2Level>,
    asks: Vec<WireL2Level>,
    ts_ms: i64,
}

fn ts(ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
}

#[async_trait]
impl ExchangeMarketDataClient for RestExchangeClient {
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<Vec<Symbol>> {
        // REST has no subscription concept; a GET against each symbol's
        // ticker endpoint doubles as a support probe.
        let mut accepted = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let url = format!("{}/v1/ticker?symbol={}", self.rest_url, symbol.pair);
            let response = self.client.get(&url).send().await;
            match response {
                Ok(resp) if resp.status().is_success() => accepted.push(symbol.clone()),
                _ => tracing::warn!(symbol = %symbol, "exchange rest: symbol not supported"),
            }
        }
        Ok(accepted)
    }

    async fn fetch_recent_ticks(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Tick>> {
        let url = format!("{}/v1/trades?symbol={}&limit={}", self.rest_url, symbol.pair, limit);
        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .context("fetch_recent_ticks request failed")?;
        if !response.status().is_success() {
            bail!("fetch_recent_ticks returned status {}", response.status());
        }
        let wire: Vec<WireTick> = response.json().await?;
        Ok(wire
            .into_iter()
            .map(|w| Tick {
                symbol: symbol.clone(),
                price: w.price,
                quantity: w.quantity,
                ts: ts(w.ts_ms),
            })
            .collect())
    }

    async fn fetch_l1(&self, symbol: &Symbol) -> Result<L1Quote> {
        let url = format!("{}/v1/quote?symbol={}", self.rest_url, symbol.pair);
        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .context("fetch_l1 request failed")?;
        if !response.status().is_success() {
            bail!("fetch_l1 returned status {}", response.status());
        }
        let wire: WireL1 = response.json().await?;
        Ok(L1Quote {
            bid_price: wire.bid_price,
            bid_qty: wire.bid_qty,
            ask_price: wire.ask_price,
            ask_qty: wire.ask_qty,
            ts: ts(wire.ts_ms),
        })
    }

    async fn fetch_l2(&self, symbol: &Symbol) -> Result<L2Book> {
        let url = format!("{}/v1/depth?symbol={}", self.rest_url, symbol.pair);
        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .context("fetch_l2 request failed")?;
        if !response.status().is_success() {
            bail!("fetch_l2 returned status {}", response.status());
        }
        let wire: WireL2 = response.json().await?;
        let to_levels = |levels: Vec<WireL2Level>| {
            levels
                .into_iter()
                .map(|l| L2Level { price: l.price, quantity: l.quantity })
                .collect()
        };
        Ok(L2Book::sanitize(to_levels(wire.bids), to_levels(wire.asks), ts(wire.ts_ms)))
    }
}

#[derive(Debug, Deserialize)]
struct WireOrderAck {
    status: String,
    #[serde(default)]
    reject_reason: Option<String>,
}

fn parse_outcome(ack: WireOrderAck) -> ExchangeOrderOutcome {
    match ack.status.as_str() {
        "FILLED" => ExchangeOrderOutcome::Filled,
        "REJECTED" => ExchangeOrderOutcome::Rejected(ack.reject_reason.unwrap_or_else(|| "rejected".to_string())),
        _ => ExchangeOrderOutcome::Pending,
    }
}

#[async_trait]
impl ExchangeExecutionClient for RestExchangeClient {
    async fn place_order(&self, request: &ExchangeOrderRequest) -> Result<ExchangeOrderOutcome> {
        let side = match request.side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let timestamp = chrono::Utc::now().timestamp_millis();
        let mut params = vec![
            ("symbol", request.symbol.pair.clone()),
            ("side", side.to_string()),
            ("quantity", request.quantity.to_string()),
            ("clientOrderId", request.internal_order_id.to_string()),
            ("timestamp", timestamp.to_string()),
        ];
        if let Some(price) = request.price {
            params.push(("price", price.to_string()));
        }
        if let Some(stop_price) = request.stop_price {
            params.push(("stopPrice", stop_price.to_string()));
        }

        let signed = self.signed_query(&params);
        let url = format!("{}/v1/order?{}", self.rest_url, signed);

        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .context("place_order request failed")?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(ExchangeOrderOutcome::Rejected(body));
        }

        let ack: WireOrderAck = response.json().await?;
        Ok(parse_outcome(ack))
    }

    async fn cancel_order(&self, internal_order_id: Uuid) -> Result<()> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let params = vec![
            ("clientOrderId", internal_order_id.to_string()),
            ("timestamp", timestamp.to_string()),
        ];
        let signed = self.signed_query(&params);
        let url = format!("{}/v1/order?{}", self.rest_url, signed);

        let response = self
            .client
            .delete(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .context("cancel_order request failed")?;

        if !response.status().is_success() {
            bail!("cancel_order returned status {}", response.status());
        }
        Ok(())
    }

    async fn order_status(&self, internal_order_id: Uuid) -> Result<ExchangeOrderOutcome> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let params = vec![
            ("clientOrderId", internal_order_id.to_string()),
            ("timestamp", timestamp.to_string()),
        ];
        let signed = self.signed_query(&params);
        let url = format!("{}/v1/order?{}", self.rest_url, signed);

        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .context("order_status request failed")?;

        if !response.status().is_success() {
            bail!("order_status returned status {}", response.status());
        }
        let ack: WireOrderAck = response.json().await?;
        Ok(parse_outcome(ack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let client = RestExchangeClient::new(
            "https://api.exchange.test".to_string(),
            "key".to_string(),
            "secret".to_string(),
        );
        let sig1 = client.sign("symbol=BTCUSD&timestamp=1");
        let sig2 = client.sign("symbol=BTCUSD&timestamp=1");
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);
        assert!(sig1.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
