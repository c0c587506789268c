//! Persistent WebSocket ingestion for ticks and L1/L2 snapshots. One
//! connection per instance, reconnected with a fixed backoff on failure;
//! subscription changes are pushed through a command channel rather than by
//! reconnecting. Grounded on the teacher's `infrastructure::alpaca_websocket::
//! AlpacaWebSocketManager` (`ConnectionState`, `SubscriptionCommand`,
//! `tokio::select!` over the read stream and the command channel, the
//! `spawn_connection_task` retry-forever loop).

use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{self, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{error, info, warn};

use crate::application::market_data::MarketDataPipeline;
use crate::domain::types::{L1Quote, L2Book, L2Level, Symbol, Tick};

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Subscribed,
}

#[derive(Debug)]
enum SubscriptionCommand {
    UpdateSymbols(Vec<String>),
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireMessage {
    Trade {
        symbol: String,
        price: String,
        quantity: String,
        #[serde(default)]
        ts_ms: Option<i64>,
    },
    Quote {
        symbol: String,
        bid_price: String,
        bid_qty: String,
        ask_price: String,
        ask_qty: String,
        #[serde(default)]
        ts_ms: Option<i64>,
    },
    Depth {
        symbol: String,
        bids: Vec<[String; 2]>,
        asks: Vec<[String; 2]>,
        #[serde(default)]
        ts_ms: Option<i64>,
    },
    Error {
        message: String,
    },
}

fn ts_from_ms(ts_ms: Option<i64>) -> chrono::DateTime<Utc> {
    ts_ms
        .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms))
        .unwrap_or_else(Utc::now)
}

/// Exchange name this ingestor attaches ticks/quotes to (a `Symbol` is
/// exchange-scoped, so the wire protocol only needs to carry the pair).
pub struct ExchangeWebSocketIngestor {
    ws_url: String,
    exchange: String,
    pipeline: Arc<MarketDataPipeline>,
    command_tx: mpsc::Sender<SubscriptionCommand>,
    state: Arc<RwLock<ConnectionState>>,
}

impl ExchangeWebSocketIngestor {
    pub fn spawn(ws_url: String, exchange: String, pipeline: Arc<MarketDataPipeline>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let ingestor = Self {
            ws_url,
            exchange,
            pipeline,
            command_tx,
            state,
        };
        ingestor.spawn_connection_task(command_rx);
        ingestor
    }

    pub async fn update_subscription(&self, pairs: Vec<String>) -> anyhow::Result<()> {
        self.command_tx
            .send(SubscriptionCommand::UpdateSymbols(pairs))
            .await
            .map_err(|_| anyhow::anyhow!("ingestor command channel closed"))
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    fn spawn_connection_task(&self, mut command_rx: mpsc::Receiver<SubscriptionCommand>) {
        let ws_url = self.ws_url.clone();
        let exchange = self.exchange.clone();
        let pipeline = self.pipeline.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            loop {
                info!(%ws_url, "exchange websocket: connecting");
                match Self::run_connection(&ws_url, &exchange, &pipeline, &state, &mut command_rx).await {
                    Ok(()) => {
                        info!("exchange websocket: connection ended cleanly");
                        break;
                    }
                    Err(err) => {
                        error!(error = %err, "exchange websocket: connection failed, retrying in 5s");
                        *state.write().await = ConnectionState::Disconnected;
                        time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });
    }

    async fn run_connection(
        ws_url: &str,
        exchange: &str,
        pipeline: &Arc<MarketDataPipeline>,
        state: &Arc<RwLock<ConnectionState>>,
        command_rx: &mut mpsc::Receiver<SubscriptionCommand>,
    ) -> anyhow::Result<()> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        *state.write().await = ConnectionState::Connected;
        info!("exchange websocket: connected");

        let (mut write, mut read) = ws_stream.split();
        let mut subscribed: Vec<String> = Vec::new();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_text(&text, exchange, pipeline).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("exchange websocket: stream closed");
                            return Ok(());
                        }
                        Some(Err(err)) => {
                            return Err(err.into());
                        }
                        _ => {}
                    }
                }
                Some(cmd) = command_rx.recv() => {
                    match cmd {
                        SubscriptionCommand::UpdateSymbols(pairs) => {
                            if pairs != subscribed {
                                let payload = serde_json::json!({
                                    "action": "subscribe",
                                    "pairs": pairs,
                                });
                                write.send(Message::Text(payload.to_string().into())).await?;
                                subscribed = pairs;
                                *state.write().await = ConnectionState::Subscribed;
                            }
                        }
                        SubscriptionCommand::Shutdown => {
                            info!("exchange websocket: shutdown requested");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_text(text: &str, exchange: &str, pipeline: &Arc<MarketDataPipeline>) {
        let messages: Vec<WireMessage> = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(_) => match serde_json::from_str::<WireMessage>(text) {
                Ok(one) => vec![one],
                Err(err) => {
                    warn!(error = %err, "exchange websocket: unparseable frame, dropping");
                    return;
                }
            },
        };

        for message in messages {
            match message {
                WireMessage::Trade { symbol, price, quantity, ts_ms } => {
                    let (Ok(price), Ok(quantity)) = (price.parse::<Decimal>(), quantity.parse::<Decimal>()) else {
                        continue;
                    };
                    let tick = Tick {
                        symbol: Symbol::new(exchange, symbol),
                        price,
                        quantity,
                        ts: ts_from_ms(ts_ms),
                    };
                    if let Err(err) = pipeline.on_tick(tick).await {
                        error!(error = %err, "exchange websocket: failed to ingest tick");
                    }
                }
                WireMessage::Quote { symbol, bid_price, bid_qty, ask_price, ask_qty, ts_ms } => {
                    let parsed = (
                        bid_price.parse::<Decimal>(),
                        bid_qty.parse::<Decimal>(),
                        ask_price.parse::<Decimal>(),
                        ask_qty.parse::<Decimal>(),
                    );
                    let (Ok(bid_price), Ok(bid_qty), Ok(ask_price), Ok(ask_qty)) = parsed else {
                        continue;
                    };
                    let quote = L1Quote {
                        bid_price,
                        bid_qty,
                        ask_price,
                        ask_qty,
                        ts: ts_from_ms(ts_ms),
                    };
                    pipeline.on_l1(&Symbol::new(exchange, symbol), quote);
                }
                WireMessage::Depth { symbol, bids, asks, ts_ms } => {
                    let parse_levels = |levels: Vec<[String; 2]>| -> Vec<L2Level> {
                        levels
                            .into_iter()
                            .filter_map(|[price, quantity]| {
                                Some(L2Level {
                                    price: price.parse().ok()?,
                                    quantity: quantity.parse().ok()?,
                                })
                            })
                            .collect()
                    };
                    let book = L2Book::sanitize(parse_levels(bids), parse_levels(asks), ts_from_ms(ts_ms));
                    pipeline.on_l2(&Symbol::new(exchange, symbol), book);
                }
                WireMessage::Error { message } => {
                    warn!(%message, "exchange websocket: venue reported error");
                }
            }
        }
    }
}

impl Drop for ExchangeWebSocketIngestor {
    fn drop(&mut self) {
        let _ = self.command_tx.try_send(SubscriptionCommand::Shutdown);
    }
}
