//! Concrete exchange adapters implementing `domain::ports::{ExchangeMarketDataClient,
//! ExchangeExecutionClient}`. The exchange itself is an opaque external system
//! (§6 External Interfaces) rather than a named venue, so this module is a
//! generic WebSocket+REST pairing instead of a vendor-specific integration —
//! structurally grounded on the teacher's `alpaca_websocket` (reconnect loop,
//! broadcast fan-out) and `binance` (reqwest client, HMAC request signing)
//! modules, see DESIGN.md.

pub mod mock;
pub mod rest;
pub mod websocket;

pub use mock::MockExchangeClient;
pub use rest::RestExchangeClient;
pub use websocket::ExchangeWebSocketIngestor;
