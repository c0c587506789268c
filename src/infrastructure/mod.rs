//! Outbound adapters: exchange connectivity, durable persistence, and the
//! process-wide event bus. Grounded on the teacher's
//! `infrastructure::{binance, alpaca_websocket, persistence, event_bus}` split.

pub mod event_bus;
pub mod exchange;
pub mod persistence;
