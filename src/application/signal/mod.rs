pub mod engine;
pub mod sizing;

pub use engine::{SignalEngine, SignalEngineConfig, SignalOutcome};
