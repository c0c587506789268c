pub mod engine;

pub use engine::{RawClassification, VolatilityRegimeEngine, VreParams};
