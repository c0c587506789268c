pub mod circuit_breaker_service;

pub use circuit_breaker_service::CircuitBreakerService;
