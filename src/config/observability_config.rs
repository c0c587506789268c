use anyhow::Result;
use std::env;

/// Only the emission contract is configured here; the HTTP exposition surface
/// is out of scope (§6, §9.6 — Non-goal: observability dashboards).
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub metrics_enabled: bool,
    pub log_filter: String,
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            metrics_enabled: env::var("METRICS_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            log_filter: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}
