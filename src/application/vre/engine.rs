//! Volatility Regime Engine (§4.C). A pure classification core
//! (`classify_raw`) feeding a per-symbol hysteresis + K-confirmations +
//! cooldown state machine, matching the determinism requirement in §8: the
//! same close series and parameters always produce the same decision
//! sequence and decision hashes. Structurally grounded on the teacher's
//! `domain::market::market_regime::MarketRegimeDetector`, though the actual
//! classification algorithm here is specified independently (§4.C), not ADX/Hurst-based.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::repositories::VreDecisionRepository;
use crate::domain::vre::{Regime, RegimeMethod, VreContext, VreDecision};

#[derive(Debug, Clone, Copy)]
pub struct VreParams {
    pub w_short: usize,
    pub w_long: usize,
    pub k_confirmations: u32,
    pub cooldown_cycles: u32,
    pub z_low_normal: f64,
    pub z_normal_high: f64,
    pub z_high_extreme: f64,
    pub exit_extreme_high: f64,
    pub exit_high_normal: f64,
    pub exit_normal_low: f64,
    pub rv_ratio_low: f64,
    pub rv_ratio_high: f64,
    pub rv_ratio_extreme: f64,
    pub spike_z_threshold: f64,
    pub spike_guard_hours: i64,
    pub whipsaw_loss_count: usize,
    pub whipsaw_window_hours: i64,
    pub whipsaw_block_hours: i64,
}

impl Default for VreParams {
    fn default() -> Self {
        Self {
            w_short: 96,
            w_long: 672,
            k_confirmations: 3,
            cooldown_cycles: 8,
            z_low_normal: -0.75,
            z_normal_high: 0.75,
            z_high_extreme: 1.75,
            exit_extreme_high: 1.40,
            exit_high_normal: 0.55,
            exit_normal_low: -0.55,
            rv_ratio_low: 0.7,
            rv_ratio_high: 1.3,
            rv_ratio_extreme: 1.8,
            spike_z_threshold: 2.75,
            spike_guard_hours: 2,
            whipsaw_loss_count: 3,
            whipsaw_window_hours: 6,
            whipsaw_block_hours: 12,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RawClassification {
    pub regime: Regime,
    pub z: Option<f64>,
    pub rv_ratio: Option<f64>,
    pub rv_short: f64,
    pub rv_long: f64,
    pub method: RegimeMethod,
    pub confidence: f64,
}

fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

fn rms(returns: &[f64]) -> f64 {
    (returns.iter().map(|r| r * r).sum::<f64>() / returns.len() as f64).sqrt()
}

fn classify_by_z(z: f64, p: &VreParams) -> Regime {
    if z <= p.z_low_normal {
        Regime::Low
    } else if z <= p.z_normal_high {
        Regime::Normal
    } else if z <= p.z_high_extreme {
        Regime::High
    } else {
        Regime::Extreme
    }
}

fn classify_by_ratio(ratio: f64, p: &VreParams) -> Regime {
    if ratio <= p.rv_ratio_low {
        Regime::Low
    } else if ratio <= p.rv_ratio_high {
        Regime::Normal
    } else if ratio <= p.rv_ratio_extreme {
        Regime::High
    } else {
        Regime::Extreme
    }
}

/// Pure classification: given a full close-price series, compute the raw
/// (pre-hysteresis) regime. Boundary behavior (§8): fewer than `w_long` bars
/// of returns yields the default NORMAL regime at confidence 0.5.
pub fn classify_raw(closes: &[f64], p: &VreParams) -> RawClassification {
    let returns = log_returns(closes);
    if returns.len() < p.w_long {
        return RawClassification {
            regime: Regime::Normal,
            z: None,
            rv_ratio: None,
            rv_short: 0.0,
            rv_long: 0.0,
            method: RegimeMethod::ZScore,
            confidence: 0.5,
        };
    }

    let rv_short = rms(&returns[returns.len() - p.w_short..]);
    let rv_long = rms(&returns[returns.len() - p.w_long..]);

    let start = returns.len() - p.w_long;
    let mut rv_series = Vec::with_capacity(p.w_long - p.w_short + 1);
    for end in (start + p.w_short)..=returns.len() {
        rv_series.push(rms(&returns[end - p.w_short..end]));
    }
    let mean = rv_series.iter().sum::<f64>() / rv_series.len() as f64;
    let variance = if rv_series.len() > 1 {
        rv_series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (rv_series.len() as f64 - 1.0)
    } else {
        0.0
    };
    let std = variance.sqrt();

    if std > 1e-4 {
        let z = (rv_short - mean) / std;
        RawClassification {
            regime: classify_by_z(z, p),
            z: Some(z),
            rv_ratio: None,
            rv_short,
            rv_long,
            method: RegimeMethod::ZScore,
            confidence: (z.abs() / 2.0).min(1.0),
        }
    } else {
        let ratio = if rv_long.abs() > f64::EPSILON { rv_short / rv_long } else { 1.0 };
        RawClassification {
            regime: classify_by_ratio(ratio, p),
            z: None,
            rv_ratio: Some(ratio),
            rv_short,
            rv_long,
            method: RegimeMethod::RvRatio,
            confidence: (ratio - 1.0).abs().min(1.0),
        }
    }
}

fn decision_hash(symbol: &str, regime: Regime, z: Option<f64>, rv_ratio: Option<f64>, ts: chrono::DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_bytes());
    hasher.update(format!("{regime:?}").as_bytes());
    hasher.update(format!("{:.6}", z.unwrap_or(0.0)).as_bytes());
    hasher.update(format!("{:.6}", rv_ratio.unwrap_or(0.0)).as_bytes());
    hasher.update(ts.timestamp().to_le_bytes());
    hex::encode(hasher.finalize())
}

pub struct VolatilityRegimeEngine {
    params: VreParams,
    contexts: RwLock<HashMap<String, VreContext>>,
    decision_repo: Arc<dyn VreDecisionRepository>,
}

impl VolatilityRegimeEngine {
    pub fn new(params: VreParams, decision_repo: Arc<dyn VreDecisionRepository>) -> Self {
        Self {
            params,
            contexts: RwLock::new(HashMap::new()),
            decision_repo,
        }
    }

    /// Applies hysteresis + confirmations + cooldown to move a symbol's
    /// context toward `raw`, returning the committed `VreDecision`.
    pub async fn evaluate(&self, symbol: &str, closes: &[f64]) -> VreDecision {
        let raw = classify_raw(closes, &self.params);
        let now = Utc::now();

        let mut contexts = self.contexts.write().await;
        let ctx = contexts.entry(symbol.to_string()).or_insert_with(|| VreContext::new(symbol));

        let mut blocked_by_cooldown = false;
        let mut blocked_by_hysteresis = false;

        if ctx.cooldown_remaining > 0 {
            ctx.cooldown_remaining -= 1;
            ctx.cycles_in_regime += 1;
            blocked_by_cooldown = true;
        } else if raw.regime == ctx.current_regime {
            ctx.pending_regime = None;
            ctx.confirmations = 0;
            ctx.cycles_in_regime += 1;
        } else if !raw.regime.is_adjacent(ctx.current_regime) {
            blocked_by_hysteresis = true;
            ctx.cycles_in_regime += 1;
        } else {
            let exit_blocked = match (ctx.current_regime, raw.regime, raw.z) {
                (Regime::Extreme, Regime::High, Some(z)) => z > self.params.exit_extreme_high,
                (Regime::High, Regime::Normal, Some(z)) => z > self.params.exit_high_normal,
                (Regime::Normal, Regime::Low, Some(z)) => z > self.params.exit_normal_low,
                _ => false,
            };
            if exit_blocked {
                blocked_by_hysteresis = true;
                ctx.cycles_in_regime += 1;
            } else {
                if ctx.pending_regime == Some(raw.regime) {
                    ctx.confirmations += 1;
                } else {
                    ctx.pending_regime = Some(raw.regime);
                    ctx.confirmations = 1;
                }
                if ctx.confirmations >= self.params.k_confirmations {
                    ctx.current_regime = raw.regime;
                    ctx.pending_regime = None;
                    ctx.confirmations = 0;
                    ctx.cooldown_remaining = self.params.cooldown_cycles;
                    ctx.cycles_in_regime = 0;
                    ctx.last_regime_change = Some(now);
                    info!(symbol, regime = ?raw.regime, "VRE regime committed");
                } else {
                    ctx.cycles_in_regime += 1;
                }
            }
        }

        if let Some(z) = raw.z
            && z.abs() > self.params.spike_z_threshold
        {
            ctx.spike_guard_until = Some(now + chrono::Duration::hours(self.params.spike_guard_hours));
        }

        let committed_regime = ctx.current_regime;
        let hash = decision_hash(symbol, committed_regime, raw.z, raw.rv_ratio, now);

        let decision = VreDecision {
            symbol: symbol.to_string(),
            regime: committed_regime,
            raw_regime: raw.regime,
            method: raw.method,
            z_score: raw.z,
            rv_ratio: raw.rv_ratio,
            rv_short: raw.rv_short,
            rv_long: raw.rv_long,
            confidence: raw.confidence,
            blocked_by_cooldown,
            blocked_by_hysteresis,
            decision_hash: hash,
            ts: now,
        };

        drop(contexts);
        let _ = self.decision_repo.save(&decision).await;
        decision
    }

    pub async fn record_loss(&self, symbol: &str) {
        let mut contexts = self.contexts.write().await;
        let ctx = contexts.entry(symbol.to_string()).or_insert_with(|| VreContext::new(symbol));
        let now = Utc::now();
        ctx.recent_loss_ts.push(now);
        let window_start = now - chrono::Duration::hours(self.params.whipsaw_window_hours);
        ctx.recent_loss_ts.retain(|ts| *ts >= window_start);
        if ctx.recent_loss_ts.len() >= self.params.whipsaw_loss_count {
            ctx.whipsaw_blocked_until = Some(now + chrono::Duration::hours(self.params.whipsaw_block_hours));
        }
    }

    pub async fn is_open_blocked(&self, symbol: &str) -> bool {
        let contexts = self.contexts.read().await;
        let Some(ctx) = contexts.get(symbol) else { return false };
        let now = Utc::now();
        ctx.whipsaw_blocked_until.is_some_and(|t| t > now)
    }

    pub async fn is_pyramiding_blocked(&self, symbol: &str) -> bool {
        let contexts = self.contexts.read().await;
        let Some(ctx) = contexts.get(symbol) else { return false };
        let now = Utc::now();
        ctx.spike_guard_until.is_some_and(|t| t > now)
    }

    pub async fn current_regime(&self, symbol: &str) -> Regime {
        self.contexts
            .read()
            .await
            .get(symbol)
            .map(|c| c.current_regime)
            .unwrap_or(Regime::Normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullRepo;
    #[async_trait::async_trait]
    impl VreDecisionRepository for NullRepo {
        async fn save(&self, _decision: &VreDecision) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn insufficient_history_defaults_to_normal() {
        let params = VreParams::default();
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let raw = classify_raw(&closes, &params);
        assert_eq!(raw.regime, Regime::Normal);
        assert_eq!(raw.confidence, 0.5);
    }

    #[test]
    fn deterministic_replay_same_series_same_hash() {
        let params = VreParams::default();
        let mut closes = vec![100.0];
        for i in 0..800 {
            closes.push(closes[closes.len() - 1] * (1.0 + 0.0005 * ((i % 7) as f64 - 3.0)));
        }
        let a = classify_raw(&closes, &params);
        let b = classify_raw(&closes, &params);
        assert_eq!(a.regime, b.regime);
        assert_eq!(a.z.map(|z| (z * 1e6).round()), b.z.map(|z| (z * 1e6).round()));
    }

    #[tokio::test]
    async fn cooldown_blocks_immediate_flip_back() {
        let engine = VolatilityRegimeEngine::new(VreParams::default(), Arc::new(NullRepo));
        let mut closes = vec![100.0f64];
        for _ in 0..700 {
            closes.push(*closes.last().unwrap() * 1.0001);
        }
        // Drive several evaluations; regardless of outcome, cooldown_remaining
        // should never go negative and confirmations should reset after a commit.
        for _ in 0..10 {
            engine.evaluate("BTC/USD", &closes).await;
        }
        let regime = engine.current_regime("BTC/USD").await;
        assert!(matches!(regime, Regime::Low | Regime::Normal | Regime::High | Regime::Extreme));
    }
}
