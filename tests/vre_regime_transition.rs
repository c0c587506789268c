//! Exercises the VRE hysteresis + K-confirmations + cooldown state machine
//! (§4.C) end to end through `VolatilityRegimeEngine::evaluate`, using a
//! hand-derived close series whose z-score sits deep inside the HIGH band so
//! the commit is not sensitive to floating-point rounding.

use std::sync::Arc;

use async_trait::async_trait;
use campaign_core::application::vre::{VolatilityRegimeEngine, VreParams};
use campaign_core::domain::repositories::VreDecisionRepository;
use campaign_core::domain::vre::{Regime, VreDecision};

struct NullDecisionRepo;

#[async_trait]
impl VreDecisionRepository for NullDecisionRepo {
    async fn save(&self, _decision: &VreDecision) -> anyhow::Result<()> {
        Ok(())
    }
}

fn small_window_params() -> VreParams {
    VreParams {
        w_short: 4,
        w_long: 8,
        k_confirmations: 3,
        cooldown_cycles: 2,
        ..VreParams::default()
    }
}

/// Eight log-returns of [0,0,0,0,+0.1,-0.1,+0.1,-0.1] give z ≈ 0.986 under
/// `w_short=4, w_long=8` — safely inside (z_normal_high=0.75, z_high_extreme=1.75)
/// so this classifies as HIGH regardless of f64 rounding noise.
fn closes_classifying_high() -> Vec<f64> {
    let up = 100.0 * std::f64::consts::E.powf(0.1);
    vec![100.0, 100.0, 100.0, 100.0, 100.0, up, 100.0, up, 100.0]
}

#[tokio::test]
async fn k_confirmations_then_cooldown_gates_a_regime_flip() {
    let engine = VolatilityRegimeEngine::new(small_window_params(), Arc::new(NullDecisionRepo));
    let closes = closes_classifying_high();
    let symbol = "mock:BTC/USD";

    // Calls 1-2: raw=HIGH accumulates confirmations but hasn't committed yet,
    // so the reported regime is still the prior NORMAL default.
    let d1 = engine.evaluate(symbol, &closes).await;
    assert_eq!(d1.regime, Regime::Normal);
    assert!(!d1.blocked_by_cooldown);
    assert_eq!(d1.raw_regime, Regime::High);

    let d2 = engine.evaluate(symbol, &closes).await;
    assert_eq!(d2.regime, Regime::Normal);
    assert!(!d2.blocked_by_cooldown);

    // Call 3: third confirmation commits the flip to HIGH and arms cooldown.
    let d3 = engine.evaluate(symbol, &closes).await;
    assert_eq!(d3.regime, Regime::High);
    assert!(!d3.blocked_by_cooldown);
    assert!(!d3.blocked_by_hysteresis);

    // Calls 4-5: cooldown_cycles=2 blocks any further transition attempt,
    // though the already-committed HIGH regime is still reported.
    let d4 = engine.evaluate(symbol, &closes).await;
    assert_eq!(d4.regime, Regime::High);
    assert!(d4.blocked_by_cooldown);

    let d5 = engine.evaluate(symbol, &closes).await;
    assert_eq!(d5.regime, Regime::High);
    assert!(d5.blocked_by_cooldown);

    // Call 6: cooldown exhausted; raw regime matches current, so it's a
    // steady-state match rather than a blocked transition.
    let d6 = engine.evaluate(symbol, &closes).await;
    assert_eq!(d6.regime, Regime::High);
    assert!(!d6.blocked_by_cooldown);
    assert!(!d6.blocked_by_hysteresis);

    assert!(engine.current_regime(symbol).await == Regime::High);
}

/// Seven flat steps (return=0) followed by one large jump gives
/// z = 0.4 / sqrt(0.05) = sqrt(20)*0.4 ≈ 1.78885 exactly, independent of the
/// jump's magnitude (the shape is self-similar under uniform scaling) — a
/// good margin above z_high_extreme=1.75 without depending on float rounding.
fn closes_classifying_extreme() -> Vec<f64> {
    vec![100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 200.0]
}

#[tokio::test]
async fn a_non_adjacent_raw_regime_is_blocked_by_hysteresis() {
    // A fresh context starts at NORMAL (rank 1). EXTREME (rank 3) is two
    // ranks away, so the hysteresis gate must refuse the jump outright
    // rather than let it through as an instant two-step transition.
    let engine = VolatilityRegimeEngine::new(small_window_params(), Arc::new(NullDecisionRepo));
    let symbol = "mock:ETH/USD";

    let decision = engine.evaluate(symbol, &closes_classifying_extreme()).await;
    assert_eq!(decision.raw_regime, Regime::Extreme);
    assert_eq!(decision.regime, Regime::Normal);
    assert!(decision.blocked_by_hysteresis);
    assert!(!decision.blocked_by_cooldown);
    assert_eq!(engine.current_regime(symbol).await, Regime::Normal);
}

#[tokio::test]
async fn insufficient_history_never_commits_a_transition() {
    let engine = VolatilityRegimeEngine::new(VreParams::default(), Arc::new(NullDecisionRepo));
    let short_closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 0.01).collect();
    for _ in 0..5 {
        let decision = engine.evaluate("mock:SOL/USD", &short_closes).await;
        assert_eq!(decision.raw_regime, Regime::Normal);
        assert_eq!(decision.regime, Regime::Normal);
    }
}
