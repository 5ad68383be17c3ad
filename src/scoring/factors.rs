//! Pure scoring math. Everything here is deterministic over its inputs so
//! the scorer itself stays a thin orchestration layer over the stores.

use crate::scoring::policy::ScoringPolicy;
use crate::signals::{FactorKind, RiskSignal, SignalType};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One signal's contribution to the overall score, used for ranking the
/// top contributors and for the persisted score breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct SignalContribution {
    pub signal_id: String,
    pub signal_type: SignalType,
    pub factor: FactorKind,
    /// Decayed, weighted input to the factor sum.
    pub weighted_input: f64,
    /// Input scaled by the factor's weight in the overall score.
    pub contribution: f64,
}

/// Exponential decay by signal age: halves every `half_life_days`.
pub fn decay_multiplier(age_days: f64, half_life_days: f64) -> f64 {
    let age = age_days.max(0.0);
    0.5_f64.powf(age / half_life_days)
}

/// Confidence after the obfuscation bonus, capped at 1.0. Signals that
/// arrive with obfuscation flags are treated as more certain: evasion
/// itself is evidence.
pub fn effective_confidence(signal: &RiskSignal, obfuscation_bonus: f64) -> f64 {
    if signal.obfuscation_flags.is_empty() {
        signal.confidence
    } else {
        (signal.confidence + obfuscation_bonus).min(1.0)
    }
}

/// Map an unbounded factor sum onto [0,100) with diminishing returns.
pub fn saturating_factor(sum: f64, saturation: f64) -> f64 {
    100.0 * (1.0 - (-sum / saturation).exp())
}

/// Compute per-signal weighted inputs and the operational/behavioral sums.
pub fn factor_inputs(
    signals: &[RiskSignal],
    policy: &ScoringPolicy,
    now: DateTime<Utc>,
) -> (Vec<SignalContribution>, f64, f64) {
    let mut contributions = Vec::with_capacity(signals.len());
    let mut operational_sum = 0.0;
    let mut behavioral_sum = 0.0;

    for signal in signals {
        let age_days = (now - signal.detected_at).num_seconds() as f64 / 86_400.0;
        let decay = decay_multiplier(age_days, policy.decay_half_life_days);
        let confidence = effective_confidence(signal, policy.obfuscation_bonus);
        let weighted_input = signal.signal_type.base_weight() * confidence * decay;

        let factor = signal.signal_type.factor();
        let factor_weight = match factor {
            FactorKind::Operational => {
                operational_sum += weighted_input;
                policy.operational_weight
            }
            FactorKind::Behavioral => {
                behavioral_sum += weighted_input;
                policy.behavioral_weight
            }
        };

        contributions.push(SignalContribution {
            signal_id: signal.id.clone(),
            signal_type: signal.signal_type,
            factor,
            weighted_input,
            contribution: weighted_input * factor_weight,
        });
    }

    contributions.sort_by(|a, b| {
        b.contribution
            .partial_cmp(&a.contribution)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    (contributions, operational_sum, behavioral_sum)
}

/// Network factor: risk bleeding over from directly connected users.
/// `neighbors` pairs each neighbor's latest overall score with the edge
/// strength. The result is clamped to [0,100].
pub fn network_factor(neighbors: &[(f64, f64)], contagion_factor: f64) -> f64 {
    let raw: f64 = neighbors
        .iter()
        .map(|(score, strength)| score * strength * contagion_factor)
        .sum();
    raw.clamp(0.0, 100.0)
}
