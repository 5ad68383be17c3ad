use crate::error::{EngineError, EngineResult};
use crate::scoring::tiers::TierBands;
use serde::{Deserialize, Serialize};

/// All tunable scoring constants in one place. Constructed from config at
/// startup and passed into the scorer, so tests can build variants without
/// touching the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringPolicy {
    /// Weight of the operational factor in the overall score.
    pub operational_weight: f64,
    /// Weight of the behavioral factor in the overall score.
    pub behavioral_weight: f64,
    /// Weight of the network factor in the overall score.
    pub network_weight: f64,
    /// Half-life in days for signal confidence decay.
    pub decay_half_life_days: f64,
    /// Saturation constant for the diminishing-returns factor curve.
    pub saturation: f64,
    /// Confidence bonus applied when a signal carries obfuscation flags.
    pub obfuscation_bonus: f64,
    /// Fraction of a neighbor's score that bleeds into the network factor.
    pub contagion_factor: f64,
    /// Edges below this strength are ignored by the network factor.
    pub min_edge_strength: f64,
    /// Only signals detected within this many days are scored.
    pub signal_window_days: i64,
    /// Score deltas within this magnitude count as a stable trend.
    pub trend_epsilon: f64,
    /// How many top contributing signals are recorded per calculation.
    pub top_contributor_limit: usize,
    pub bands: TierBands,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            operational_weight: 0.30,
            behavioral_weight: 0.40,
            network_weight: 0.30,
            decay_half_life_days: 14.0,
            saturation: 0.75,
            obfuscation_bonus: 0.15,
            contagion_factor: 0.15,
            min_edge_strength: 0.1,
            signal_window_days: 90,
            trend_epsilon: 5.0,
            top_contributor_limit: 5,
            bands: TierBands::default(),
        }
    }
}

impl ScoringPolicy {
    pub fn validate(&self) -> EngineResult<()> {
        let weights = [
            self.operational_weight,
            self.behavioral_weight,
            self.network_weight,
        ];
        if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err(EngineError::Config(
                "factor weights must be within [0,1]".to_string(),
            ));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::Config(format!(
                "factor weights must sum to 1.0, got {}",
                sum
            )));
        }
        if self.decay_half_life_days <= 0.0 {
            return Err(EngineError::Config(
                "decay_half_life_days must be positive".to_string(),
            ));
        }
        if self.saturation <= 0.0 {
            return Err(EngineError::Config("saturation must be positive".to_string()));
        }
        if self.obfuscation_bonus < 0.0 {
            return Err(EngineError::Config(
                "obfuscation_bonus must not be negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.contagion_factor) {
            return Err(EngineError::Config(
                "contagion_factor must be within [0,1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_edge_strength) {
            return Err(EngineError::Config(
                "min_edge_strength must be within [0,1]".to_string(),
            ));
        }
        if self.signal_window_days < 1 {
            return Err(EngineError::Config(
                "signal_window_days must be at least 1".to_string(),
            ));
        }
        if self.trend_epsilon < 0.0 {
            return Err(EngineError::Config(
                "trend_epsilon must not be negative".to_string(),
            ));
        }
        if self.top_contributor_limit == 0 {
            return Err(EngineError::Config(
                "top_contributor_limit must be at least 1".to_string(),
            ));
        }
        self.bands.validate()
    }
}
