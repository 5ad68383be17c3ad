use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Risk tiers, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Monitor,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Monitor => "monitor",
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().as_str() {
            "monitor" => Ok(RiskTier::Monitor),
            "low" => Ok(RiskTier::Low),
            "medium" => Ok(RiskTier::Medium),
            "high" => Ok(RiskTier::High),
            "critical" => Ok(RiskTier::Critical),
            _ => Err(EngineError::Validation(format!("Invalid risk tier: {}", s))),
        }
    }

    /// Numeric rank for ordering comparisons.
    pub fn rank(&self) -> u8 {
        match self {
            RiskTier::Monitor => 0,
            RiskTier::Low => 1,
            RiskTier::Medium => 2,
            RiskTier::High => 3,
            RiskTier::Critical => 4,
        }
    }
}

/// Score-to-tier band boundaries. A score maps to the highest band whose
/// lower bound it meets; boundaries must be strictly increasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierBands {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for TierBands {
    fn default() -> Self {
        Self {
            low: 21.0,
            medium: 41.0,
            high: 61.0,
            critical: 81.0,
        }
    }
}

impl TierBands {
    pub fn validate(&self) -> EngineResult<()> {
        let bounds = [self.low, self.medium, self.high, self.critical];
        if bounds.iter().any(|b| !(0.0..=100.0).contains(b)) {
            return Err(EngineError::Config(
                "tier band boundaries must be within [0,100]".to_string(),
            ));
        }
        if !(self.low < self.medium && self.medium < self.high && self.high < self.critical) {
            return Err(EngineError::Config(
                "tier band boundaries must be strictly increasing".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tier_for(&self, score: f64) -> RiskTier {
        if score >= self.critical {
            RiskTier::Critical
        } else if score >= self.high {
            RiskTier::High
        } else if score >= self.medium {
            RiskTier::Medium
        } else if score >= self.low {
            RiskTier::Low
        } else {
            RiskTier::Monitor
        }
    }
}

/// Direction of score movement relative to the previous calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Stable,
    Falling,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Rising => "rising",
            TrendDirection::Stable => "stable",
            TrendDirection::Falling => "falling",
        }
    }

    pub fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().as_str() {
            "rising" => Ok(TrendDirection::Rising),
            "stable" => Ok(TrendDirection::Stable),
            "falling" => Ok(TrendDirection::Falling),
            _ => Err(EngineError::Validation(format!("Invalid trend: {}", s))),
        }
    }

    /// Classify a score delta against the stability threshold.
    pub fn classify(delta: f64, epsilon: f64) -> Self {
        if delta > epsilon {
            TrendDirection::Rising
        } else if delta < -epsilon {
            TrendDirection::Falling
        } else {
            TrendDirection::Stable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_bands_default_boundaries() {
        let bands = TierBands::default();
        assert_eq!(bands.tier_for(0.0), RiskTier::Monitor);
        assert_eq!(bands.tier_for(20.9), RiskTier::Monitor);
        assert_eq!(bands.tier_for(21.0), RiskTier::Low);
        assert_eq!(bands.tier_for(40.9), RiskTier::Low);
        assert_eq!(bands.tier_for(41.0), RiskTier::Medium);
        assert_eq!(bands.tier_for(61.0), RiskTier::High);
        assert_eq!(bands.tier_for(81.0), RiskTier::Critical);
        assert_eq!(bands.tier_for(100.0), RiskTier::Critical);
    }

    #[test]
    fn test_tier_bands_must_increase() {
        let bands = TierBands {
            low: 30.0,
            medium: 30.0,
            high: 61.0,
            critical: 81.0,
        };
        assert!(bands.validate().is_err());
        assert!(TierBands::default().validate().is_ok());
    }

    #[test]
    fn test_tier_ordering() {
        assert!(RiskTier::Critical > RiskTier::High);
        assert!(RiskTier::Monitor < RiskTier::Low);
        assert_eq!(RiskTier::Medium.rank(), 2);
    }

    #[test]
    fn test_trend_classification() {
        assert_eq!(TrendDirection::classify(6.0, 5.0), TrendDirection::Rising);
        assert_eq!(TrendDirection::classify(-6.0, 5.0), TrendDirection::Falling);
        assert_eq!(TrendDirection::classify(3.0, 5.0), TrendDirection::Stable);
        assert_eq!(TrendDirection::classify(-5.0, 5.0), TrendDirection::Stable);
    }

    #[test]
    fn test_tier_round_trip() {
        for tier in [
            RiskTier::Monitor,
            RiskTier::Low,
            RiskTier::Medium,
            RiskTier::High,
            RiskTier::Critical,
        ] {
            assert_eq!(RiskTier::from_str(tier.as_str()).unwrap(), tier);
        }
        assert!(RiskTier::from_str("extreme").is_err());
    }
}
