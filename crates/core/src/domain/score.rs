use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleKind {
    Engagement,
    Satisfaction,
    Pricing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    Low,
    Medium,
    High,
}

impl EngagementLevel {
    pub fn from_score(score: f64) -> Self {
        if score > 80.0 {
            Self::High
        } else if score >= 30.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SatisfactionLevel {
    VeryUnsatisfied,
    Unsatisfied,
    Neutral,
    Satisfied,
    VerySatisfied,
}

impl SatisfactionLevel {
    pub const ALL: [SatisfactionLevel; 5] = [
        Self::VeryUnsatisfied,
        Self::Unsatisfied,
        Self::Neutral,
        Self::Satisfied,
        Self::VerySatisfied,
    ];

    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::VerySatisfied
        } else if score >= 65.0 {
            Self::Satisfied
        } else if score >= 45.0 {
            Self::Neutral
        } else if score >= 25.0 {
            Self::Unsatisfied
        } else {
            Self::VeryUnsatisfied
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreLevel {
    Engagement(EngagementLevel),
    Satisfaction(SatisfactionLevel),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

impl TrendDirection {
    /// Changes smaller than this are reported as stable.
    pub const STABLE_BAND: f64 = 5.0;

    pub fn between(previous: Option<f64>, current: f64) -> Self {
        let Some(previous) = previous else {
            return Self::Stable;
        };
        let difference = current - previous;
        if difference.abs() < Self::STABLE_BAND {
            Self::Stable
        } else if difference > 0.0 {
            Self::Improving
        } else {
            Self::Declining
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    pub score: f64,
    pub confidence: f64,
    pub weight: f64,
    pub factors: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub ensemble: EnsembleKind,
    pub overall_score: f64,
    pub level: ScoreLevel,
    pub confidence: f64,
    pub model_breakdown: BTreeMap<String, ModelScore>,
    pub trend_direction: TrendDirection,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{EngagementLevel, SatisfactionLevel, TrendDirection};

    #[test]
    fn satisfaction_levels_are_monotonic_in_score() {
        let mut previous = SatisfactionLevel::from_score(0.0);
        for step in 0..=1000 {
            let level = SatisfactionLevel::from_score(f64::from(step) / 10.0);
            assert!(level >= previous, "level regressed at {step}");
            previous = level;
        }
        assert_eq!(SatisfactionLevel::from_score(80.0), SatisfactionLevel::VerySatisfied);
        assert_eq!(SatisfactionLevel::from_score(79.99), SatisfactionLevel::Satisfied);
        assert_eq!(SatisfactionLevel::from_score(24.99), SatisfactionLevel::VeryUnsatisfied);
    }

    #[test]
    fn engagement_levels_are_monotonic_in_score() {
        let mut previous = EngagementLevel::from_score(0.0);
        for step in 0..=1000 {
            let level = EngagementLevel::from_score(f64::from(step) / 10.0);
            assert!(level >= previous);
            previous = level;
        }
        assert_eq!(EngagementLevel::from_score(80.0), EngagementLevel::Medium);
        assert_eq!(EngagementLevel::from_score(80.1), EngagementLevel::High);
        assert_eq!(EngagementLevel::from_score(29.9), EngagementLevel::Low);
    }

    #[test]
    fn trend_uses_five_point_stable_band() {
        assert_eq!(TrendDirection::between(None, 70.0), TrendDirection::Stable);
        assert_eq!(TrendDirection::between(Some(70.0), 74.9), TrendDirection::Stable);
        assert_eq!(TrendDirection::between(Some(70.0), 75.0), TrendDirection::Improving);
        assert_eq!(TrendDirection::between(Some(70.0), 60.0), TrendDirection::Declining);
    }
}
