//! Weighted multi-model scoring shared by the engagement, satisfaction and pricing ensembles.
//!
//! Each ensemble names its sub-models with a closed enum implementing [`SubModel`]; the weight
//! table is checked once when the scorer is built. A sub-model that fails at evaluation time
//! is replaced by a neutral value with zero confidence instead of failing the whole score.

pub mod engagement;
pub mod pricing;
pub mod satisfaction;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use crate::config::ScoringConfig;
use crate::domain::score::{EnsembleKind, ModelScore, ScoreLevel, ScoreRecord, TrendDirection};
use crate::errors::ComputationError;

pub use engagement::EngagementScorer;
pub use pricing::PricingEngine;
pub use satisfaction::SatisfactionScorer;

pub const NEUTRAL_SCORE: f64 = 50.0;
pub const WEIGHT_TOLERANCE: f64 = 1e-9;
/// Decay applied per rank when averaging prior scores.
const RECENCY_DECAY: f64 = 0.1;

pub trait SubModel: Copy + 'static {
    const ENSEMBLE: EnsembleKind;
    const ALL: &'static [Self];

    fn id(self) -> &'static str;
    fn weight(self) -> f64;
}

pub fn ensemble_name(kind: EnsembleKind) -> &'static str {
    match kind {
        EnsembleKind::Engagement => "engagement",
        EnsembleKind::Satisfaction => "satisfaction",
        EnsembleKind::Pricing => "pricing",
    }
}

pub fn validate_weights<M: SubModel>() -> Result<(), ComputationError> {
    let total: f64 = M::ALL.iter().map(|model| model.weight()).sum();
    if (total - 1.0).abs() > WEIGHT_TOLERANCE || M::ALL.iter().any(|m| m.weight() < 0.0) {
        let ensemble = ensemble_name(M::ENSEMBLE);
        return Err(ComputationError::InvalidWeights { ensemble, total });
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubModelOutput {
    pub value: f64,
    pub confidence: f64,
    pub factors: Map<String, Value>,
}

impl SubModelOutput {
    pub fn new(value: f64, confidence: f64) -> Self {
        Self { value, confidence, factors: Map::new() }
    }

    pub fn factor(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.factors.insert(key.to_string(), value.into());
        self
    }
}

/// Weighted mean of every sub-model before recency weighting.
#[derive(Clone, Debug, PartialEq)]
pub struct Blended {
    pub score: f64,
    pub confidence: f64,
    pub breakdown: BTreeMap<String, ModelScore>,
    pub failures: Vec<ComputationError>,
}

/// Runs every sub-model of `M` through `evaluate` and combines the results.
pub fn blend<M: SubModel>(
    mut evaluate: impl FnMut(M) -> Result<SubModelOutput, ComputationError>,
) -> Blended {
    let mut score = 0.0;
    let mut confidence = 0.0;
    let mut breakdown = BTreeMap::new();
    let mut failures = Vec::new();

    for model in M::ALL.iter().copied() {
        let output = evaluate(model).and_then(|output| {
            if output.value.is_finite() && output.confidence.is_finite() {
                Ok(output)
            } else {
                Err(ComputationError::NonFinite { model: model.id() })
            }
        });
        let output = match output {
            Ok(output) => SubModelOutput {
                value: output.value.clamp(0.0, 100.0),
                confidence: output.confidence.clamp(0.0, 1.0),
                factors: output.factors,
            },
            Err(error) => {
                tracing::warn!(
                    event_name = "scoring.sub_model.failed",
                    ensemble = ensemble_name(M::ENSEMBLE),
                    model = model.id(),
                    error_code = error.code(),
                    error = %error,
                    "sub-model failed; substituting neutral score"
                );
                let neutral = SubModelOutput::new(NEUTRAL_SCORE, 0.0).factor("error", error.code());
                failures.push(error);
                neutral
            }
        };

        score += output.value * model.weight();
        confidence += output.confidence;
        breakdown.insert(
            model.id().to_string(),
            ModelScore {
                score: output.value,
                confidence: output.confidence,
                weight: model.weight(),
                factors: output.factors,
            },
        );
    }

    let count = M::ALL.len().max(1) as f64;
    Blended { score, confidence: confidence / count, breakdown, failures }
}

/// How prior scores temper a new one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecencyPolicy {
    pub window: Duration,
    pub current_weight: f64,
    pub history_cap: usize,
}

impl RecencyPolicy {
    pub fn from_config(config: &ScoringConfig) -> Self {
        Self {
            window: Duration::days(config.recency_window_days),
            current_weight: config.current_weight.clamp(0.5, 1.0),
            history_cap: config.history_cap.max(1),
        }
    }

    /// `history` is newest first. Priors newer than `at` or older than the window are ignored.
    pub fn apply(&self, current: f64, history: &[ScoreRecord], at: DateTime<Utc>) -> f64 {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let priors = history
            .iter()
            .filter(|record| record.timestamp <= at && at - record.timestamp <= self.window);
        for (rank, record) in priors.enumerate() {
            let weight = (-RECENCY_DECAY * rank as f64).exp();
            weighted += record.overall_score * weight;
            total_weight += weight;
        }

        if total_weight == 0.0 {
            return current;
        }
        self.current_weight * current + (1.0 - self.current_weight) * (weighted / total_weight)
    }

    /// Builds the record for a freshly blended score and pushes it onto `history`.
    pub fn record(
        &self,
        kind: EnsembleKind,
        blended: Blended,
        history: &mut Vec<ScoreRecord>,
        at: DateTime<Utc>,
        level: impl Fn(f64) -> ScoreLevel,
    ) -> ScoreRecord {
        let overall = self.apply(blended.score, history, at).clamp(0.0, 100.0);
        let previous = history.first().map(|record| record.overall_score);
        let record = ScoreRecord {
            ensemble: kind,
            overall_score: overall,
            level: level(overall),
            confidence: blended.confidence,
            model_breakdown: blended.breakdown,
            trend_direction: TrendDirection::between(previous, overall),
            timestamp: at,
        };
        history.insert(0, record.clone());
        history.truncate(self.history_cap);
        record
    }
}

impl Default for RecencyPolicy {
    fn default() -> Self {
        Self { window: Duration::days(30), current_weight: 0.5, history_cap: 100 }
    }
}
