use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::feedback::{
    FeedbackData, Recommendation, RecommendationPriority, SatisfactionDetail, SatisfactionInsight,
    SatisfactionInsightKind, TouchpointArea,
};
use crate::domain::score::{EnsembleKind, ModelScore, SatisfactionLevel, ScoreLevel, ScoreRecord};
use crate::errors::ComputationError;
use crate::scoring::{blend, validate_weights, RecencyPolicy, SubModel, SubModelOutput};

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "excellent", "amazing", "love", "perfect", "satisfied", "happy", "wonderful",
];
const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "awful", "hate", "disappointed", "unsatisfied", "unhappy", "poor", "worst",
];

const STRENGTH_THRESHOLD: f64 = 75.0;
const CONCERN_THRESHOLD: f64 = 50.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SatisfactionModel {
    Nps,
    Csat,
    Ces,
    Sentiment,
    Behavioral,
}

impl SubModel for SatisfactionModel {
    const ENSEMBLE: EnsembleKind = EnsembleKind::Satisfaction;
    const ALL: &'static [Self] =
        &[Self::Nps, Self::Csat, Self::Ces, Self::Sentiment, Self::Behavioral];

    fn id(self) -> &'static str {
        match self {
            Self::Nps => "nps",
            Self::Csat => "csat",
            Self::Ces => "ces",
            Self::Sentiment => "sentiment",
            Self::Behavioral => "behavioral",
        }
    }

    fn weight(self) -> f64 {
        match self {
            Self::Nps => 0.30,
            Self::Csat => 0.25,
            Self::Ces => 0.20,
            Self::Sentiment => 0.15,
            Self::Behavioral => 0.10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NpsCategory {
    Promoter,
    Passive,
    Detractor,
}

impl NpsCategory {
    pub fn from_recommendation(likelihood: f64) -> Self {
        if likelihood >= 9.0 {
            Self::Promoter
        } else if likelihood >= 7.0 {
            Self::Passive
        } else {
            Self::Detractor
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Neutral,
    Negative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Joy,
    Anger,
    Disappointment,
    Neutral,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub score: f64,
    pub confidence: f64,
    pub polarity: Polarity,
    pub emotion: Emotion,
    pub positive_hits: usize,
    pub negative_hits: usize,
}

/// Lexicon sentiment over free text. Words are split on anything that is not alphanumeric or
/// an underscore and matched case-insensitively.
pub fn analyze_sentiment(text: &str) -> Sentiment {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .collect();

    if words.is_empty() {
        return Sentiment {
            score: 50.0,
            confidence: 0.1,
            polarity: Polarity::Neutral,
            emotion: Emotion::Neutral,
            positive_hits: 0,
            negative_hits: 0,
        };
    }

    let positive = words.iter().filter(|word| POSITIVE_WORDS.contains(word)).count();
    let negative = words.iter().filter(|word| NEGATIVE_WORDS.contains(word)).count();
    let hits = positive + negative;

    let (score, confidence) = if hits == 0 {
        (50.0, 0.3)
    } else {
        (positive as f64 / hits as f64 * 100.0, (hits as f64 / 10.0).min(0.8))
    };

    let polarity = if score > 60.0 {
        Polarity::Positive
    } else if score < 40.0 {
        Polarity::Negative
    } else {
        Polarity::Neutral
    };

    let emotion = if positive > negative * 2 {
        Emotion::Joy
    } else if negative > positive * 2 {
        Emotion::Anger
    } else if words.contains(&"disappointed") {
        Emotion::Disappointment
    } else {
        Emotion::Neutral
    };

    Sentiment {
        score,
        confidence,
        polarity,
        emotion,
        positive_hits: positive,
        negative_hits: negative,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len().max(1) as f64
}

pub fn evaluate(
    model: SatisfactionModel,
    feedback: &FeedbackData,
) -> Result<SubModelOutput, ComputationError> {
    let output = match model {
        SatisfactionModel::Nps => {
            let recommend = feedback.likelihood_recommend.unwrap_or(7.0);
            let experience = feedback.overall_experience.unwrap_or(7.0);
            let value = (recommend - 5.0) * 10.0 + (experience - 7.0) * 5.0;
            let category = NpsCategory::from_recommendation(recommend);
            SubModelOutput::new(value, 0.85)
                .factor("likelihood_recommend", recommend)
                .factor("overall_experience", experience)
                .factor("category", serde_json::to_value(category).unwrap_or_default())
        }
        SatisfactionModel::Csat => {
            let ratings = [
                feedback.service_rating.unwrap_or(4.0),
                feedback.product_quality.unwrap_or(4.0),
                feedback.value_perception.unwrap_or(4.0),
            ];
            let average = mean(&ratings);
            SubModelOutput::new((average - 1.0) * 25.0, 0.8).factor("average_rating", average)
        }
        SatisfactionModel::Ces => {
            let effort = [
                feedback.ease_of_use.unwrap_or(3.0),
                feedback.problem_resolution.unwrap_or(3.0),
                feedback.interaction_effort.unwrap_or(3.0),
            ];
            let average = mean(&effort);
            SubModelOutput::new((6.0 - average) * 25.0, 0.75).factor("average_effort", average)
        }
        SatisfactionModel::Sentiment => {
            let sentiment = analyze_sentiment(&feedback.combined_text());
            SubModelOutput::new(sentiment.score, sentiment.confidence)
                .factor("polarity", serde_json::to_value(sentiment.polarity).unwrap_or_default())
                .factor("emotion", serde_json::to_value(sentiment.emotion).unwrap_or_default())
                .factor("positive_hits", sentiment.positive_hits)
                .factor("negative_hits", sentiment.negative_hits)
        }
        SatisfactionModel::Behavioral => {
            let usage = feedback.usage_frequency.unwrap_or(0.5);
            let adoption = feedback.feature_adoption.unwrap_or(0.3);
            let tickets = f64::from(feedback.support_tickets.unwrap_or(0));
            let returns = feedback.return_rate.unwrap_or(0.0);
            let value =
                usage * 40.0 + adoption * 30.0 + (20.0 - tickets * 5.0).max(0.0) - returns * 30.0;
            SubModelOutput::new(value, 0.7)
                .factor("usage_frequency", usage)
                .factor("feature_adoption", adoption)
                .factor("support_tickets", tickets)
                .factor("return_rate", returns)
        }
    };
    Ok(output)
}

/// Per-area scores from 1-5 touchpoint ratings; areas without any rating are omitted.
pub fn touchpoint_scores(feedback: &FeedbackData) -> BTreeMap<TouchpointArea, f64> {
    TouchpointArea::ALL
        .iter()
        .filter_map(|area| {
            let ratings: Vec<f64> = area
                .factors()
                .iter()
                .filter_map(|factor| feedback.touchpoint_ratings.get(*factor).copied())
                .collect();
            if ratings.is_empty() {
                return None;
            }
            let score = 50.0 + ratings.iter().map(|rating| (rating - 3.0) * 12.5).sum::<f64>();
            Some((*area, score.clamp(0.0, 100.0)))
        })
        .collect()
}

type Ranked<'a> = (&'a str, &'a ModelScore);

/// Highest and lowest scoring sub-models; ties keep the first in id order.
fn extremes(breakdown: &BTreeMap<String, ModelScore>) -> Option<(Ranked<'_>, Ranked<'_>)> {
    let mut models = breakdown.iter().map(|(id, score)| (id.as_str(), score));
    let first = models.next()?;
    Some(models.fold((first, first), |(best, worst), candidate| {
        let best = if candidate.1.score > best.1.score { candidate } else { best };
        let worst = if candidate.1.score < worst.1.score { candidate } else { worst };
        (best, worst)
    }))
}

pub fn insights(breakdown: &BTreeMap<String, ModelScore>) -> Vec<SatisfactionInsight> {
    let Some(((best_id, best), (worst_id, worst))) = extremes(breakdown) else {
        return Vec::new();
    };

    let mut insights = Vec::new();
    if best.score > STRENGTH_THRESHOLD {
        insights.push(SatisfactionInsight {
            kind: SatisfactionInsightKind::Strength,
            model: best_id.to_string(),
            message: format!("Strong {best_id} performance ({:.1})", best.score),
            score: best.score,
            confidence: best.confidence,
        });
    }
    if worst.score < CONCERN_THRESHOLD {
        insights.push(SatisfactionInsight {
            kind: SatisfactionInsightKind::Concern,
            model: worst_id.to_string(),
            message: format!("Low {worst_id} score needs attention ({:.1})", worst.score),
            score: worst.score,
            confidence: worst.confidence,
        });
    }
    insights
}

pub fn recommendations(
    level: SatisfactionLevel,
    breakdown: &BTreeMap<String, ModelScore>,
) -> Vec<Recommendation> {
    match level {
        SatisfactionLevel::VeryUnsatisfied | SatisfactionLevel::Unsatisfied => {
            let weakest = extremes(breakdown).map(|(_, (id, _))| id).unwrap_or("overall");
            vec![
                Recommendation {
                    priority: RecommendationPriority::Urgent,
                    action: "immediate_outreach".to_string(),
                    description: "Contact the customer within 24 hours to resolve concerns"
                        .to_string(),
                },
                Recommendation {
                    priority: RecommendationPriority::High,
                    action: "address_specific_issue".to_string(),
                    description: format!("Focus on improving {weakest}"),
                },
            ]
        }
        SatisfactionLevel::Neutral => vec![Recommendation {
            priority: RecommendationPriority::Medium,
            action: "engagement_increase".to_string(),
            description: "Increase engagement with personalized offers".to_string(),
        }],
        SatisfactionLevel::Satisfied | SatisfactionLevel::VerySatisfied => vec![Recommendation {
            priority: RecommendationPriority::Low,
            action: "loyalty_program".to_string(),
            description: "Invite to the loyalty program or referral incentives".to_string(),
        }],
    }
}

#[derive(Clone, Debug)]
pub struct SatisfactionScorer {
    policy: RecencyPolicy,
}

impl SatisfactionScorer {
    pub fn new(policy: RecencyPolicy) -> Result<Self, ComputationError> {
        validate_weights::<SatisfactionModel>()?;
        Ok(Self { policy })
    }

    /// Scores the accumulated feedback at `at`, pushing the record onto `history`.
    pub fn score(
        &self,
        feedback: &FeedbackData,
        history: &mut Vec<ScoreRecord>,
        at: DateTime<Utc>,
    ) -> (ScoreRecord, SatisfactionDetail) {
        let blended = blend::<SatisfactionModel>(|model| evaluate(model, feedback));
        let record = self.policy.record(EnsembleKind::Satisfaction, blended, history, at, |s| {
            ScoreLevel::Satisfaction(SatisfactionLevel::from_score(s))
        });

        let level = SatisfactionLevel::from_score(record.overall_score);
        let detail = SatisfactionDetail {
            touchpoint_scores: touchpoint_scores(feedback),
            insights: insights(&record.model_breakdown),
            recommendations: recommendations(level, &record.model_breakdown),
        };
        (record, detail)
    }
}
