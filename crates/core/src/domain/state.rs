use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::feedback::{FeedbackData, SatisfactionDetail};
use crate::domain::pattern::{Pattern, PatternInsight, Predictions};
use crate::domain::score::ScoreRecord;

/// Starting value of the running engagement score.
pub const NEUTRAL_ENGAGEMENT: f64 = 50.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngagementState {
    pub running_score: f64,
    pub purchase_score: f64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub events_seen: u64,
}

impl Default for EngagementState {
    fn default() -> Self {
        Self {
            running_score: NEUTRAL_ENGAGEMENT,
            purchase_score: 0.0,
            last_event_at: None,
            events_seen: 0,
        }
    }
}

/// Everything derived for one customer by the deferred analysis path.
///
/// Owned and serializable so a snapshot can be shipped to a worker and the worker's result
/// replaces it wholesale on merge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerState {
    pub engagement: EngagementState,
    /// Newest first.
    pub engagement_history: Vec<ScoreRecord>,
    /// Newest first.
    pub satisfaction_history: Vec<ScoreRecord>,
    pub feedback: FeedbackData,
    pub satisfaction_detail: SatisfactionDetail,
    pub patterns: Vec<Pattern>,
    pub predictions: Option<Predictions>,
    pub pattern_insights: Vec<PatternInsight>,
    /// Highest store sequence already folded into this state; zero before the first event.
    pub processed_through: u64,
    /// Feedback submissions already folded into this state.
    pub feedback_revision: u64,
}

impl CustomerState {
    pub fn latest_engagement(&self) -> Option<&ScoreRecord> {
        self.engagement_history.first()
    }

    pub fn latest_satisfaction(&self) -> Option<&ScoreRecord> {
        self.satisfaction_history.first()
    }
}
