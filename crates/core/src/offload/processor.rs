//! The deferred computation itself: folding a customer's new events and feedback into their
//! derived state. Pure over its input, so the worker path and the fallback path agree.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::{self, AlertRules};
use crate::config::AppConfig;
use crate::domain::alert::AlertDraft;
use crate::domain::event::{BehaviorEvent, EventType};
use crate::domain::feedback::FeedbackData;
use crate::domain::state::CustomerState;
use crate::errors::ComputationError;
use crate::insights::{self, InsightReport, InsightsInput};
use crate::patterns::{self, PurchaseHistory};
use crate::scoring::engagement::{self, EngagementInput};
use crate::scoring::{EngagementScorer, RecencyPolicy, SatisfactionScorer};
use crate::store::PurchaseRecord;

/// Tunables a worker needs; carried with every request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    pub history_cap: usize,
    pub recency_window_days: i64,
    pub current_weight: f64,
    pub alerts: AlertRules,
}

impl AnalysisSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            history_cap: config.scoring.history_cap,
            recency_window_days: config.scoring.recency_window_days,
            current_weight: config.scoring.current_weight,
            alerts: AlertRules::from_config(&config.alerts),
        }
    }

    pub fn policy(&self) -> RecencyPolicy {
        RecencyPolicy {
            window: Duration::days(self.recency_window_days),
            current_weight: self.current_weight.clamp(0.5, 1.0),
            history_cap: self.history_cap.max(1),
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum AnalysisStep {
    Behavior { event: BehaviorEvent },
    Feedback { revision: u64, feedback: FeedbackData, at: DateTime<Utc> },
}

/// One customer's snapshot plus the work queued for them, in arrival order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInput {
    /// Sanitized customer token.
    pub customer: String,
    pub state: CustomerState,
    pub steps: Vec<AnalysisStep>,
    /// Buffered events of the customer up to the last step's sequence, oldest first.
    pub history: Vec<BehaviorEvent>,
    /// Purchase records up to the last step's sequence.
    pub purchases: Vec<PurchaseRecord>,
    pub settings: AnalysisSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub customer: String,
    pub state: CustomerState,
    pub alerts: Vec<AlertDraft>,
    pub steps_applied: usize,
}

/// Runs on a worker. Implementations must be deterministic over their input.
pub trait AnalysisProcessor: Send + Sync + 'static {
    fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisOutcome, ComputationError>;

    fn insights(&self, input: &InsightsInput) -> Result<InsightReport, ComputationError> {
        Ok(insights::build(input))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StandardProcessor;

impl AnalysisProcessor for StandardProcessor {
    fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisOutcome, ComputationError> {
        let policy = input.settings.policy();
        let engagement = EngagementScorer::new(policy)?;
        let satisfaction = SatisfactionScorer::new(policy)?;

        let mut state = input.state.clone();
        let mut alerts = Vec::new();
        let mut steps_applied = 0;

        for step in &input.steps {
            match step {
                AnalysisStep::Behavior { event } => {
                    if event.sequence <= state.processed_through {
                        continue;
                    }
                    let cut = input.history.partition_point(|e| e.sequence <= event.sequence);
                    let history = &input.history[..cut];
                    let scorers = (&engagement, &satisfaction);
                    apply_behavior(&mut state, event, history, &input.purchases, scorers);
                    alerts.extend(alerts::evaluate(
                        &input.settings.alerts,
                        event,
                        history,
                        state.engagement.running_score,
                    ));
                    state.processed_through = event.sequence;
                }
                AnalysisStep::Feedback { revision, feedback, at } => {
                    if *revision <= state.feedback_revision {
                        continue;
                    }
                    state.feedback.merge(feedback.clone());
                    rescore_satisfaction(&mut state, &satisfaction, *at);
                    state.feedback_revision = *revision;
                }
            }
            steps_applied += 1;
        }

        Ok(AnalysisOutcome { customer: input.customer.clone(), state, alerts, steps_applied })
    }
}

fn apply_behavior(
    state: &mut CustomerState,
    event: &BehaviorEvent,
    history: &[BehaviorEvent],
    purchases: &[PurchaseRecord],
    (engagement, satisfaction): (&EngagementScorer, &SatisfactionScorer),
) {
    engagement::advance(&mut state.engagement, event);
    let input = EngagementInput { event, history, state: &state.engagement };
    engagement.score(&input, &mut state.engagement_history);

    if event.event_type == EventType::Review {
        state.feedback.merge(FeedbackData::from_metadata(&event.metadata));
        rescore_satisfaction(state, satisfaction, event.timestamp);
    }

    if event.is_purchase() {
        let known: Vec<_> =
            purchases.iter().filter(|record| record.sequence <= event.sequence).cloned().collect();
        let product_id = PurchaseRecord::from_event(event).product_id;
        let history = PurchaseHistory::for_product(&known, &product_id);
        let detected = patterns::detect(&history);
        let predictions = patterns::predict(&detected, event.timestamp);
        state.pattern_insights = patterns::insights(&detected, &predictions, event.timestamp);
        state.predictions = Some(predictions);
        state.patterns = detected;
    }
}

fn rescore_satisfaction(
    state: &mut CustomerState,
    scorer: &SatisfactionScorer,
    at: DateTime<Utc>,
) {
    let (_, detail) = scorer.score(&state.feedback, &mut state.satisfaction_history, at);
    state.satisfaction_detail = detail;
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::{
        AnalysisInput, AnalysisProcessor, AnalysisSettings, AnalysisStep, StandardProcessor,
    };
    use crate::domain::event::{BehaviorEvent, EventType, ProductRef};
    use crate::domain::feedback::FeedbackData;
    use crate::domain::pattern::PatternKind;
    use crate::domain::state::CustomerState;
    use crate::scoring::engagement::tests::{event, t0};
    use crate::store::PurchaseRecord;

    pub fn input_for(events: Vec<BehaviorEvent>) -> AnalysisInput {
        let purchases = events
            .iter()
            .filter(|e| e.is_purchase())
            .map(PurchaseRecord::from_event)
            .collect();
        AnalysisInput {
            customer: "cust_test".into(),
            state: CustomerState::default(),
            steps: events.iter().cloned().map(|event| AnalysisStep::Behavior { event }).collect(),
            history: events,
            purchases,
            settings: AnalysisSettings::default(),
        }
    }

    #[test]
    fn folds_each_event_once() {
        let events: Vec<_> = (1..=3)
            .map(|seq| event(seq, t0() + Duration::minutes(seq as i64), EventType::PageView))
            .collect();
        let input = input_for(events);

        let outcome = StandardProcessor.analyze(&input).expect("analysis");
        assert_eq!(outcome.steps_applied, 3);
        assert_eq!(outcome.state.processed_through, 3);
        assert_eq!(outcome.state.engagement_history.len(), 3);

        let mut replay = input.clone();
        replay.state = outcome.state.clone();
        let again = StandardProcessor.analyze(&replay).expect("analysis");
        assert_eq!(again.steps_applied, 0);
        assert_eq!(again.state, outcome.state);
    }

    #[test]
    fn purchases_refresh_patterns() {
        let events: Vec<_> = (0..4)
            .map(|i| {
                let mut purchase =
                    event(i + 1, t0() + Duration::days(30 * i as i64), EventType::Purchase);
                purchase.product =
                    Some(ProductRef { id: "coffee".into(), category: None, quantity: 1 });
                purchase
            })
            .collect();

        let outcome = StandardProcessor.analyze(&input_for(events)).expect("analysis");

        let kinds: Vec<_> = outcome.state.patterns.iter().map(|p| p.kind).collect();
        assert!(kinds.contains(&PatternKind::FrequencyMonthly));
        assert!(outcome.state.predictions.is_some());
    }

    #[test]
    fn review_metadata_and_feedback_steps_score_satisfaction() {
        let mut review = event(1, t0(), EventType::Review);
        review.metadata.insert("review_text".into(), json!("excellent, love it"));
        review.metadata.insert("likelihood_recommend".into(), json!(10));
        let mut input = input_for(vec![review]);
        input.steps.push(AnalysisStep::Feedback {
            revision: 4,
            feedback: FeedbackData { support_tickets: Some(0), ..FeedbackData::default() },
            at: t0() + Duration::minutes(1),
        });

        let outcome = StandardProcessor.analyze(&input).expect("analysis");

        assert_eq!(outcome.state.satisfaction_history.len(), 2);
        assert_eq!(outcome.state.feedback_revision, 4);
        assert_eq!(outcome.state.feedback.likelihood_recommend, Some(10.0));
    }

    #[test]
    fn high_value_purchase_yields_alert_draft() {
        let mut purchase = event(1, t0(), EventType::Purchase);
        purchase.value = 2500.0;
        let outcome = StandardProcessor.analyze(&input_for(vec![purchase])).expect("analysis");
        assert_eq!(outcome.alerts.len(), 1);
    }
}
