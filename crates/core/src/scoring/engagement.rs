use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::domain::event::{BehaviorEvent, EventType};
use crate::domain::score::{EngagementLevel, EnsembleKind, ScoreLevel, ScoreRecord};
use crate::domain::state::EngagementState;
use crate::errors::ComputationError;
use crate::scoring::{blend, validate_weights, RecencyPolicy, SubModel, SubModelOutput};

const MAX_SCORE: f64 = 100.0;
const PURCHASE_INTENT_STEP: f64 = 20.0;
const DECAY_PERIOD_SECS: f64 = 24.0 * 3600.0;
const RETENTION_WINDOW_DAYS: i64 = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngagementModel {
    ActivityPoints,
    PurchaseIntent,
    SessionDepth,
    Retention,
}

impl SubModel for EngagementModel {
    const ENSEMBLE: EnsembleKind = EnsembleKind::Engagement;
    const ALL: &'static [Self] =
        &[Self::ActivityPoints, Self::PurchaseIntent, Self::SessionDepth, Self::Retention];

    fn id(self) -> &'static str {
        match self {
            Self::ActivityPoints => "activity_points",
            Self::PurchaseIntent => "purchase_intent",
            Self::SessionDepth => "session_depth",
            Self::Retention => "retention",
        }
    }

    fn weight(self) -> f64 {
        match self {
            Self::ActivityPoints => 0.50,
            Self::PurchaseIntent => 0.20,
            Self::SessionDepth => 0.15,
            Self::Retention => 0.15,
        }
    }
}

/// Everything the engagement sub-models read for one event.
#[derive(Clone, Copy, Debug)]
pub struct EngagementInput<'a> {
    pub event: &'a BehaviorEvent,
    /// The customer's events up to and including `event`, oldest first.
    pub history: &'a [BehaviorEvent],
    /// Running state after `event` has been folded in.
    pub state: &'a EngagementState,
}

/// Folds one event into the running score: decay by elapsed time first, then add the event
/// type's points.
pub fn advance(state: &mut EngagementState, event: &BehaviorEvent) {
    if let Some(last) = state.last_event_at {
        let elapsed = (event.timestamp - last).num_seconds().max(0) as f64;
        state.running_score *= (1.0 - elapsed / DECAY_PERIOD_SECS).max(0.0);
    }
    let points = event.event_type.engagement_points();
    state.running_score = (state.running_score + points).min(MAX_SCORE);
    if event.is_purchase() {
        state.purchase_score = (state.purchase_score + PURCHASE_INTENT_STEP).min(MAX_SCORE);
    }
    state.events_seen += 1;
    state.last_event_at = Some(event.timestamp);
}

/// Events from `event`'s customer inside `window` ending at `event`, counting `event` itself.
pub fn events_in_window(
    event: &BehaviorEvent,
    history: &[BehaviorEvent],
    window: Duration,
) -> usize {
    let since = event.timestamp.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let earlier = history
        .iter()
        .filter(|prior| prior.sequence < event.sequence)
        .filter(|prior| prior.timestamp >= since && prior.timestamp <= event.timestamp)
        .count();
    earlier + 1
}

/// Churn risk from the customer's activity in the seven days up to and including `event`.
pub fn churn_risk(event: &BehaviorEvent, history: &[BehaviorEvent]) -> f64 {
    match events_in_window(event, history, Duration::days(RETENTION_WINDOW_DAYS)) {
        0 => 100.0,
        1..=2 => 80.0,
        3..=9 => 40.0,
        _ => 10.0,
    }
}

fn session_depth(input: &EngagementInput<'_>) -> SubModelOutput {
    let session: Vec<_> = input
        .history
        .iter()
        .filter(|e| e.session_id == input.event.session_id && e.sequence <= input.event.sequence)
        .collect();
    let page_views = session.iter().filter(|e| e.event_type == EventType::PageView).count();
    let pages: HashSet<_> = session.iter().filter_map(|e| e.page.as_deref()).collect();
    let interactions = session.len() - page_views;

    let value = (page_views as f64 * 10.0 + pages.len() as f64 * 5.0 + interactions as f64 * 15.0)
        .min(MAX_SCORE);
    SubModelOutput::new(value, (session.len() as f64 / 5.0).min(1.0))
        .factor("session_events", session.len())
        .factor("page_views", page_views)
        .factor("distinct_pages", pages.len())
}

pub fn evaluate(
    model: EngagementModel,
    input: &EngagementInput<'_>,
) -> Result<SubModelOutput, ComputationError> {
    let output = match model {
        EngagementModel::ActivityPoints => SubModelOutput::new(input.state.running_score, 0.9)
            .factor("event_points", input.event.event_type.engagement_points())
            .factor("events_seen", input.state.events_seen),
        EngagementModel::PurchaseIntent => SubModelOutput::new(input.state.purchase_score, 0.7)
            .factor("purchases", input.history.iter().filter(|e| e.is_purchase()).count()),
        EngagementModel::SessionDepth => session_depth(input),
        EngagementModel::Retention => {
            let risk = churn_risk(input.event, input.history);
            SubModelOutput::new(MAX_SCORE - risk, 0.8).factor("churn_risk", risk)
        }
    };
    Ok(output)
}

#[derive(Clone, Debug)]
pub struct EngagementScorer {
    policy: RecencyPolicy,
}

impl EngagementScorer {
    pub fn new(policy: RecencyPolicy) -> Result<Self, ComputationError> {
        validate_weights::<EngagementModel>()?;
        Ok(Self { policy })
    }

    /// Scores `input.event` and pushes the record onto `history` (newest first).
    pub fn score(
        &self,
        input: &EngagementInput<'_>,
        history: &mut Vec<ScoreRecord>,
    ) -> ScoreRecord {
        let blended = blend::<EngagementModel>(|model| evaluate(model, input));
        self.policy.record(EnsembleKind::Engagement, blended, history, input.event.timestamp, |s| {
            ScoreLevel::Engagement(EngagementLevel::from_score(s))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::Map;

    use super::{advance, churn_risk, EngagementInput, EngagementModel, EngagementScorer};
    use crate::domain::event::{BehaviorEvent, EventFlags, EventId, EventType};
    use crate::domain::score::{EngagementLevel, ScoreLevel};
    use crate::domain::state::EngagementState;
    use crate::scoring::{validate_weights, RecencyPolicy, SubModel};

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 12, 0, 0).unwrap()
    }

    pub fn event(sequence: u64, at: DateTime<Utc>, event_type: EventType) -> BehaviorEvent {
        BehaviorEvent {
            id: EventId(format!("evt-{sequence}")),
            sequence,
            customer_id: "c-1".into(),
            session_id: "s-1".into(),
            timestamp: at,
            flags: EventFlags {
                is_purchase: event_type == EventType::Purchase,
                ..EventFlags::default()
            },
            event_type,
            action: None,
            category: None,
            value: 0.0,
            page: Some(format!("/p/{}", sequence % 3)),
            product: None,
            search_query: None,
            referrer: None,
            device: "desktop".into(),
            location: None,
            metadata: Map::new(),
        }
    }

    #[test]
    fn page_views_add_two_points_until_capped() {
        let mut state = EngagementState::default();
        let mut previous = state.running_score;
        for sequence in 1..=30 {
            advance(&mut state, &event(sequence, t0(), EventType::PageView));
            let expected = (previous + 2.0).min(100.0);
            assert!((state.running_score - expected).abs() < 1e-9, "step {sequence}");
            previous = state.running_score;
        }
        assert_eq!(state.running_score, 100.0);
        assert_eq!(state.events_seen, 30);
    }

    #[test]
    fn decay_applies_before_points() {
        let mut state = EngagementState::default();
        advance(&mut state, &event(1, t0(), EventType::PageView));
        advance(&mut state, &event(2, t0() + Duration::hours(12), EventType::Purchase));
        assert!((state.running_score - (52.0 * 0.5 + 25.0)).abs() < 1e-9);
        assert_eq!(state.purchase_score, 20.0);

        advance(&mut state, &event(3, t0() + Duration::days(3), EventType::Search));
        assert!((state.running_score - 3.0).abs() < 1e-9);
    }

    #[test]
    fn churn_risk_follows_recent_activity() {
        let history: Vec<_> = (1..=12)
            .map(|i| event(i, t0() + Duration::minutes(i as i64), EventType::PageView))
            .collect();
        assert_eq!(churn_risk(&history[0], &history), 80.0);
        assert_eq!(churn_risk(&history[1], &history), 80.0);
        assert_eq!(churn_risk(&history[2], &history), 40.0);
        assert_eq!(churn_risk(&history[8], &history), 40.0);
        assert_eq!(churn_risk(&history[9], &history), 10.0);
        assert_eq!(churn_risk(&history[0], &[]), 80.0);
    }

    #[test]
    fn weights_sum_to_one() {
        assert!(validate_weights::<EngagementModel>().is_ok());
        let total: f64 = EngagementModel::ALL.iter().map(|m| m.weight()).sum();
        assert!((total - 1.0).abs() <= 1e-9);
    }

    #[test]
    fn score_is_bounded_and_levelled() {
        let scorer = EngagementScorer::new(RecencyPolicy::default()).expect("valid weights");
        let mut state = EngagementState::default();
        let mut history = Vec::new();
        let mut events = Vec::new();

        for sequence in 1..=40 {
            let e = event(sequence, t0() + Duration::seconds(sequence as i64), EventType::CartAdd);
            advance(&mut state, &e);
            events.push(e);
            let last = &events[events.len() - 1];
            let input = EngagementInput { event: last, history: &events, state: &state };
            let record = scorer.score(&input, &mut history);
            assert!((0.0..=100.0).contains(&record.overall_score));
            assert_eq!(
                record.level,
                ScoreLevel::Engagement(EngagementLevel::from_score(record.overall_score))
            );
        }
        assert_eq!(history.len(), 40);
        assert_eq!(history[0].model_breakdown.len(), 4);
        assert!(history[0].overall_score > 60.0);
    }
}
