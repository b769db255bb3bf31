//! Threshold and anomaly rules evaluated against each new event and the running engagement
//! score, plus the capped alert log the engine keeps.

use std::collections::VecDeque;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::AlertConfig;
use crate::domain::alert::{Alert, AlertDraft, AlertSeverity, AlertType};
use crate::domain::event::BehaviorEvent;
use crate::domain::state::NEUTRAL_ENGAGEMENT;
use crate::scoring::engagement::events_in_window;

/// Deviation unit the anomaly threshold is multiplied by.
const ANOMALY_SCALE: f64 = 20.0;

/// Alert thresholds in a form that can travel to a worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRules {
    pub high_value_threshold: f64,
    pub rapid_engagement_count: usize,
    pub rapid_engagement_window_secs: u64,
    pub anomaly_threshold: f64,
}

impl AlertRules {
    pub fn from_config(config: &AlertConfig) -> Self {
        Self {
            high_value_threshold: config.high_value_threshold,
            rapid_engagement_count: config.rapid_engagement_count,
            rapid_engagement_window_secs: config.rapid_engagement_window_secs,
            anomaly_threshold: config.anomaly_threshold,
        }
    }

    fn window(&self) -> Duration {
        i64::try_from(self.rapid_engagement_window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for AlertRules {
    fn default() -> Self {
        Self {
            high_value_threshold: 1000.0,
            rapid_engagement_count: 10,
            rapid_engagement_window_secs: 600,
            anomaly_threshold: 2.5,
        }
    }
}

fn draft(
    alert_type: AlertType,
    severity: AlertSeverity,
    event: &BehaviorEvent,
    message: String,
    data: Map<String, Value>,
) -> AlertDraft {
    AlertDraft {
        alert_type,
        severity,
        customer: event.customer_id.clone(),
        message,
        timestamp: event.timestamp,
        data,
    }
}

/// Evaluates every rule for `event`. `history` is the customer's events oldest first and may
/// include `event` itself; `event.customer_id` is expected to be a sanitized token already.
pub fn evaluate(
    rules: &AlertRules,
    event: &BehaviorEvent,
    history: &[BehaviorEvent],
    engagement: f64,
) -> Vec<AlertDraft> {
    let mut drafts = Vec::new();

    if event.is_purchase() && event.value > rules.high_value_threshold {
        let mut data = Map::new();
        data.insert("value".into(), json!(event.value));
        data.insert("threshold".into(), json!(rules.high_value_threshold));
        data.insert("event_id".into(), json!(event.id.0));
        drafts.push(draft(
            AlertType::HighValuePurchase,
            AlertSeverity::Info,
            event,
            format!("High-value purchase of {:.2} by {}", event.value, event.customer_id),
            data,
        ));
    }

    let recent = events_in_window(event, history, rules.window());
    if recent > rules.rapid_engagement_count {
        let mut data = Map::new();
        data.insert("event_count".into(), json!(recent));
        data.insert("window_secs".into(), json!(rules.rapid_engagement_window_secs));
        drafts.push(draft(
            AlertType::RapidEngagement,
            AlertSeverity::Info,
            event,
            format!(
                "{} events from {} in the last {} minutes",
                recent,
                event.customer_id,
                rules.rapid_engagement_window_secs / 60
            ),
            data,
        ));
    }

    let deviation = (engagement - NEUTRAL_ENGAGEMENT).abs();
    if deviation > rules.anomaly_threshold * ANOMALY_SCALE {
        let mut data = Map::new();
        data.insert("engagement_score".into(), json!(engagement));
        data.insert("deviation".into(), json!(deviation));
        drafts.push(draft(
            AlertType::BehaviorAnomaly,
            AlertSeverity::Warning,
            event,
            format!(
                "Engagement score {:.1} for {} deviates from baseline",
                engagement,
                event.customer_id
            ),
            data,
        ));
    }

    drafts
}

/// Append-only ring; the oldest alert is dropped once `capacity` is reached.
#[derive(Debug)]
pub struct AlertLog {
    capacity: usize,
    alerts: VecDeque<Alert>,
    issued: u64,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), alerts: VecDeque::new(), issued: 0 }
    }

    pub fn push(&mut self, draft: AlertDraft) -> Alert {
        let alert = draft.issue();
        tracing::info!(
            event_name = "alerts.issued",
            alert_id = %alert.id,
            alert_type = ?alert.alert_type,
            severity = ?alert.severity,
            customer = %alert.customer,
            "alert issued"
        );
        self.alerts.push_back(alert.clone());
        while self.alerts.len() > self.capacity {
            self.alerts.pop_front();
        }
        self.issued += 1;
        alert
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::{evaluate, AlertLog, AlertRules};
    use crate::domain::alert::{AlertSeverity, AlertType};
    use crate::domain::event::EventType;
    use crate::scoring::engagement::tests::{event, t0};

    #[test]
    fn high_value_purchase_raises_info_alert() {
        let mut purchase = event(1, t0(), EventType::Purchase);
        purchase.value = 1500.0;

        let drafts = evaluate(&AlertRules::default(), &purchase, &[purchase.clone()], 50.0);

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].alert_type, AlertType::HighValuePurchase);
        assert_eq!(drafts[0].severity, AlertSeverity::Info);
    }

    #[test]
    fn purchase_at_threshold_is_not_high_value() {
        let mut purchase = event(1, t0(), EventType::Purchase);
        purchase.value = 1000.0;
        assert!(evaluate(&AlertRules::default(), &purchase, &[], 50.0).is_empty());
    }

    #[test]
    fn eleven_events_in_window_including_current_is_rapid() {
        let history: Vec<_> = (1..=11)
            .map(|seq| event(seq, t0() + Duration::seconds(seq as i64 * 30), EventType::PageView))
            .collect();
        let latest = history[10].clone();
        let drafts = evaluate(&AlertRules::default(), &latest, &history, 50.0);
        assert!(drafts.iter().any(|d| d.alert_type == AlertType::RapidEngagement));

        let earlier = history[9].clone();
        let drafts = evaluate(&AlertRules::default(), &earlier, &history, 50.0);
        assert!(drafts.iter().all(|d| d.alert_type != AlertType::RapidEngagement));
    }

    #[test]
    fn anomaly_needs_deviation_beyond_threshold() {
        let page = event(1, t0(), EventType::PageView);
        let rules = AlertRules { anomaly_threshold: 1.0, ..AlertRules::default() };

        let drafts = evaluate(&rules, &page, &[], 75.0);
        assert_eq!(drafts[0].alert_type, AlertType::BehaviorAnomaly);
        assert_eq!(drafts[0].severity, AlertSeverity::Warning);
        assert!(evaluate(&rules, &page, &[], 70.0).is_empty());
        assert!(evaluate(&AlertRules::default(), &page, &[], 100.0).is_empty());
    }

    #[test]
    fn log_drops_oldest_beyond_capacity() {
        let mut log = AlertLog::new(2);
        let mut purchase = event(1, t0(), EventType::Purchase);
        purchase.value = 5000.0;
        for _ in 0..3 {
            for draft in evaluate(&AlertRules::default(), &purchase, &[], 50.0) {
                log.push(draft);
            }
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.issued(), 3);
        let ids: Vec<_> = log.snapshot().into_iter().map(|a| a.id).collect();
        assert_ne!(ids[0], ids[1]);
    }
}
