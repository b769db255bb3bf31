use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::event::{BehaviorEvent, EventId, EventType};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JourneyKey {
    pub customer_id: String,
    pub session_id: String,
}

impl JourneyKey {
    pub fn new(customer_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self { customer_id: customer_id.into(), session_id: session_id.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Touchpoint {
    pub page: String,
    pub timestamp: DateTime<Utc>,
    pub order: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomerJourney {
    pub key: JourneyKey,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub events: Vec<EventId>,
    pub total_value: f64,
    pub page_views: u32,
    pub conversion_events: Vec<EventId>,
    pub touchpoints: Vec<Touchpoint>,
    pub is_active: bool,
}

impl CustomerJourney {
    pub fn start(event: &BehaviorEvent) -> Self {
        let mut journey = Self {
            key: JourneyKey::new(&event.customer_id, &event.session_id),
            start_time: event.timestamp,
            end_time: event.timestamp,
            events: Vec::new(),
            total_value: 0.0,
            page_views: 0,
            conversion_events: Vec::new(),
            touchpoints: Vec::new(),
            is_active: true,
        };
        journey.record(event);
        journey
    }

    /// Folds one more event of the same session into the journey.
    pub fn record(&mut self, event: &BehaviorEvent) {
        self.events.push(event.id.clone());
        if event.timestamp < self.start_time {
            self.start_time = event.timestamp;
        }
        if event.timestamp > self.end_time {
            self.end_time = event.timestamp;
        }
        self.total_value += event.value;
        self.is_active = true;

        if event.event_type == EventType::PageView {
            self.page_views += 1;
        }
        if event.flags.is_conversion || event.flags.is_purchase {
            self.conversion_events.push(event.id.clone());
        }

        if let Some(page) = &event.page {
            if !self.touchpoints.iter().any(|touchpoint| &touchpoint.page == page) {
                let order = self.touchpoints.len() + 1;
                self.touchpoints.push(Touchpoint {
                    page: page.clone(),
                    timestamp: event.timestamp,
                    order,
                });
            }
        }
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    pub fn is_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        now - self.end_time > idle_timeout
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::Map;

    use super::CustomerJourney;
    use crate::domain::event::{BehaviorEvent, EventFlags, EventId, EventType};

    fn event(seq: u64, minute: i64, event_type: EventType, page: &str) -> BehaviorEvent {
        BehaviorEvent {
            id: EventId(format!("e-{seq}")),
            sequence: seq,
            customer_id: "c-1".into(),
            session_id: "s-1".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
                + Duration::minutes(minute),
            flags: EventFlags {
                is_purchase: event_type == EventType::Purchase,
                ..EventFlags::default()
            },
            event_type,
            action: None,
            category: None,
            value: 10.0,
            page: Some(page.into()),
            product: None,
            search_query: None,
            referrer: None,
            device: "desktop".into(),
            location: None,
            metadata: Map::new(),
        }
    }

    #[test]
    fn touchpoints_are_recorded_once_per_page() {
        let mut journey = CustomerJourney::start(&event(1, 0, EventType::PageView, "/home"));
        journey.record(&event(2, 1, EventType::PageView, "/shoes"));
        journey.record(&event(3, 2, EventType::PageView, "/home"));
        journey.record(&event(4, 5, EventType::Purchase, "/checkout"));

        let pages: Vec<_> = journey.touchpoints.iter().map(|t| t.page.as_str()).collect();
        assert_eq!(pages, vec!["/home", "/shoes", "/checkout"]);
        assert_eq!(journey.touchpoints[2].order, 3);
        assert_eq!(journey.page_views, 3);
        assert_eq!(journey.conversion_events.len(), 1);
        assert_eq!(journey.duration(), Duration::minutes(5));
        assert!((journey.total_value - 40.0).abs() < 1e-9);
    }

    #[test]
    fn idle_detection_uses_last_event_time() {
        let journey = CustomerJourney::start(&event(1, 0, EventType::PageView, "/home"));
        let idle = Duration::minutes(30);
        assert!(!journey.is_idle(journey.end_time + Duration::minutes(29), idle));
        assert!(journey.is_idle(journey.end_time + Duration::minutes(31), idle));
    }
}
