use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::event::BehaviorEvent;

/// Pages reported in a snapshot.
const TOP_PAGES: usize = 10;

/// Running counters updated on every ingest. Conversion and bounce counts track the live
/// buffer only, so evictions are subtracted again.
#[derive(Clone, Debug, Default)]
pub struct AnalyticsAggregate {
    total_events: u64,
    devices: HashMap<String, u64>,
    pages: HashMap<String, u64>,
    locations: HashMap<String, u64>,
    buffered_conversions: u64,
    buffered_bounces: u64,
}

/// Values owned by other parts of the store that a snapshot needs.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotInputs {
    pub buffered_events: usize,
    pub unique_customers: usize,
    pub active_sessions: usize,
    pub avg_time_on_site_secs: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PageCount {
    pub page: String,
    pub views: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub total_events: u64,
    pub buffered_events: usize,
    pub unique_customers: usize,
    pub active_sessions: usize,
    pub conversion_rate: f64,
    pub bounce_rate: f64,
    pub avg_time_on_site_secs: f64,
    pub device_breakdown: BTreeMap<String, u64>,
    pub top_pages: Vec<PageCount>,
    pub geographic_distribution: BTreeMap<String, u64>,
}

impl AnalyticsAggregate {
    pub fn record(&mut self, event: &BehaviorEvent) {
        self.total_events += 1;
        *self.devices.entry(event.device.clone()).or_default() += 1;
        if let Some(page) = &event.page {
            *self.pages.entry(page.clone()).or_default() += 1;
        }
        if let Some(location) = &event.location {
            *self.locations.entry(location.clone()).or_default() += 1;
        }
        if event.flags.is_conversion {
            self.buffered_conversions += 1;
        }
        if event.flags.is_bounce {
            self.buffered_bounces += 1;
        }
    }

    pub fn forget(&mut self, evicted: &BehaviorEvent) {
        if evicted.flags.is_conversion {
            self.buffered_conversions = self.buffered_conversions.saturating_sub(1);
        }
        if evicted.flags.is_bounce {
            self.buffered_bounces = self.buffered_bounces.saturating_sub(1);
        }
    }

    pub fn snapshot(&self, inputs: SnapshotInputs) -> AnalyticsSnapshot {
        let sessions = inputs.active_sessions.max(1) as f64;

        let mut top_pages: Vec<_> = self
            .pages
            .iter()
            .map(|(page, views)| PageCount { page: page.clone(), views: *views })
            .collect();
        top_pages.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.page.cmp(&b.page)));
        top_pages.truncate(TOP_PAGES);

        AnalyticsSnapshot {
            total_events: self.total_events,
            buffered_events: inputs.buffered_events,
            unique_customers: inputs.unique_customers,
            active_sessions: inputs.active_sessions,
            conversion_rate: self.buffered_conversions as f64 / sessions * 100.0,
            bounce_rate: self.buffered_bounces as f64 / sessions * 100.0,
            avg_time_on_site_secs: inputs.avg_time_on_site_secs,
            device_breakdown: self.devices.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            top_pages,
            geographic_distribution: self.locations.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }
}
