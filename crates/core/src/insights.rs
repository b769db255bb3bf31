//! Store-wide behavior insights over the last 24 hours: most common event types, busiest
//! hours, and the hour-over-hour activity trend.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::event::BehaviorEvent;

const TOP_BEHAVIORS: usize = 5;
const PEAK_HOURS: usize = 3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsightsInput {
    pub events: Vec<BehaviorEvent>,
    pub now: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BehaviorShare {
    pub event_type: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourCount {
    pub hour: u32,
    pub count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMove {
    Up,
    Down,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityTrend {
    pub metric: String,
    pub change_pct: f64,
    pub direction: TrendMove,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightReport {
    pub generated_at: Option<DateTime<Utc>>,
    pub window_events: usize,
    pub top_behaviors: Vec<BehaviorShare>,
    pub peak_hours: Vec<HourCount>,
    pub peak_description: Option<String>,
    pub trends: Vec<ActivityTrend>,
}

pub fn build(input: &InsightsInput) -> InsightReport {
    let now = input.now;
    let day_ago = now - Duration::hours(24);
    let recent: Vec<_> =
        input.events.iter().filter(|e| e.timestamp > day_ago && e.timestamp <= now).collect();
    if recent.is_empty() {
        return InsightReport { generated_at: Some(now), ..InsightReport::default() };
    }

    let mut by_type: HashMap<&str, usize> = HashMap::new();
    let mut by_hour: BTreeMap<u32, usize> = BTreeMap::new();
    for event in &recent {
        *by_type.entry(event.event_type.as_str()).or_default() += 1;
        *by_hour.entry(event.timestamp.hour()).or_default() += 1;
    }

    let total = recent.len() as f64;
    let mut top_behaviors: Vec<_> = by_type
        .into_iter()
        .map(|(event_type, count)| BehaviorShare {
            event_type: event_type.to_string(),
            count,
            percentage: count as f64 / total * 100.0,
        })
        .collect();
    top_behaviors
        .sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.event_type.cmp(&b.event_type)));
    top_behaviors.truncate(TOP_BEHAVIORS);

    let mut peak_hours: Vec<_> =
        by_hour.into_iter().map(|(hour, count)| HourCount { hour, count }).collect();
    peak_hours.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.hour.cmp(&b.hour)));
    peak_hours.truncate(PEAK_HOURS);
    let hours: Vec<_> = peak_hours.iter().map(|p| format!("{}:00", p.hour)).collect();

    InsightReport {
        generated_at: Some(now),
        window_events: recent.len(),
        top_behaviors,
        peak_description: Some(format!("Peak activity: {}", hours.join(", "))),
        peak_hours,
        trends: hourly_trend(&recent, now).into_iter().collect(),
    }
}

fn hourly_trend(recent: &[&BehaviorEvent], now: DateTime<Utc>) -> Option<ActivityTrend> {
    let hour_ago = now - Duration::hours(1);
    let two_hours_ago = now - Duration::hours(2);
    let current = recent.iter().filter(|e| e.timestamp > hour_ago).count();
    let previous =
        recent.iter().filter(|e| e.timestamp <= hour_ago && e.timestamp > two_hours_ago).count();
    if previous == 0 {
        return None;
    }

    let change = (current as f64 - previous as f64) / previous as f64 * 100.0;
    let (direction, verb) =
        if change > 0.0 { (TrendMove::Up, "increased") } else { (TrendMove::Down, "decreased") };
    Some(ActivityTrend {
        metric: "hourly_activity".to_string(),
        change_pct: change,
        direction,
        description: format!("Activity {verb} by {:.1}%", change.abs()),
    })
}
