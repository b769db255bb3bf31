use std::collections::BTreeMap;

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::domain::pattern::{Pattern, PatternData, PatternKind, PatternMetadata};
use crate::store::PurchaseRecord;

const MIN_BUCKETS: usize = 10;
const MIN_SIDE_BUCKETS: usize = 3;
const WEEKEND_LIFT: f64 = 1.5;
const EVENING_HOURS: std::ops::RangeInclusive<u32> = 17..=21;
const EVENING_SHARE: f64 = 0.6;

/// Purchase counts keyed by (day of week with Sunday = 0, hour), UTC.
type Buckets = BTreeMap<(u32, u32), u64>;

fn buckets(purchases: &[PurchaseRecord]) -> Buckets {
    let mut buckets = Buckets::new();
    for record in purchases {
        let key = (record.timestamp.weekday().num_days_from_sunday(), record.timestamp.hour());
        *buckets.entry(key).or_default() += 1;
    }
    buckets
}

fn is_weekend(day: u32) -> bool {
    day == 0 || day == 6
}

pub fn detect(purchases: &[PurchaseRecord]) -> Vec<Pattern> {
    let buckets = buckets(purchases);
    if buckets.len() < MIN_BUCKETS {
        return Vec::new();
    }

    let metadata = PatternMetadata { sample_size: purchases.len(), consistency: None };
    let total: u64 = buckets.values().sum();
    let mut patterns = Vec::new();

    let (weekend, weekday): (Vec<_>, Vec<_>) =
        buckets.iter().partition(|((day, _), _)| is_weekend(*day));
    if weekend.len() >= MIN_SIDE_BUCKETS && weekday.len() >= MIN_SIDE_BUCKETS {
        let weekend_total: u64 = weekend.iter().map(|(_, count)| **count).sum();
        let weekday_total: u64 = weekday.iter().map(|(_, count)| **count).sum();
        if weekend_total as f64 > weekday_total as f64 * WEEKEND_LIFT {
            patterns.push(Pattern::new(
                PatternKind::TemporalWeekend,
                0.75,
                PatternData::Temporal { share_pct: weekend_total as f64 / total as f64 * 100.0 },
                metadata.clone(),
            ));
        }
    }

    let evening: u64 = buckets
        .iter()
        .filter(|((_, hour), _)| EVENING_HOURS.contains(hour))
        .map(|(_, count)| *count)
        .sum();
    let share = evening as f64 / total as f64;
    if share > EVENING_SHARE {
        patterns.push(Pattern::new(
            PatternKind::TemporalEvening,
            0.8,
            PatternData::Temporal { share_pct: share * 100.0 },
            metadata,
        ));
    }

    patterns
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodCount {
    pub period: u32,
    pub count: u64,
}

/// When a customer tends to buy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeAnalysis {
    /// Day of week, Sunday = 0.
    pub peak_days: Vec<PeriodCount>,
    pub peak_hours: Vec<PeriodCount>,
    pub weekend_purchases: u64,
    pub weekday_purchases: u64,
}

pub fn time_analysis(purchases: &[PurchaseRecord]) -> TimeAnalysis {
    let mut days: BTreeMap<u32, u64> = BTreeMap::new();
    let mut hours: BTreeMap<u32, u64> = BTreeMap::new();
    let mut analysis = TimeAnalysis::default();

    for ((day, hour), count) in buckets(purchases) {
        *days.entry(day).or_default() += count;
        *hours.entry(hour).or_default() += count;
        if is_weekend(day) {
            analysis.weekend_purchases += count;
        } else {
            analysis.weekday_purchases += count;
        }
    }

    analysis.peak_days = top(days, 3);
    analysis.peak_hours = top(hours, 3);
    analysis
}

fn top(counts: BTreeMap<u32, u64>, limit: usize) -> Vec<PeriodCount> {
    let mut ranked: Vec<_> =
        counts.into_iter().map(|(period, count)| PeriodCount { period, count }).collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then(a.period.cmp(&b.period)));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{detect, time_analysis};
    use crate::domain::pattern::{PatternData, PatternKind};
    use crate::patterns::fixtures::purchase;
    use crate::store::PurchaseRecord;

    /// 2024-01-01 is a Monday.
    fn at(day_offset: i64, hour: u32, copies: usize, out: &mut Vec<PurchaseRecord>) {
        let when =
            Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap() + Duration::days(day_offset);
        for _ in 0..copies {
            let sequence = out.len() as u64 + 1;
            out.push(purchase(sequence, "snack", when, 1, 5.0));
        }
    }

    #[test]
    fn weekend_heavy_customer_is_a_weekend_shopper() {
        let mut purchases = Vec::new();
        for hour in 10..13 {
            at(5, hour, 3, &mut purchases); // Saturday
            at(6, hour, 3, &mut purchases); // Sunday
        }
        for day in 0..4 {
            at(day, 9, 1, &mut purchases);
        }

        let patterns = detect(&purchases);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].kind, PatternKind::TemporalWeekend);
        match patterns[0].data {
            PatternData::Temporal { share_pct } => {
                assert!((share_pct - 18.0 / 22.0 * 100.0).abs() < 1e-9)
            }
            ref other => panic!("unexpected data {other:?}"),
        }
    }

    #[test]
    fn evening_heavy_customer_is_an_evening_buyer() {
        let mut purchases = Vec::new();
        for day in 0..4 {
            at(day, 18, 1, &mut purchases);
            at(day, 20, 1, &mut purchases);
        }
        at(0, 8, 1, &mut purchases);
        at(1, 8, 1, &mut purchases);

        let kinds: Vec<_> = detect(&purchases).into_iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![PatternKind::TemporalEvening]);
    }

    #[test]
    fn fewer_than_ten_buckets_yield_nothing() {
        let mut purchases = Vec::new();
        for day in 0..3 {
            at(day, 19, 5, &mut purchases);
        }
        assert!(detect(&purchases).is_empty());
    }

    #[test]
    fn time_analysis_ranks_days_and_hours() {
        let mut purchases = Vec::new();
        at(5, 10, 4, &mut purchases);
        at(0, 19, 2, &mut purchases);
        at(2, 19, 1, &mut purchases);

        let analysis = time_analysis(&purchases);
        assert_eq!(analysis.peak_days[0].period, 6);
        assert_eq!(analysis.peak_hours[0].period, 10);
        assert_eq!(analysis.peak_hours[1].count, 3);
        assert_eq!((analysis.weekend_purchases, analysis.weekday_purchases), (4, 3));
    }
}
