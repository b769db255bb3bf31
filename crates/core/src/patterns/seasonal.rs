use std::collections::BTreeMap;

use chrono::Datelike;

use crate::domain::pattern::{Pattern, PatternData, PatternKind, PatternMetadata};
use crate::store::PurchaseRecord;

const MIN_MONTHS: usize = 6;
const MIN_SEASON_MONTHS: usize = 2;
const MIN_OTHER_MONTHS: usize = 3;
const SEASONAL_LIFT: f64 = 1.5;

const SEASONS: [(PatternKind, [u32; 3]); 2] = [
    (PatternKind::SeasonalSummer, [6, 7, 8]),
    (PatternKind::SeasonalWinter, [12, 1, 2]),
];

/// Compares average spend per purchase inside a season with the rest of the year, bucketed by
/// calendar month (UTC).
pub fn detect(purchases: &[PurchaseRecord]) -> Vec<Pattern> {
    let months = monthly_averages(purchases);
    if months.len() < MIN_MONTHS {
        return Vec::new();
    }

    SEASONS
        .iter()
        .filter_map(|(kind, season)| {
            let (inside, outside): (Vec<_>, Vec<_>) =
                months.iter().partition(|(month, _)| season.contains(*month));
            if inside.len() < MIN_SEASON_MONTHS || outside.len() < MIN_OTHER_MONTHS {
                return None;
            }

            let inside_mean = mean(inside.iter().map(|(_, avg)| **avg));
            let outside_mean = mean(outside.iter().map(|(_, avg)| **avg));
            if outside_mean <= 0.0 || inside_mean <= outside_mean * SEASONAL_LIFT {
                return None;
            }

            Some(Pattern::new(
                *kind,
                0.8,
                PatternData::Seasonal {
                    multiplier: inside_mean / outside_mean,
                    peak_months: inside.iter().map(|(month, _)| **month).collect(),
                    seasonal_increase_pct: (inside_mean - outside_mean) / outside_mean * 100.0,
                },
                PatternMetadata { sample_size: purchases.len(), consistency: None },
            ))
        })
        .collect()
}

/// Average purchase value per calendar month (1-12).
fn monthly_averages(purchases: &[PurchaseRecord]) -> BTreeMap<u32, f64> {
    let mut buckets: BTreeMap<u32, (f64, u32)> = BTreeMap::new();
    for record in purchases {
        let bucket = buckets.entry(record.timestamp.month()).or_default();
        bucket.0 += record.value;
        bucket.1 += 1;
    }
    buckets.into_iter().map(|(month, (total, count))| (month, total / f64::from(count))).collect()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
