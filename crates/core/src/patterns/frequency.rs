use chrono::Duration;

use crate::domain::pattern::{Pattern, PatternData, PatternKind, PatternMetadata};
use crate::store::PurchaseRecord;

/// Purchases of one product needed before any interval is trusted.
pub const MIN_PURCHASES: usize = 3;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Matches the mean inter-purchase interval against every frequency band in the registry.
/// `purchases` must be oldest first.
pub fn detect(purchases: &[PurchaseRecord]) -> Vec<Pattern> {
    if purchases.len() < MIN_PURCHASES {
        return Vec::new();
    }
    let Some(average) = average_interval_days(purchases) else {
        return Vec::new();
    };
    let Some(last) = purchases.last() else {
        return Vec::new();
    };

    PatternKind::ALL
        .iter()
        .filter_map(|kind| kind.frequency_band().map(|band| (*kind, band)))
        .filter_map(|(kind, band)| {
            let deviation = (average - band.interval_days).abs();
            if deviation > band.tolerance_days {
                return None;
            }
            let confidence =
                (1.0 - deviation / band.tolerance_days).max(0.0) * band.base_confidence;
            let consistency = (1.0 - deviation / band.interval_days).max(0.0);
            let next = last.timestamp + Duration::days(band.interval_days as i64);
            Some(Pattern::new(
                kind,
                confidence,
                PatternData::Frequency {
                    average_interval_days: average,
                    last_purchase: last.timestamp,
                    next_predicted_purchase: next,
                },
                PatternMetadata { sample_size: purchases.len(), consistency: Some(consistency) },
            ))
        })
        .collect()
}

pub fn average_interval_days(purchases: &[PurchaseRecord]) -> Option<f64> {
    if purchases.len() < 2 {
        return None;
    }
    let total: f64 = purchases
        .windows(2)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_seconds() as f64 / SECONDS_PER_DAY)
        .sum();
    Some(total / (purchases.len() - 1) as f64)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::detect;
    use crate::domain::pattern::{PatternData, PatternKind};
    use crate::patterns::fixtures::{base, spaced};

    #[test]
    fn four_monthly_purchases_match_the_monthly_band() {
        let purchases = spaced("coffee", 4, 30, 1);
        let patterns = detect(&purchases);

        assert_eq!(patterns.len(), 1);
        let monthly = &patterns[0];
        assert_eq!(monthly.kind, PatternKind::FrequencyMonthly);
        assert!(monthly.confidence >= 0.8);
        match &monthly.data {
            PatternData::Frequency { next_predicted_purchase, last_purchase, .. } => {
                assert_eq!(*last_purchase, base() + Duration::days(90));
                assert_eq!(*next_predicted_purchase, base() + Duration::days(120));
            }
            other => panic!("unexpected data {other:?}"),
        }
        assert_eq!(monthly.metadata.sample_size, 4);
        assert_eq!(monthly.metadata.consistency, Some(1.0));
    }

    #[test]
    fn two_purchases_are_not_enough() {
        assert!(detect(&spaced("coffee", 2, 7, 1)).is_empty());
    }

    #[test]
    fn confidence_falls_off_with_deviation() {
        let exact = detect(&spaced("tea", 5, 7, 1));
        let drifted = detect(&spaced("tea", 5, 8, 1));
        assert_eq!(exact[0].kind, PatternKind::FrequencyWeekly);
        assert_eq!(drifted[0].kind, PatternKind::FrequencyWeekly);
        assert!((exact[0].confidence - 0.8).abs() < 1e-9);
        assert!((drifted[0].confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn irregular_intervals_match_nothing() {
        assert!(detect(&spaced("soap", 4, 50, 1)).is_empty());
    }
}
