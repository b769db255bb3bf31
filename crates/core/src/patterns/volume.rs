use crate::domain::pattern::{Pattern, PatternData, PatternKind, PatternMetadata};
use crate::store::PurchaseRecord;

const BULK_MIN_QUANTITY: f64 = 10.0;
const BULK_MAX_PURCHASES: usize = 5;
const FREQUENT_MAX_QUANTITY: f64 = 3.0;
const FREQUENT_MIN_PURCHASES: usize = 10;

pub fn detect(purchases: &[PurchaseRecord]) -> Vec<Pattern> {
    if purchases.is_empty() {
        return Vec::new();
    }

    let count = purchases.len();
    let total_quantity: u64 = purchases.iter().map(|record| u64::from(record.quantity)).sum();
    let total_spent: f64 = purchases.iter().map(|record| record.value).sum();
    let average_quantity = total_quantity as f64 / count as f64;

    let matched = if average_quantity >= BULK_MIN_QUANTITY && count <= BULK_MAX_PURCHASES {
        Some((PatternKind::VolumeBulk, 0.8))
    } else if average_quantity <= FREQUENT_MAX_QUANTITY && count >= FREQUENT_MIN_PURCHASES {
        Some((PatternKind::VolumeFrequent, 0.85))
    } else {
        None
    };

    matched
        .map(|(kind, confidence)| {
            Pattern::new(
                kind,
                confidence,
                PatternData::Volume { average_quantity, total_spent },
                PatternMetadata { sample_size: count, consistency: None },
            )
        })
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::detect;
    use crate::domain::pattern::{PatternData, PatternKind};
    use crate::patterns::fixtures::spaced;

    #[test]
    fn few_large_purchases_are_bulk() {
        let patterns = detect(&spaced("rice", 3, 30, 12));
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].kind, PatternKind::VolumeBulk);
        assert_eq!(
            patterns[0].data,
            PatternData::Volume { average_quantity: 12.0, total_spent: 30.0 }
        );
    }

    #[test]
    fn many_small_purchases_are_frequent() {
        let patterns = detect(&spaced("gum", 10, 2, 1));
        assert_eq!(patterns[0].kind, PatternKind::VolumeFrequent);
        assert!((patterns[0].confidence - 0.85).abs() < 1e-12);
    }

    #[test]
    fn middle_ground_is_not_a_volume_pattern() {
        assert!(detect(&spaced("bread", 6, 7, 5)).is_empty());
        assert!(detect(&[]).is_empty());
    }
}
