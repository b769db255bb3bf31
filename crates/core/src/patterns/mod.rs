//! Consumption pattern detection.
//!
//! Everything here is a pure function of a customer's purchase records, so the same history
//! yields the same patterns on a worker or on the ingesting thread.

pub mod frequency;
pub mod predictions;
pub mod seasonal;
pub mod temporal;
pub mod volume;

use crate::domain::pattern::Pattern;
use crate::store::PurchaseRecord;

pub use predictions::{insights, predict};
pub use temporal::{time_analysis, TimeAnalysis};

/// Purchases of one product plus every purchase of the same customer, both oldest first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PurchaseHistory {
    pub product_id: String,
    pub product: Vec<PurchaseRecord>,
    pub all: Vec<PurchaseRecord>,
}

impl PurchaseHistory {
    pub fn for_product(records: &[PurchaseRecord], product_id: &str) -> Self {
        let mut all = records.to_vec();
        all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.sequence.cmp(&b.sequence)));
        let product =
            all.iter().filter(|record| record.product_id == product_id).cloned().collect();
        Self { product_id: product_id.to_string(), product, all }
    }
}

/// Every pattern the history supports. Frequency and volume look at the one product;
/// seasonal and temporal look at the customer as a whole.
pub fn detect(history: &PurchaseHistory) -> Vec<Pattern> {
    let mut patterns = frequency::detect(&history.product);
    patterns.extend(volume::detect(&history.product));
    patterns.extend(seasonal::detect(&history.all));
    patterns.extend(temporal::detect(&history.all));
    patterns
}

pub fn overall_confidence(patterns: &[Pattern]) -> f64 {
    if patterns.is_empty() {
        return 0.0;
    }
    patterns.iter().map(|pattern| pattern.confidence).sum::<f64>() / patterns.len() as f64
}


#[cfg(test)]
mod tests {
    use super::fixtures::spaced;
    use super::{detect, overall_confidence, PurchaseHistory};
    use crate::domain::pattern::PatternKind;

    #[test]
    fn detection_only_emits_registry_kinds_with_bounded_confidence() {
        let mut records = spaced("milk", 12, 7, 1);
        records.extend(spaced("rice", 3, 30, 25));
        for product in ["milk", "rice", "bread"] {
            let history = PurchaseHistory::for_product(&records, product);
            for pattern in detect(&history) {
                assert!(PatternKind::ALL.contains(&pattern.kind));
                assert!((0.0..=1.0).contains(&pattern.confidence));
            }
        }
    }

    #[test]
    fn history_splits_product_purchases_from_the_rest() {
        let mut records = spaced("milk", 4, 7, 1);
        records.extend(spaced("rice", 2, 30, 25));
        let history = PurchaseHistory::for_product(&records, "rice");
        assert_eq!(history.product.len(), 2);
        assert_eq!(history.all.len(), 6);
        assert!(history.all.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[test]
    fn overall_confidence_is_the_mean() {
        let history = PurchaseHistory::for_product(&spaced("milk", 12, 7, 1), "milk");
        let patterns = detect(&history);
        assert!(!patterns.is_empty());
        let mean = patterns.iter().map(|p| p.confidence).sum::<f64>() / patterns.len() as f64;
        assert!((overall_confidence(&patterns) - mean).abs() < 1e-12);
        assert_eq!(overall_confidence(&[]), 0.0);
    }
}
