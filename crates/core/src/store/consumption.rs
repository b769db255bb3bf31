//! Per-customer purchase ledger.
//!
//! Customers are interned to a dense [`CustomerIndex`] on first sight and their profiles live
//! in a `Vec` arena, so per-customer state elsewhere in the engine can be addressed by integer
//! instead of re-hashing the raw id.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::event::BehaviorEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CustomerIndex(pub u32);

impl CustomerIndex {
    pub fn slot(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub sequence: u64,
    pub product_id: String,
    pub category: Option<String>,
    pub quantity: u32,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl PurchaseRecord {
    pub fn from_event(event: &BehaviorEvent) -> Self {
        let (product_id, category, quantity) = match &event.product {
            Some(product) => (
                product.id.clone(),
                product.category.clone().or_else(|| event.category.clone()),
                product.quantity.max(1),
            ),
            None => (
                event.category.clone().unwrap_or_else(|| "uncategorized".to_string()),
                event.category.clone(),
                1,
            ),
        };
        Self {
            sequence: event.sequence,
            product_id,
            category,
            quantity,
            value: event.value,
            timestamp: event.timestamp,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub category: String,
    pub purchases: u64,
    pub quantity: u64,
    pub spent: f64,
}

#[derive(Clone, Debug, Default)]
struct CustomerProfile {
    purchases: VecDeque<PurchaseRecord>,
    total_quantity: u64,
    total_spent: f64,
    categories: BTreeMap<String, CategoryTotals>,
}

#[derive(Debug)]
pub struct ConsumptionLedger {
    index: HashMap<String, CustomerIndex>,
    profiles: Vec<CustomerProfile>,
    history_cap: usize,
}

impl ConsumptionLedger {
    pub fn new(history_cap: usize) -> Self {
        Self { index: HashMap::new(), profiles: Vec::new(), history_cap: history_cap.max(1) }
    }

    pub fn intern(&mut self, customer_id: &str) -> CustomerIndex {
        if let Some(index) = self.index.get(customer_id) {
            return *index;
        }
        let index = CustomerIndex(self.profiles.len() as u32);
        self.profiles.push(CustomerProfile::default());
        self.index.insert(customer_id.to_string(), index);
        index
    }

    pub fn lookup(&self, customer_id: &str) -> Option<CustomerIndex> {
        self.index.get(customer_id).copied()
    }

    pub fn customer_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn record_purchase(&mut self, customer: CustomerIndex, record: PurchaseRecord) {
        let Some(profile) = self.profiles.get_mut(customer.slot()) else {
            return;
        };

        profile.total_quantity += u64::from(record.quantity);
        profile.total_spent += record.value;
        let category = record.category.clone().unwrap_or_else(|| "uncategorized".to_string());
        let totals = profile
            .categories
            .entry(category.clone())
            .or_insert_with(|| CategoryTotals { category, ..CategoryTotals::default() });
        totals.purchases += 1;
        totals.quantity += u64::from(record.quantity);
        totals.spent += record.value;

        profile.purchases.push_back(record);
        while profile.purchases.len() > self.history_cap {
            profile.purchases.pop_front();
        }
    }

    /// Purchases in arrival order, bounded by store sequence.
    pub fn purchases(&self, customer: CustomerIndex, up_to_sequence: u64) -> Vec<PurchaseRecord> {
        self.profiles
            .get(customer.slot())
            .map(|profile| {
                profile
                    .purchases
                    .iter()
                    .filter(|record| record.sequence <= up_to_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Categories ordered by spend, highest first.
    pub fn favorite_categories(
        &self,
        customer: CustomerIndex,
        limit: usize,
    ) -> Vec<CategoryTotals> {
        let Some(profile) = self.profiles.get(customer.slot()) else {
            return Vec::new();
        };
        let mut categories: Vec<_> = profile.categories.values().cloned().collect();
        categories.sort_by(|a, b| b.spent.total_cmp(&a.spent));
        categories.truncate(limit);
        categories
    }

    pub fn totals(&self, customer: CustomerIndex) -> (u64, f64) {
        self.profiles
            .get(customer.slot())
            .map(|profile| (profile.total_quantity, profile.total_spent))
            .unwrap_or((0, 0.0))
    }

    /// Drops purchase records older than `cutoff`. Category totals are lifetime aggregates and
    /// are kept.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for profile in &mut self.profiles {
            let before = profile.purchases.len();
            profile.purchases.retain(|record| record.timestamp >= cutoff);
            removed += before - profile.purchases.len();
        }
        removed
    }

    pub fn total_purchases(&self) -> usize {
        self.profiles.iter().map(|profile| profile.purchases.len()).sum()
    }

    pub fn reset(&mut self) {
        self.index.clear();
        self.profiles.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{ConsumptionLedger, PurchaseRecord};

    fn record(
        sequence: u64,
        product: &str,
        category: &str,
        value: f64,
        day: i64,
    ) -> PurchaseRecord {
        PurchaseRecord {
            sequence,
            product_id: product.into(),
            category: Some(category.into()),
            quantity: 2,
            value,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::days(day),
        }
    }

    #[test]
    fn interning_is_stable_and_dense() {
        let mut ledger = ConsumptionLedger::new(10);
        let a = ledger.intern("alice");
        let b = ledger.intern("bob");
        assert_eq!(ledger.intern("alice"), a);
        assert_eq!((a.0, b.0), (0, 1));
        assert_eq!(ledger.lookup("carol"), None);
        assert_eq!(ledger.customer_count(), 2);
    }

    #[test]
    fn purchases_are_bounded_by_sequence_and_capacity() {
        let mut ledger = ConsumptionLedger::new(3);
        let a = ledger.intern("alice");
        for seq in 1..=5 {
            ledger.record_purchase(a, record(seq, "milk", "dairy", 4.0, seq as i64));
        }

        let all = ledger.purchases(a, u64::MAX);
        assert_eq!(all.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(ledger.purchases(a, 4).len(), 2);
        assert_eq!(ledger.totals(a), (10, 20.0));
    }

    #[test]
    fn favorite_categories_rank_by_spend() {
        let mut ledger = ConsumptionLedger::new(10);
        let a = ledger.intern("alice");
        ledger.record_purchase(a, record(1, "milk", "dairy", 4.0, 0));
        ledger.record_purchase(a, record(2, "tv", "electronics", 400.0, 1));
        ledger.record_purchase(a, record(3, "cheese", "dairy", 9.0, 2));

        let favorites = ledger.favorite_categories(a, 5);
        assert_eq!(favorites[0].category, "electronics");
        assert_eq!(favorites[1].purchases, 2);
    }

    #[test]
    fn pruning_removes_only_old_records() {
        let mut ledger = ConsumptionLedger::new(10);
        let a = ledger.intern("alice");
        ledger.record_purchase(a, record(1, "milk", "dairy", 4.0, 0));
        ledger.record_purchase(a, record(2, "milk", "dairy", 4.0, 10));

        let cutoff = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        assert_eq!(ledger.prune_before(cutoff), 1);
        assert_eq!(ledger.total_purchases(), 1);
    }
}
