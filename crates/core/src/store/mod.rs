//! Bounded in-memory event store.
//!
//! The buffer, journey table, analytics counters and consumption ledger each sit behind their
//! own lock. Sequence numbers are assigned while the buffer is write-locked, so buffer order
//! and sequence order agree and any `up_to_sequence` read is a consistent cut.

pub mod analytics;
pub mod consumption;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::domain::event::{BehaviorEvent, BehaviorInput, EventFlags, EventId, EventType};
use crate::domain::journey::{CustomerJourney, JourneyKey};
use crate::errors::IngestError;
use crate::sync::{lock, read, write};

pub use analytics::{AnalyticsAggregate, AnalyticsSnapshot, PageCount, SnapshotInputs};
pub use consumption::{CategoryTotals, ConsumptionLedger, CustomerIndex, PurchaseRecord};

pub const ANONYMOUS_SESSION: &str = "anonymous";
pub const DEFAULT_DEVICE: &str = "desktop";

/// Result of a successful ingest: the stored event and the customer's ledger slot.
#[derive(Clone, Debug)]
pub struct StoredEvent {
    pub event: Arc<BehaviorEvent>,
    pub customer: CustomerIndex,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    pub events_removed: usize,
    pub journeys_removed: usize,
    pub purchases_removed: usize,
}

#[derive(Debug, Default)]
struct JourneyTable {
    journeys: HashMap<JourneyKey, CustomerJourney>,
    active: HashSet<JourneyKey>,
}

impl JourneyTable {
    fn sweep(&mut self, now: DateTime<Utc>, idle_timeout: Duration) -> usize {
        let journeys = &mut self.journeys;
        let before = self.active.len();
        self.active.retain(|key| match journeys.get_mut(key) {
            Some(journey) if journey.is_idle(now, idle_timeout) => {
                journey.is_active = false;
                false
            }
            Some(_) => true,
            None => false,
        });
        before - self.active.len()
    }

    fn record(&mut self, event: &BehaviorEvent) {
        let key = JourneyKey::new(&event.customer_id, &event.session_id);
        match self.journeys.get_mut(&key) {
            Some(journey) => journey.record(event),
            None => {
                self.journeys.insert(key.clone(), CustomerJourney::start(event));
            }
        }
        self.active.insert(key);
    }

    fn mean_duration_secs(&self) -> f64 {
        if self.journeys.is_empty() {
            return 0.0;
        }
        let total: i64 = self.journeys.values().map(|j| j.duration().num_seconds()).sum();
        total as f64 / self.journeys.len() as f64
    }
}

#[derive(Debug)]
pub struct EventStore {
    capacity: usize,
    idle_timeout: Duration,
    next_sequence: AtomicU64,
    /// Newest first.
    buffer: RwLock<VecDeque<Arc<BehaviorEvent>>>,
    journeys: RwLock<JourneyTable>,
    analytics: Mutex<AnalyticsAggregate>,
    ledger: RwLock<ConsumptionLedger>,
}

impl EventStore {
    pub fn new(config: &StoreConfig) -> Self {
        let idle_secs = i64::try_from(config.journey_idle_timeout_secs).unwrap_or(i64::MAX);
        Self {
            capacity: config.capacity.max(1),
            idle_timeout: Duration::seconds(idle_secs),
            next_sequence: AtomicU64::new(0),
            buffer: RwLock::new(VecDeque::with_capacity(config.capacity.max(1))),
            journeys: RwLock::new(JourneyTable::default()),
            analytics: Mutex::new(AnalyticsAggregate::default()),
            ledger: RwLock::new(ConsumptionLedger::new(config.ledger_history_cap)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        read(&self.buffer).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest sequence handed out so far.
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::Acquire)
    }

    /// Stores one event. Only a missing or blank customer id is rejected.
    pub fn ingest(
        &self,
        input: BehaviorInput,
        now: DateTime<Utc>,
    ) -> Result<StoredEvent, IngestError> {
        let customer_id = input
            .customer_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| IngestError::Validation("customer_id is required".to_string()))?;

        let event_type = input.event_type.unwrap_or_else(|| EventType::Other("unknown".into()));
        let mut event = BehaviorEvent {
            id: EventId(format!("evt-{}", Uuid::new_v4())),
            sequence: 0,
            customer_id,
            session_id: input
                .session_id
                .filter(|session| !session.trim().is_empty())
                .unwrap_or_else(|| ANONYMOUS_SESSION.to_string()),
            timestamp: input.timestamp.unwrap_or(now),
            flags: EventFlags {
                is_purchase: event_type == EventType::Purchase,
                is_conversion: input.is_conversion,
                is_bounce: input.is_bounce,
            },
            event_type,
            action: input.action,
            category: input.category,
            value: input.value.filter(|value| value.is_finite()).unwrap_or(0.0),
            page: input.page,
            product: input.product,
            search_query: input.search_query,
            referrer: input.referrer,
            device: input.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            location: input.location,
            metadata: input.metadata,
        };

        let (event, evicted) = {
            let mut buffer = write(&self.buffer);
            event.sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel) + 1;
            let event = Arc::new(event);
            buffer.push_front(Arc::clone(&event));
            let mut evicted = Vec::new();
            while buffer.len() > self.capacity {
                if let Some(oldest) = buffer.pop_back() {
                    evicted.push(oldest);
                }
            }
            (event, evicted)
        };

        {
            let mut analytics = lock(&self.analytics);
            analytics.record(&event);
            for old in &evicted {
                analytics.forget(old);
            }
        }

        {
            let mut journeys = write(&self.journeys);
            let flagged = journeys.sweep(event.timestamp, self.idle_timeout);
            if flagged > 0 {
                tracing::debug!(
                    event_name = "store.journeys.inactive",
                    flagged,
                    "journeys flagged inactive"
                );
            }
            journeys.record(&event);
        }

        let customer = {
            let mut ledger = write(&self.ledger);
            let customer = ledger.intern(&event.customer_id);
            if event.is_purchase() {
                ledger.record_purchase(customer, PurchaseRecord::from_event(&event));
            }
            customer
        };

        Ok(StoredEvent { event, customer })
    }

    /// The customer's buffered events within `window` of `now`, newest first.
    pub fn query_recent(
        &self,
        customer_id: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Vec<Arc<BehaviorEvent>> {
        let since = now - window;
        read(&self.buffer)
            .iter()
            .filter(|event| event.customer_id == customer_id && event.timestamp >= since)
            .cloned()
            .collect()
    }

    /// The customer's buffered events in arrival order, up to and including `up_to_sequence`.
    pub fn customer_events(&self, customer_id: &str, up_to_sequence: u64) -> Vec<BehaviorEvent> {
        read(&self.buffer)
            .iter()
            .rev()
            .filter(|event| event.customer_id == customer_id && event.sequence <= up_to_sequence)
            .map(|event| event.as_ref().clone())
            .collect()
    }

    /// Every buffered event at or after `since`, newest first.
    pub fn events_since(&self, since: DateTime<Utc>) -> Vec<BehaviorEvent> {
        read(&self.buffer)
            .iter()
            .filter(|event| event.timestamp >= since)
            .map(|event| event.as_ref().clone())
            .collect()
    }

    pub fn journey(&self, customer_id: &str, session_id: &str) -> Option<CustomerJourney> {
        read(&self.journeys).journeys.get(&JourneyKey::new(customer_id, session_id)).cloned()
    }

    pub fn journeys_for(&self, customer_id: &str) -> Vec<CustomerJourney> {
        let mut journeys: Vec<_> = read(&self.journeys)
            .journeys
            .values()
            .filter(|journey| journey.key.customer_id == customer_id)
            .cloned()
            .collect();
        journeys.sort_by(|a, b| b.end_time.cmp(&a.end_time));
        journeys
    }

    /// Flags every journey idle for longer than the configured timeout.
    pub fn sweep_inactive(&self, now: DateTime<Utc>) -> usize {
        write(&self.journeys).sweep(now, self.idle_timeout)
    }

    pub fn customer_index(&self, customer_id: &str) -> Option<CustomerIndex> {
        read(&self.ledger).lookup(customer_id)
    }

    /// Ledger slot for `customer_id`, allocating one for customers never seen before.
    pub fn intern_customer(&self, customer_id: &str) -> CustomerIndex {
        if let Some(customer) = self.customer_index(customer_id) {
            return customer;
        }
        write(&self.ledger).intern(customer_id)
    }

    pub fn purchases(&self, customer: CustomerIndex, up_to_sequence: u64) -> Vec<PurchaseRecord> {
        read(&self.ledger).purchases(customer, up_to_sequence)
    }

    /// Lifetime purchased quantity and spend.
    pub fn purchase_totals(&self, customer: CustomerIndex) -> (u64, f64) {
        read(&self.ledger).totals(customer)
    }

    pub fn favorite_categories(
        &self,
        customer: CustomerIndex,
        limit: usize,
    ) -> Vec<CategoryTotals> {
        read(&self.ledger).favorite_categories(customer, limit)
    }

    pub fn metrics(&self) -> AnalyticsSnapshot {
        let buffered_events = self.len();
        let unique_customers = read(&self.ledger).customer_count();
        let (active_sessions, avg_time_on_site_secs) = {
            let journeys = read(&self.journeys);
            (journeys.active.len(), journeys.mean_duration_secs())
        };
        lock(&self.analytics).snapshot(SnapshotInputs {
            buffered_events,
            unique_customers,
            active_sessions,
            avg_time_on_site_secs,
        })
    }

    /// Drops events, journeys and purchase records older than `days` days before `now`.
    pub fn clear_older_than(&self, days: u32, now: DateTime<Utc>) -> ClearReport {
        let cutoff = now - Duration::days(i64::from(days));

        let removed_events: VecDeque<_> = {
            let mut buffer = write(&self.buffer);
            let (keep, stale): (VecDeque<_>, VecDeque<_>) =
                buffer.drain(..).partition(|event| event.timestamp >= cutoff);
            *buffer = keep;
            stale
        };
        {
            let mut analytics = lock(&self.analytics);
            for event in &removed_events {
                analytics.forget(event);
            }
        }

        let journeys_removed = {
            let mut table = write(&self.journeys);
            let before = table.journeys.len();
            table.journeys.retain(|_, journey| journey.end_time >= cutoff);
            let JourneyTable { journeys, active } = &mut *table;
            active.retain(|key| journeys.contains_key(key));
            before - journeys.len()
        };

        let purchases_removed = write(&self.ledger).prune_before(cutoff);

        let report = ClearReport {
            events_removed: removed_events.len(),
            journeys_removed,
            purchases_removed,
        };
        tracing::info!(
            event_name = "store.cleared",
            events_removed = report.events_removed,
            journeys_removed = report.journeys_removed,
            purchases_removed = report.purchases_removed,
            "cleared stale behavior data"
        );
        report
    }

    pub fn reset(&self) {
        write(&self.buffer).clear();
        *write(&self.journeys) = JourneyTable::default();
        *lock(&self.analytics) = AnalyticsAggregate::default();
        write(&self.ledger).reset();
    }
}
