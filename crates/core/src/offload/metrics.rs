use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counters for the offload path. Updated lock-free from the coalescer, lanes and router.
#[derive(Debug, Default)]
pub struct OffloadMetrics {
    queued: AtomicU64,
    spilled: AtomicU64,
    inline: AtomicU64,
    batches_flushed: AtomicU64,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    timed_out: AtomicU64,
    worker_errors: AtomicU64,
    worker_crashes: AtomicU64,
    fallbacks: AtomicU64,
    late_responses: AtomicU64,
    restarts: AtomicU64,
    stale_merges: AtomicU64,
    processing_micros: AtomicU64,
    processed: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OffloadSnapshot {
    pub queued: u64,
    pub spilled: u64,
    pub inline: u64,
    pub batches_flushed: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub timed_out: u64,
    pub worker_errors: u64,
    pub worker_crashes: u64,
    pub fallbacks: u64,
    pub late_responses: u64,
    pub restarts: u64,
    pub stale_merges: u64,
    pub average_processing_ms: f64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl OffloadMetrics {
    counter! {
        record_queued => queued,
        record_spilled => spilled,
        record_inline => inline,
        record_batch => batches_flushed,
        record_dispatch => dispatched,
        record_success => succeeded,
        record_timeout => timed_out,
        record_worker_error => worker_errors,
        record_crash => worker_crashes,
        record_fallback => fallbacks,
        record_late_response => late_responses,
        record_restart => restarts,
        record_stale_merge => stale_merges,
    }

    pub fn record_processing(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.processing_micros.fetch_add(micros, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OffloadSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let micros = self.processing_micros.load(Ordering::Relaxed);
        OffloadSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            spilled: self.spilled.load(Ordering::Relaxed),
            inline: self.inline.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            worker_errors: self.worker_errors.load(Ordering::Relaxed),
            worker_crashes: self.worker_crashes.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            late_responses: self.late_responses.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            stale_merges: self.stale_merges.load(Ordering::Relaxed),
            average_processing_ms: if processed == 0 {
                0.0
            } else {
                micros as f64 / processed as f64 / 1000.0
            },
        }
    }
}
