//! Batch coalescer and lane drivers.
//!
//! Jobs arrive on a bounded channel. The coalescer flushes when a batch reaches `batch_size`
//! or when the oldest job in it has waited `batch_delay`, and splits each batch into lanes by
//! customer. A lane is drained by exactly one driver task, one customer group at a time, so a
//! customer's jobs are always processed in arrival order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::domain::event::BehaviorEvent;
use crate::domain::feedback::FeedbackData;
use crate::errors::OffloadError;
use crate::offload::message::{RequestKind, RequestPayload, ResponsePayload};
use crate::offload::metrics::OffloadMetrics;
use crate::offload::pool::WorkerPool;
use crate::offload::processor::{AnalysisInput, AnalysisProcessor};
use crate::offload::AnalysisSink;
use crate::store::CustomerIndex;
use crate::sync::lock;

#[derive(Clone, Debug)]
pub enum Job {
    Behavior { customer: CustomerIndex, event: Arc<BehaviorEvent> },
    Feedback {
        customer: CustomerIndex,
        customer_id: String,
        revision: u64,
        feedback: FeedbackData,
        at: DateTime<Utc>,
    },
}

impl Job {
    pub fn customer(&self) -> CustomerIndex {
        match self {
            Self::Behavior { customer, .. } | Self::Feedback { customer, .. } => *customer,
        }
    }

    /// Raw customer id; stays inside the process.
    pub fn customer_id(&self) -> &str {
        match self {
            Self::Behavior { event, .. } => &event.customer_id,
            Self::Feedback { customer_id, .. } => customer_id,
        }
    }
}

/// Submitted and completed job counts, used as a flush barrier.
#[derive(Debug, Default)]
pub struct Progress {
    submitted: AtomicU64,
    completed: AtomicU64,
    notify: Notify,
}

impl Progress {
    pub fn submit(&self) {
        self.submitted.fetch_add(1, Ordering::AcqRel);
    }

    pub fn complete(&self, jobs: usize) {
        self.completed.fetch_add(jobs as u64, Ordering::AcqRel);
        self.notify.notify_waiters();
    }

    pub fn outstanding(&self) -> u64 {
        let submitted = self.submitted.load(Ordering::Acquire);
        submitted.saturating_sub(self.completed.load(Ordering::Acquire))
    }

    /// Resolves once every job submitted before the call has completed.
    pub async fn wait(&self) {
        let target = self.submitted.load(Ordering::Acquire);
        loop {
            let notified = self.notify.notified();
            if self.completed.load(Ordering::Acquire) >= target {
                return;
            }
            notified.await;
        }
    }
}

pub fn lane_of(customer: CustomerIndex, lanes: usize) -> usize {
    customer.slot() % lanes.max(1)
}

/// Splits jobs per customer, keeping first-seen customer order and per-customer job order.
pub fn group_by_customer(jobs: Vec<Job>) -> Vec<(CustomerIndex, Vec<Job>)> {
    let mut groups: Vec<(CustomerIndex, Vec<Job>)> = Vec::new();
    for job in jobs {
        let customer = job.customer();
        match groups.iter_mut().find(|(existing, _)| *existing == customer) {
            Some((_, group)) => group.push(job),
            None => groups.push((customer, vec![job])),
        }
    }
    groups
}

fn drain_ready(
    queue: &mut mpsc::Receiver<Job>,
    spill: &Mutex<VecDeque<Job>>,
    batch: &mut Vec<Job>,
) {
    while let Ok(job) = queue.try_recv() {
        batch.push(job);
    }
    batch.extend(lock(spill).drain(..));
}

fn flush(
    batch: &mut Vec<Job>,
    lanes: &[mpsc::UnboundedSender<Vec<Job>>],
    metrics: &OffloadMetrics,
) {
    if batch.is_empty() {
        return;
    }
    let mut per_lane: Vec<Vec<Job>> = vec![Vec::new(); lanes.len()];
    for job in batch.drain(..) {
        per_lane[lane_of(job.customer(), lanes.len())].push(job);
    }
    for (lane, jobs) in per_lane.into_iter().enumerate() {
        if jobs.is_empty() {
            continue;
        }
        if lanes[lane].send(jobs).is_err() {
            tracing::error!(event_name = "offload.lane.closed", lane, "lane driver is gone");
        }
    }
    metrics.record_batch();
}

pub(crate) async fn coalesce(
    mut queue: mpsc::Receiver<Job>,
    spill: Arc<Mutex<VecDeque<Job>>>,
    lanes: Vec<mpsc::UnboundedSender<Vec<Job>>>,
    batch_size: usize,
    batch_delay: Duration,
    metrics: Arc<OffloadMetrics>,
) {
    let mut batch = Vec::with_capacity(batch_size);
    let mut deadline: Option<Instant> = None;

    loop {
        let wake_at = deadline;
        let timer = async move {
            match wake_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            job = queue.recv() => match job {
                Some(job) => {
                    batch.push(job);
                    drain_ready(&mut queue, &spill, &mut batch);
                    if batch.len() >= batch_size {
                        flush(&mut batch, &lanes, &metrics);
                        deadline = None;
                    } else if deadline.is_none() {
                        deadline = Some(Instant::now() + batch_delay);
                    }
                }
                None => {
                    batch.extend(lock(&spill).drain(..));
                    flush(&mut batch, &lanes, &metrics);
                    break;
                }
            },
            _ = timer => {
                drain_ready(&mut queue, &spill, &mut batch);
                flush(&mut batch, &lanes, &metrics);
                deadline = None;
            }
        }
    }
    tracing::debug!(event_name = "offload.coalescer.stopped", "coalescer stopped");
}

/// Shared by every lane driver.
pub(crate) struct LaneContext<S> {
    pub sink: Arc<S>,
    pub pool: Arc<WorkerPool>,
    pub fallback: Arc<dyn AnalysisProcessor>,
    pub metrics: Arc<OffloadMetrics>,
    pub progress: Arc<Progress>,
}

pub(crate) async fn drive_lane<S: AnalysisSink>(
    lane: usize,
    mut inbox: mpsc::UnboundedReceiver<Vec<Job>>,
    context: Arc<LaneContext<S>>,
) {
    while let Some(jobs) = inbox.recv().await {
        for (customer, group) in group_by_customer(jobs) {
            let count = group.len();
            process_group(lane, customer, &group, &context).await;
            context.progress.complete(count);
        }
    }
}

async fn process_group<S: AnalysisSink>(
    lane: usize,
    customer: CustomerIndex,
    jobs: &[Job],
    context: &LaneContext<S>,
) {
    let Some(input) = context.sink.snapshot(customer, jobs) else {
        return;
    };
    let kind =
        if jobs.len() == 1 { RequestKind::ProcessBehavior } else { RequestKind::BatchProcess };

    let payload = RequestPayload::Analysis(input.clone());
    match context.pool.dispatch(lane, kind, payload).await {
        Ok(ResponsePayload::Analysis(outcome)) => context.sink.merge(customer, outcome),
        Ok(ResponsePayload::Insights(_)) => {
            context.metrics.record_fallback();
            context.sink.report("worker_error", &"analysis request answered with insights", None);
            run_inline(context.sink.as_ref(), context.fallback.as_ref(), customer, &input);
        }
        Err(error) => {
            context.metrics.record_fallback();
            let correlation_id = match &error {
                OffloadError::Timeout { correlation_id, .. } => Some(correlation_id.as_str()),
                _ => None,
            };
            context.sink.report(error.code(), &error, correlation_id);
            tracing::info!(
                event_name = "offload.fallback",
                lane,
                customer = %input.customer,
                jobs = jobs.len(),
                error_code = error.code(),
                "processing on the synchronous fallback"
            );
            run_inline(context.sink.as_ref(), context.fallback.as_ref(), customer, &input);
        }
    }
}

/// Runs `input` through `processor` on the current thread and merges the result.
pub(crate) fn run_inline<S: AnalysisSink + ?Sized>(
    sink: &S,
    processor: &dyn AnalysisProcessor,
    customer: CustomerIndex,
    input: &AnalysisInput,
) {
    match processor.analyze(input) {
        Ok(outcome) => sink.merge(customer, outcome),
        Err(error) => sink.report(error.code(), &error, None),
    }
}
