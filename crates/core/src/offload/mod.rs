//! Moves pattern detection and scoring off the ingesting thread.
//!
//! Ingestion hands each job to [`Offloader::submit`], which never blocks: the job goes onto a
//! bounded queue, or onto an ordered spill buffer when the queue is full, or is processed
//! inline once the offloader has been shut down. The coalescer batches queued jobs into
//! per-worker lanes; a lane that cannot get an answer from its worker (timeout, error, crash)
//! processes the same snapshot on the fallback processor and merges it exactly once.

pub mod coalescer;
pub mod message;
pub mod metrics;
pub mod pool;
pub mod processor;

use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::config::OffloadConfig;
use crate::errors::ComputationError;
use crate::insights::{InsightReport, InsightsInput};
use crate::sanitizer::Sanitizer;
use crate::store::CustomerIndex;
use crate::sync::lock;

pub use coalescer::Job;
pub use message::{RequestKind, RequestPayload, ResponseKind, ResponsePayload};
pub use message::{WorkerRequest, WorkerResponse};
pub use metrics::{OffloadMetrics, OffloadSnapshot};
pub use pool::{PoolSettings, WorkerPool};
pub use processor::{
    AnalysisInput, AnalysisOutcome, AnalysisProcessor, AnalysisSettings, AnalysisStep,
    StandardProcessor,
};

use coalescer::{LaneContext, Progress};

/// Where snapshots come from and results go back to.
pub trait AnalysisSink: Send + Sync + 'static {
    /// Owned input for `jobs`, or `None` when the customer is unknown.
    fn snapshot(&self, customer: CustomerIndex, jobs: &[Job]) -> Option<AnalysisInput>;

    /// Applies an outcome. Must ignore outcomes older than the current state.
    fn merge(&self, customer: CustomerIndex, outcome: AnalysisOutcome);

    fn report(&self, code: &str, error: &dyn Display, correlation_id: Option<&str>);
}

#[derive(Clone, Copy, Debug)]
pub struct OffloadSettings {
    pub pool: PoolSettings,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub queue_capacity: usize,
}

impl OffloadSettings {
    pub fn from_config(config: &OffloadConfig) -> Self {
        Self {
            pool: PoolSettings {
                workers: config.workers,
                task_timeout: config.task_timeout(),
                max_consecutive_failures: config.max_consecutive_failures,
            },
            batch_size: config.batch_size.max(1),
            batch_delay: config.batch_delay(),
            queue_capacity: config.queue_capacity.max(1),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OffloadStatus {
    pub mode: String,
    pub workers: usize,
    pub active_workers: usize,
    pub pending_requests: usize,
    pub outstanding_jobs: u64,
    pub spilled_jobs: usize,
}

pub struct Offloader<S: AnalysisSink> {
    sink: Arc<S>,
    fallback: Arc<dyn AnalysisProcessor>,
    metrics: Arc<OffloadMetrics>,
    progress: Arc<Progress>,
    pool: Option<Arc<WorkerPool>>,
    queue: Mutex<Option<mpsc::Sender<Job>>>,
    spill: Arc<Mutex<VecDeque<Job>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_insights_worker: AtomicUsize,
}

impl<S: AnalysisSink> Offloader<S> {
    /// Starts the worker pool, the coalescer and one lane driver per worker on `runtime`.
    pub fn start(
        settings: OffloadSettings,
        runtime: Handle,
        sink: Arc<S>,
        worker_processor: Arc<dyn AnalysisProcessor>,
        fallback: Arc<dyn AnalysisProcessor>,
        sanitizer: Arc<Sanitizer>,
        metrics: Arc<OffloadMetrics>,
    ) -> Self {
        let pool = Arc::new(WorkerPool::start(
            settings.pool,
            runtime.clone(),
            worker_processor,
            sanitizer,
            Arc::clone(&metrics),
        ));
        let progress = Arc::new(Progress::default());
        let context = Arc::new(LaneContext {
            sink: Arc::clone(&sink),
            pool: Arc::clone(&pool),
            fallback: Arc::clone(&fallback),
            metrics: Arc::clone(&metrics),
            progress: Arc::clone(&progress),
        });

        let mut tasks = Vec::with_capacity(pool.size() + 1);
        let mut lanes = Vec::with_capacity(pool.size());
        for lane in 0..pool.size() {
            let (lane_tx, lane_rx) = mpsc::unbounded_channel();
            lanes.push(lane_tx);
            tasks.push(runtime.spawn(coalescer::drive_lane(lane, lane_rx, Arc::clone(&context))));
        }

        let (queue_tx, queue_rx) = mpsc::channel(settings.queue_capacity);
        let spill = Arc::new(Mutex::new(VecDeque::new()));
        tasks.push(runtime.spawn(coalescer::coalesce(
            queue_rx,
            Arc::clone(&spill),
            lanes,
            settings.batch_size,
            settings.batch_delay,
            Arc::clone(&metrics),
        )));

        Self {
            sink,
            fallback,
            metrics,
            progress,
            pool: Some(pool),
            queue: Mutex::new(Some(queue_tx)),
            spill,
            tasks: Mutex::new(tasks),
            next_insights_worker: AtomicUsize::new(0),
        }
    }

    /// Every job is processed on the submitting thread. No tasks are spawned.
    pub fn synchronous(
        sink: Arc<S>,
        fallback: Arc<dyn AnalysisProcessor>,
        metrics: Arc<OffloadMetrics>,
    ) -> Self {
        Self {
            sink,
            fallback,
            metrics,
            progress: Arc::new(Progress::default()),
            pool: None,
            queue: Mutex::new(None),
            spill: Arc::new(Mutex::new(VecDeque::new())),
            tasks: Mutex::new(Vec::new()),
            next_insights_worker: AtomicUsize::new(0),
        }
    }

    pub fn is_offloading(&self) -> bool {
        lock(&self.queue).is_some()
    }

    pub fn submit(&self, job: Job) {
        self.progress.submit();
        let rejected = {
            let queue = lock(&self.queue);
            let mut spill = lock(&self.spill);
            match queue.as_ref() {
                Some(_) if !spill.is_empty() => {
                    spill.push_back(job);
                    self.metrics.record_spilled();
                    None
                }
                Some(sender) => match sender.try_send(job) {
                    Ok(()) => {
                        self.metrics.record_queued();
                        None
                    }
                    Err(TrySendError::Full(job)) => {
                        spill.push_back(job);
                        self.metrics.record_spilled();
                        None
                    }
                    Err(TrySendError::Closed(job)) => Some(job),
                },
                None => Some(job),
            }
        };

        if let Some(job) = rejected {
            self.process_now(job);
        }
    }

    fn process_now(&self, job: Job) {
        self.metrics.record_inline();
        let customer = job.customer();
        let jobs = [job];
        if let Some(input) = self.sink.snapshot(customer, &jobs) {
            coalescer::run_inline(self.sink.as_ref(), self.fallback.as_ref(), customer, &input);
        }
        self.progress.complete(jobs.len());
    }

    /// Waits until every job submitted so far has been merged.
    pub async fn flush(&self) {
        self.progress.wait().await;
    }

    /// Computes store-wide insights on a worker, falling back to the local processor.
    pub async fn insights(&self, input: InsightsInput) -> Result<InsightReport, ComputationError> {
        if let Some(pool) = &self.pool {
            let worker = self.next_insights_worker.fetch_add(1, Ordering::Relaxed);
            let payload = RequestPayload::Insights(input.clone());
            match pool.dispatch(worker, RequestKind::ProcessInsights, payload).await {
                Ok(ResponsePayload::Insights(report)) => return Ok(report),
                Ok(ResponsePayload::Analysis(_)) => {
                    let reason = "insights request answered with analysis";
                    self.sink.report("worker_error", &reason, None);
                }
                Err(error) => self.sink.report(error.code(), &error, None),
            }
            self.metrics.record_fallback();
        }
        self.fallback.insights(&input)
    }

    pub fn status(&self) -> OffloadStatus {
        let (mode, workers, active_workers, pending_requests) = match &self.pool {
            Some(pool) => {
                ("offloaded", pool.size(), pool.active_workers(), pool.pending_requests())
            }
            None => ("synchronous", 0, 0, 0),
        };
        let mode = if self.pool.is_some() && !self.is_offloading() { "stopped" } else { mode };
        OffloadStatus {
            mode: mode.to_string(),
            workers,
            active_workers,
            pending_requests,
            outstanding_jobs: self.progress.outstanding(),
            spilled_jobs: lock(&self.spill).len(),
        }
    }

    /// Drains queued work, then stops the coalescer, the lanes and the workers. Jobs submitted
    /// afterwards are processed inline.
    pub async fn shutdown(&self) {
        let sender = lock(&self.queue).take();
        if sender.is_none() && self.pool.is_none() {
            return;
        }
        drop(sender);

        let tasks: Vec<_> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(error) = task.await {
                tracing::warn!(
                    event_name = "offload.task.join_failed",
                    error = %error,
                    "offload task ended abnormally"
                );
            }
        }
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
        tracing::info!(event_name = "offload.stopped", "offloader stopped");
    }
}
