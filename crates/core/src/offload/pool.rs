//! Worker pool with correlation-id routing.
//!
//! Each worker is a task that runs requests on the blocking pool one at a time. Responses from
//! every worker go through a single router task that resolves the matching pending entry; a
//! response whose entry is gone (the caller already timed out) is logged and dropped.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::errors::OffloadError;
use crate::offload::message::{
    RequestKind, RequestPayload, ResponseKind, ResponsePayload, WorkerRequest, WorkerResponse,
};
use crate::offload::metrics::OffloadMetrics;
use crate::offload::processor::AnalysisProcessor;
use crate::sanitizer::Sanitizer;
use crate::sync::lock;

type Reply = Result<WorkerResponse, OffloadError>;

struct Pending {
    worker: usize,
    reply: oneshot::Sender<Reply>,
}

enum RouterMessage {
    Response { worker: usize, response: WorkerResponse },
    Crashed { worker: usize, reason: String },
}

struct WorkerHandle {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct WorkerSlot {
    handle: Mutex<Option<WorkerHandle>>,
    consecutive_failures: AtomicU32,
}

#[derive(Clone, Copy, Debug)]
pub struct PoolSettings {
    pub workers: usize,
    pub task_timeout: Duration,
    pub max_consecutive_failures: u32,
}

pub struct WorkerPool {
    settings: PoolSettings,
    runtime: Handle,
    processor: Arc<dyn AnalysisProcessor>,
    sanitizer: Arc<Sanitizer>,
    metrics: Arc<OffloadMetrics>,
    slots: Vec<WorkerSlot>,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    router_tx: mpsc::UnboundedSender<RouterMessage>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn start(
        settings: PoolSettings,
        runtime: Handle,
        processor: Arc<dyn AnalysisProcessor>,
        sanitizer: Arc<Sanitizer>,
        metrics: Arc<OffloadMetrics>,
    ) -> Self {
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let (router_tx, router_rx) = mpsc::unbounded_channel();
        let router = runtime.spawn(route(router_rx, Arc::clone(&pending), Arc::clone(&metrics)));

        let pool = Self {
            settings,
            runtime,
            processor,
            sanitizer,
            metrics,
            slots: (0..settings.workers.max(1)).map(|_| WorkerSlot::default()).collect(),
            pending,
            router_tx,
            router: Mutex::new(Some(router)),
        };
        for worker in 0..pool.slots.len() {
            pool.ensure_worker(worker);
        }
        tracing::info!(
            event_name = "offload.pool.started",
            workers = pool.slots.len(),
            task_timeout_ms = settings.task_timeout.as_millis() as u64,
            "worker pool started"
        );
        pool
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn active_workers(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| {
                lock(&slot.handle)
                    .as_ref()
                    .is_some_and(|handle| handle.active.load(Ordering::Acquire))
            })
            .count()
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Sends one request to `worker` and waits for its response or the task timeout.
    pub async fn dispatch(
        &self,
        worker: usize,
        kind: RequestKind,
        data: RequestPayload,
    ) -> Result<ResponsePayload, OffloadError> {
        let worker = worker % self.slots.len();
        let correlation_id = format!("req-{}", Uuid::new_v4());
        let started = Instant::now();
        let result = self.exchange(worker, kind, correlation_id.clone(), data).await;

        match &result {
            Ok(_) => {
                self.metrics.record_success();
                self.metrics.record_processing(started.elapsed());
                self.slots[worker].consecutive_failures.store(0, Ordering::Release);
            }
            Err(error) => {
                match error {
                    OffloadError::Timeout { .. } => self.metrics.record_timeout(),
                    OffloadError::Remote(_) => self.metrics.record_worker_error(),
                    OffloadError::WorkerFatal { .. } | OffloadError::Closed => {}
                }
                tracing::warn!(
                    event_name = "offload.dispatch.failed",
                    worker,
                    kind = kind.as_str(),
                    correlation_id = %correlation_id,
                    error_code = error.code(),
                    error = %error,
                    "worker request failed"
                );
                let failures =
                    self.slots[worker].consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if error.is_fatal() || failures >= self.settings.max_consecutive_failures {
                    self.retire(worker, failures);
                }
            }
        }
        result
    }

    async fn exchange(
        &self,
        worker: usize,
        kind: RequestKind,
        correlation_id: String,
        data: RequestPayload,
    ) -> Result<ResponsePayload, OffloadError> {
        let requests = self.ensure_worker(worker);
        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(correlation_id.clone(), Pending { worker, reply: reply_tx });

        let request = WorkerRequest { kind, id: correlation_id.clone(), data };
        if requests.send(request).is_err() {
            lock(&self.pending).remove(&correlation_id);
            return Err(OffloadError::Closed);
        }
        self.metrics.record_dispatch();

        let timeout = self.settings.task_timeout;
        tokio::select! {
            reply = reply_rx => {
                let response = reply.map_err(|_| OffloadError::Closed)??;
                match (response.kind, response.result, response.error) {
                    (ResponseKind::Success, Some(result), _) => Ok(result),
                    (_, _, Some(error)) => Err(OffloadError::Remote(error.message)),
                    _ => Err(OffloadError::Remote("response carried no result".to_string())),
                }
            }
            _ = tokio::time::sleep(timeout) => {
                lock(&self.pending).remove(&correlation_id);
                Err(OffloadError::Timeout {
                    worker,
                    correlation_id,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Request channel of `worker`, spawning a replacement if it is missing or inactive.
    fn ensure_worker(&self, worker: usize) -> mpsc::UnboundedSender<WorkerRequest> {
        let slot = &self.slots[worker];
        let mut handle = lock(&slot.handle);
        if let Some(existing) = handle.as_ref() {
            if existing.active.load(Ordering::Acquire) && !existing.requests.is_closed() {
                return existing.requests.clone();
            }
        }

        let restarted = handle.take().map(|old| old.task.abort()).is_some();
        if restarted {
            self.metrics.record_restart();
            tracing::info!(event_name = "offload.worker.restarted", worker, "worker restarted");
        }

        let (requests, inbox) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        let task = self.runtime.spawn(run_worker(
            worker,
            inbox,
            Arc::clone(&active),
            Arc::clone(&self.processor),
            Arc::clone(&self.sanitizer),
            self.router_tx.clone(),
        ));
        *handle = Some(WorkerHandle { requests: requests.clone(), active, task });
        slot.consecutive_failures.store(0, Ordering::Release);
        requests
    }

    /// Marks `worker` inactive so the next request spawns a fresh one.
    fn retire(&self, worker: usize, failures: u32) {
        if let Some(handle) = lock(&self.slots[worker].handle).as_ref() {
            handle.active.store(false, Ordering::Release);
        }
        tracing::warn!(
            event_name = "offload.worker.retired",
            worker,
            consecutive_failures = failures,
            "worker marked inactive; restarting on next use"
        );
    }

    /// Stops every worker and the router. Pending requests resolve as `Closed`.
    pub async fn shutdown(&self) {
        let handles: Vec<_> =
            self.slots.iter().filter_map(|slot| lock(&slot.handle).take()).collect();
        for handle in handles {
            drop(handle.requests);
            if let Err(error) = handle.task.await {
                if !error.is_cancelled() {
                    tracing::warn!(event_name = "offload.worker.join_failed", error = %error);
                }
            }
        }
        if let Some(router) = lock(&self.router).take() {
            router.abort();
        }
        lock(&self.pending).clear();
    }
}

async fn run_worker(
    worker: usize,
    mut inbox: mpsc::UnboundedReceiver<WorkerRequest>,
    active: Arc<AtomicBool>,
    processor: Arc<dyn AnalysisProcessor>,
    sanitizer: Arc<Sanitizer>,
    router: mpsc::UnboundedSender<RouterMessage>,
) {
    while let Some(request) = inbox.recv().await {
        let processor = Arc::clone(&processor);
        let sanitizer = Arc::clone(&sanitizer);
        let outcome = tokio::task::spawn_blocking(move || {
            std::panic::catch_unwind(AssertUnwindSafe(|| handle(&*processor, &sanitizer, request)))
        })
        .await;

        let message = match outcome {
            Ok(Ok(response)) => RouterMessage::Response { worker, response },
            Ok(Err(panic)) => RouterMessage::Crashed { worker, reason: panic_reason(&panic) },
            Err(join_error) => RouterMessage::Crashed { worker, reason: join_error.to_string() },
        };
        let crashed = matches!(message, RouterMessage::Crashed { .. });
        if crashed {
            active.store(false, Ordering::Release);
        }
        if router.send(message).is_err() || crashed {
            break;
        }
    }
}

fn handle(
    processor: &dyn AnalysisProcessor,
    sanitizer: &Sanitizer,
    request: WorkerRequest,
) -> WorkerResponse {
    let result = match &request.data {
        RequestPayload::Analysis(input) => processor.analyze(input).map(ResponsePayload::Analysis),
        RequestPayload::Insights(input) => processor.insights(input).map(ResponsePayload::Insights),
    };
    match result {
        Ok(payload) => WorkerResponse::success(request.id, payload),
        Err(error) => {
            let record = sanitizer.create_sanitized_error(error.code(), &error, Some(&request.id));
            WorkerResponse::failure(request.id, record)
        }
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

async fn route(
    mut inbox: mpsc::UnboundedReceiver<RouterMessage>,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    metrics: Arc<OffloadMetrics>,
) {
    while let Some(message) = inbox.recv().await {
        match message {
            RouterMessage::Response { worker, response } => {
                let entry = lock(&pending).remove(&response.id);
                match entry {
                    Some(entry) => {
                        let _ = entry.reply.send(Ok(response));
                    }
                    None => {
                        metrics.record_late_response();
                        tracing::warn!(
                            event_name = "offload.response.unmatched",
                            worker,
                            correlation_id = %response.id,
                            "dropping response with no pending request"
                        );
                    }
                }
            }
            RouterMessage::Crashed { worker, reason } => {
                metrics.record_crash();
                let rejected: Vec<_> = {
                    let mut pending = lock(&pending);
                    let ids: Vec<_> = pending
                        .iter()
                        .filter(|(_, entry)| entry.worker == worker)
                        .map(|(id, _)| id.clone())
                        .collect();
                    ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
                };
                tracing::error!(
                    event_name = "offload.worker.crashed",
                    worker,
                    rejected = rejected.len(),
                    reason = %reason,
                    "worker crashed; rejecting in-flight requests"
                );
                for entry in rejected {
                    let error = OffloadError::WorkerFatal { worker, reason: reason.clone() };
                    let _ = entry.reply.send(Err(error));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use secrecy::SecretString;

    use super::{PoolSettings, WorkerPool};
    use crate::errors::{ComputationError, OffloadError};
    use crate::offload::message::{RequestKind, RequestPayload, ResponsePayload};
    use crate::offload::metrics::OffloadMetrics;
    use crate::offload::processor::tests::input_for;
    use crate::offload::processor::{
        AnalysisInput, AnalysisOutcome, AnalysisProcessor, StandardProcessor,
    };
    use crate::sanitizer::Sanitizer;

    struct Slow(Duration);

    impl AnalysisProcessor for Slow {
        fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisOutcome, ComputationError> {
            std::thread::sleep(self.0);
            StandardProcessor.analyze(input)
        }
    }

    struct PanicsOnce(AtomicUsize);

    impl AnalysisProcessor for PanicsOnce {
        fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisOutcome, ComputationError> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("simulated worker crash");
            }
            StandardProcessor.analyze(input)
        }
    }

    fn pool(processor: Arc<dyn AnalysisProcessor>, timeout_ms: u64) -> WorkerPool {
        WorkerPool::start(
            PoolSettings {
                workers: 1,
                task_timeout: Duration::from_millis(timeout_ms),
                max_consecutive_failures: 3,
            },
            tokio::runtime::Handle::current(),
            processor,
            Arc::new(Sanitizer::new(SecretString::from("pool-test-salt"))),
            Arc::new(OffloadMetrics::default()),
        )
    }

    fn payload() -> RequestPayload {
        RequestPayload::Analysis(input_for(Vec::new()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn routes_response_to_caller() {
        let pool = pool(Arc::new(StandardProcessor), 1_000);
        let result = pool.dispatch(0, RequestKind::ProcessBehavior, payload()).await;
        assert!(matches!(result, Ok(ResponsePayload::Analysis(_))));
        assert_eq!(pool.pending_requests(), 0);
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn late_response_is_dropped_after_timeout() {
        let pool = pool(Arc::new(Slow(Duration::from_millis(150))), 20);

        let result = pool.dispatch(0, RequestKind::ProcessBehavior, payload()).await;
        assert!(matches!(result, Err(OffloadError::Timeout { .. })));
        assert_eq!(pool.pending_requests(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let snapshot = pool.metrics.snapshot();
        assert_eq!(snapshot.timed_out, 1);
        assert_eq!(snapshot.late_responses, 1);
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn crashed_worker_is_rejected_then_restarted() {
        let pool = pool(Arc::new(PanicsOnce(AtomicUsize::new(0))), 1_000);

        let first = pool.dispatch(0, RequestKind::ProcessBehavior, payload()).await;
        assert!(matches!(first, Err(OffloadError::WorkerFatal { worker: 0, .. })));

        let second = pool.dispatch(0, RequestKind::ProcessBehavior, payload()).await;
        assert!(second.is_ok());
        let snapshot = pool.metrics.snapshot();
        assert_eq!(snapshot.worker_crashes, 1);
        assert_eq!(snapshot.restarts, 1);
        assert_eq!(pool.active_workers(), 1);
        pool.shutdown().await;
    }
}
