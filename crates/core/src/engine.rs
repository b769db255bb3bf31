//! The analytics engine: one explicit instance owning the store, the derived per-customer
//! state, the alert log and the offloader.
//!
//! `track_behavior` does only the cheap synchronous part (sanitize, store, enqueue); scoring,
//! pattern detection and alerting happen on the offloader and are merged back into the
//! customer state through [`AnalysisSink`].

use std::collections::VecDeque;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::alerts::AlertLog;
use crate::config::AppConfig;
use crate::domain::alert::Alert;
use crate::domain::event::{BehaviorEvent, BehaviorInput, EventId};
use crate::domain::feedback::{FeedbackData, SatisfactionDetail};
use crate::domain::journey::CustomerJourney;
use crate::domain::pattern::{Pattern, PatternInsight, Predictions};
use crate::domain::pricing::{
    BatchOptimization, PricingContext, PricingOptimization, PricingStatistics, ProductPricing,
};
use crate::domain::score::{EngagementLevel, ScoreRecord};
use crate::domain::state::CustomerState;
use crate::errors::{ComputationError, EngineError, IngestError};
use crate::insights::{InsightReport, InsightsInput};
use crate::offload::{
    AnalysisInput, AnalysisOutcome, AnalysisProcessor, AnalysisSettings, AnalysisSink,
    AnalysisStep, Job, OffloadMetrics, OffloadSettings, OffloadSnapshot, OffloadStatus,
    Offloader, StandardProcessor,
};
use crate::patterns::{self, TimeAnalysis};
use crate::sanitizer::{SanitizedError, Sanitizer};
use crate::scoring::engagement::churn_risk;
use crate::scoring::pricing::PricingBook;
use crate::scoring::{EngagementScorer, PricingEngine, RecencyPolicy, SatisfactionScorer};
use crate::store::{AnalyticsSnapshot, CategoryTotals, ClearReport, CustomerIndex, EventStore};
use crate::sync::{lock, read, write};

/// Sanitized errors kept for inspection.
const ERROR_RECORD_CAP: usize = 50;
const FAVORITE_CATEGORIES: usize = 5;
const MAINTENANCE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15 * 60);

/// Pushed to subscribers. Customer fields are always sanitized tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "update", rename_all = "snake_case")]
pub enum EngineUpdate {
    EventTracked { event_id: EventId, customer: String, event_type: String, sequence: u64 },
    FeedbackRecorded { customer: String, revision: u64 },
    CustomerAnalyzed { customer: String, engagement_score: f64, processed_through: u64 },
    AlertRaised { alert: Alert },
    InsightsRefreshed { window_events: usize },
    PriceOptimized { product_id: String, optimized_price: Decimal },
}

type Listener = Arc<dyn Fn(&EngineUpdate) + Send + Sync>;

#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl ListenerRegistry {
    fn add(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, listener));
        id
    }

    fn remove(&self, id: u64) {
        lock(&self.listeners).retain(|(existing, _)| *existing != id);
    }

    fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    fn notify(&self, update: &EngineUpdate) {
        let listeners: Vec<_> = lock(&self.listeners)
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();
        for (id, listener) in listeners {
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(update))).is_err() {
                tracing::warn!(
                    event_name = "engine.listener.panicked",
                    listener_id = id,
                    "listener panicked; continuing"
                );
            }
        }
    }
}

/// Handle returned by [`AnalyticsEngine::subscribe`]. Dropping it removes the listener.
#[must_use = "dropping a subscription removes the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomerSummary {
    pub customer: String,
    pub engagement: Option<ScoreRecord>,
    pub running_engagement: f64,
    pub engagement_level: EngagementLevel,
    pub churn_risk: f64,
    pub satisfaction: Option<ScoreRecord>,
    pub satisfaction_detail: SatisfactionDetail,
    pub patterns: Vec<Pattern>,
    pub pattern_confidence: f64,
    pub predictions: Option<Predictions>,
    pub pattern_insights: Vec<PatternInsight>,
    pub favorite_categories: Vec<CategoryTotals>,
    pub time_analysis: TimeAnalysis,
    pub total_quantity: u64,
    pub total_spent: f64,
    pub journeys: usize,
    pub active_journeys: usize,
    pub buffered_events: usize,
    pub last_activity: Option<DateTime<Utc>>,
    pub processed_through: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub offload: OffloadSnapshot,
    pub status: OffloadStatus,
    pub buffered_events: usize,
    pub buffer_capacity: usize,
    pub buffer_utilization_pct: f64,
    pub listeners: usize,
    pub errors_recorded: usize,
    pub uptime_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub total_events: u64,
    pub buffered_events: usize,
    pub customers: usize,
    pub analyzed_customers: usize,
    pub active_sessions: usize,
    pub alerts_issued: u64,
    pub alerts_retained: usize,
    pub patterns_detected: usize,
    pub average_engagement: f64,
    pub average_satisfaction: Option<f64>,
    pub pricing: PricingStatistics,
}

/// Shared state the offloader reads snapshots from and merges outcomes into.
pub(crate) struct EngineCore {
    config: AppConfig,
    settings: AnalysisSettings,
    sanitizer: Arc<Sanitizer>,
    store: EventStore,
    customers: RwLock<Vec<CustomerState>>,
    alerts: Mutex<AlertLog>,
    insights: RwLock<InsightReport>,
    errors: Mutex<VecDeque<SanitizedError>>,
    listeners: Arc<ListenerRegistry>,
    metrics: Arc<OffloadMetrics>,
}

impl EngineCore {
    fn record_error(&self, record: SanitizedError) {
        let mut errors = lock(&self.errors);
        errors.push_back(record);
        while errors.len() > ERROR_RECORD_CAP {
            errors.pop_front();
        }
    }
}

impl AnalysisSink for EngineCore {
    fn snapshot(&self, customer: CustomerIndex, jobs: &[Job]) -> Option<AnalysisInput> {
        let customer_id = jobs.first()?.customer_id().to_string();
        let state = read(&self.customers).get(customer.slot()).cloned().unwrap_or_default();
        let up_to = jobs
            .iter()
            .filter_map(|job| match job {
                Job::Behavior { event, .. } => Some(event.sequence),
                Job::Feedback { .. } => None,
            })
            .max()
            .unwrap_or(state.processed_through);

        let steps = jobs
            .iter()
            .map(|job| match job {
                Job::Behavior { event, .. } => {
                    AnalysisStep::Behavior { event: event.pseudonymized(&self.sanitizer) }
                }
                Job::Feedback { revision, feedback, at, .. } => AnalysisStep::Feedback {
                    revision: *revision,
                    feedback: feedback.clone(),
                    at: *at,
                },
            })
            .collect();
        let history = self
            .store
            .customer_events(&customer_id, up_to)
            .iter()
            .map(|event| event.pseudonymized(&self.sanitizer))
            .collect();

        Some(AnalysisInput {
            customer: self.sanitizer.sanitize_customer_id(&customer_id),
            state,
            steps,
            history,
            purchases: self.store.purchases(customer, up_to),
            settings: self.settings.clone(),
        })
    }

    fn merge(&self, customer: CustomerIndex, outcome: AnalysisOutcome) {
        let AnalysisOutcome { customer: token, state, alerts, steps_applied } = outcome;
        let engagement_score = state.engagement.running_score;
        let processed_through = state.processed_through;

        let accepted = {
            let mut customers = write(&self.customers);
            if customers.len() <= customer.slot() {
                customers.resize_with(customer.slot() + 1, CustomerState::default);
            }
            let current = &mut customers[customer.slot()];
            let behind = state.processed_through < current.processed_through
                || state.feedback_revision < current.feedback_revision;
            let unchanged = state.processed_through == current.processed_through
                && state.feedback_revision == current.feedback_revision;
            if behind || unchanged {
                false
            } else {
                *current = state;
                true
            }
        };

        if !accepted {
            if steps_applied > 0 {
                self.metrics.record_stale_merge();
                tracing::warn!(
                    event_name = "engine.merge.stale",
                    customer = %token,
                    processed_through,
                    "discarding outcome older than current state"
                );
            }
            return;
        }

        tracing::debug!(
            event_name = "engine.merge.applied",
            customer = %token,
            processed_through,
            steps_applied,
            "customer state updated"
        );
        for draft in alerts {
            let alert = lock(&self.alerts).push(draft);
            self.listeners.notify(&EngineUpdate::AlertRaised { alert });
        }
        self.listeners.notify(&EngineUpdate::CustomerAnalyzed {
            customer: token,
            engagement_score,
            processed_through,
        });
    }

    fn report(&self, code: &str, error: &dyn Display, correlation_id: Option<&str>) {
        let record = self.sanitizer.create_sanitized_error(code, error, correlation_id);
        tracing::warn!(
            event_name = "engine.error",
            error_code = %record.code,
            correlation_id = %record.correlation_id,
            error = %record.message,
            "deferred analytics error"
        );
        self.record_error(record);
    }
}

pub struct EngineBuilder {
    config: AppConfig,
    sanitizer: Option<Sanitizer>,
    worker_processor: Option<Arc<dyn AnalysisProcessor>>,
    synchronous: bool,
}

impl EngineBuilder {
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = Some(sanitizer);
        self
    }

    /// Processor run by the workers. The fallback path always uses [`StandardProcessor`].
    pub fn with_worker_processor(mut self, processor: Arc<dyn AnalysisProcessor>) -> Self {
        self.worker_processor = Some(processor);
        self
    }

    /// Process every event on the calling thread instead of the worker pool.
    pub fn synchronous(mut self) -> Self {
        self.synchronous = true;
        self
    }

    /// Validates configuration and ensemble weights and starts the offloader. Needs a tokio
    /// runtime unless the engine is synchronous.
    pub fn build(self) -> Result<AnalyticsEngine, EngineError> {
        self.config.validate()?;
        let policy = RecencyPolicy::from_config(&self.config.scoring);
        EngagementScorer::new(policy)?;
        SatisfactionScorer::new(policy)?;
        let pricing = PricingEngine::new()?;

        if self.sanitizer.is_none() && self.config.sanitizer.uses_default_salt() {
            tracing::warn!(
                event_name = "engine.sanitizer.default_salt",
                "sanitizer is using the built-in development salt"
            );
        }
        let sanitizer = Arc::new(
            self.sanitizer.unwrap_or_else(|| Sanitizer::from_config(&self.config.sanitizer)),
        );

        let metrics = Arc::new(OffloadMetrics::default());
        let core = Arc::new(EngineCore {
            settings: AnalysisSettings::from_config(&self.config),
            sanitizer: Arc::clone(&sanitizer),
            store: EventStore::new(&self.config.store),
            customers: RwLock::new(Vec::new()),
            alerts: Mutex::new(AlertLog::new(self.config.alerts.max_alerts)),
            insights: RwLock::new(InsightReport::default()),
            errors: Mutex::new(VecDeque::new()),
            listeners: Arc::new(ListenerRegistry::default()),
            metrics: Arc::clone(&metrics),
            config: self.config,
        });

        let fallback: Arc<dyn AnalysisProcessor> = Arc::new(StandardProcessor);
        let (offloader, maintenance) = if self.synchronous {
            (Offloader::synchronous(Arc::clone(&core), fallback, metrics), None)
        } else {
            let runtime = Handle::try_current()
                .map_err(|error| EngineError::Runtime(error.to_string()))?;
            let worker_processor = self.worker_processor.unwrap_or_else(|| Arc::clone(&fallback));
            let offloader = Offloader::start(
                OffloadSettings::from_config(&core.config.offload),
                runtime.clone(),
                Arc::clone(&core),
                worker_processor,
                fallback,
                sanitizer,
                metrics,
            );
            let maintenance = runtime.spawn(maintain(Arc::downgrade(&core)));
            (offloader, Some(maintenance))
        };

        tracing::info!(
            event_name = "engine.started",
            mode = if offloader.is_offloading() { "offloaded" } else { "synchronous" },
            capacity = core.store.capacity(),
            "analytics engine started"
        );
        Ok(AnalyticsEngine {
            core,
            offloader,
            pricing,
            pricing_book: Mutex::new(PricingBook::default()),
            feedback_revision: AtomicU64::new(0),
            maintenance: Mutex::new(maintenance),
            started: Instant::now(),
        })
    }
}

/// Periodic journey sweep and retention cleanup. Stops once the engine is dropped.
async fn maintain(core: Weak<EngineCore>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(core) = core.upgrade() else {
            break;
        };
        let now = Utc::now();
        let flagged = core.store.sweep_inactive(now);
        let report = core.store.clear_older_than(core.config.store.retention_days, now);
        tracing::debug!(
            event_name = "engine.maintenance",
            journeys_flagged = flagged,
            events_removed = report.events_removed,
            "maintenance pass complete"
        );
    }
}

pub struct AnalyticsEngine {
    core: Arc<EngineCore>,
    offloader: Offloader<EngineCore>,
    pricing: PricingEngine,
    pricing_book: Mutex<PricingBook>,
    feedback_revision: AtomicU64,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    started: Instant,
}

impl AnalyticsEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            config: AppConfig::default(),
            sanitizer: None,
            worker_processor: None,
            synchronous: false,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.core.config
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.core.sanitizer
    }

    /// Stores the event and queues its analysis. Returns once the store is updated.
    pub fn track_behavior(&self, mut input: BehaviorInput) -> Result<EventId, IngestError> {
        let sanitizer = &self.core.sanitizer;
        input.metadata = sanitizer.sanitize_behavior_data(&input.metadata);
        input.search_query = input.search_query.map(|query| sanitizer.sanitize_text(&query));

        let stored = match self.core.store.ingest(input, Utc::now()) {
            Ok(stored) => stored,
            Err(error) => {
                let record = sanitizer.create_sanitized_error(error.code(), &error, None);
                self.core.record_error(record);
                tracing::warn!(
                    event_name = "engine.ingest.rejected",
                    error_code = error.code(),
                    error = %error,
                    "behavior event rejected"
                );
                return Err(error);
            }
        };

        let event = &stored.event;
        let customer = sanitizer.sanitize_customer_id(&event.customer_id);
        tracing::debug!(
            event_name = "engine.ingest.stored",
            event_id = %event.id.0,
            sequence = event.sequence,
            customer = %customer,
            event_type = %event.event_type,
            "behavior event stored"
        );
        self.core.listeners.notify(&EngineUpdate::EventTracked {
            event_id: event.id.clone(),
            customer,
            event_type: event.event_type.to_string(),
            sequence: event.sequence,
        });

        let event_id = event.id.clone();
        self.offloader.submit(Job::Behavior { customer: stored.customer, event: stored.event });
        Ok(event_id)
    }

    /// Queues explicit survey or support feedback. Returns the feedback revision.
    pub fn record_feedback(
        &self,
        customer_id: &str,
        mut feedback: FeedbackData,
    ) -> Result<u64, IngestError> {
        let customer_id = customer_id.trim();
        if customer_id.is_empty() {
            return Err(IngestError::Validation("customer_id is required".to_string()));
        }

        let sanitizer = &self.core.sanitizer;
        feedback.text_feedback = feedback.text_feedback.map(|text| sanitizer.sanitize_text(&text));
        feedback.review_text = feedback.review_text.map(|text| sanitizer.sanitize_text(&text));
        for message in &mut feedback.support_messages {
            *message = sanitizer.sanitize_text(message);
        }

        let customer = self.core.store.intern_customer(customer_id);
        let revision = self.feedback_revision.fetch_add(1, Ordering::AcqRel) + 1;
        let token = sanitizer.sanitize_customer_id(customer_id);
        tracing::debug!(
            event_name = "engine.feedback.recorded",
            customer = %token,
            revision,
            "feedback queued"
        );
        self.core.listeners.notify(&EngineUpdate::FeedbackRecorded { customer: token, revision });

        self.offloader.submit(Job::Feedback {
            customer,
            customer_id: customer_id.to_string(),
            revision,
            feedback,
            at: Utc::now(),
        });
        Ok(revision)
    }

    fn pricing_input(&self, product: &ProductPricing) -> ProductPricing {
        let mut product = product.clone();
        if product.elasticity.is_none() {
            product.elasticity = lock(&self.pricing_book).elasticity(&product.product_id);
        }
        product
    }

    fn publish_price(&self, optimization: &PricingOptimization) {
        lock(&self.pricing_book).record(optimization);
        tracing::info!(
            event_name = "engine.pricing.optimized",
            product_id = %optimization.product_id,
            original_price = %optimization.original_price,
            optimized_price = %optimization.optimized_price,
            rules_applied = optimization.applied_rules.len(),
            "price optimized"
        );
        self.core.listeners.notify(&EngineUpdate::PriceOptimized {
            product_id: optimization.product_id.clone(),
            optimized_price: optimization.optimized_price,
        });
    }

    pub fn optimize_price(
        &self,
        product: &ProductPricing,
        context: &PricingContext,
    ) -> Result<PricingOptimization, ComputationError> {
        let optimization =
            self.pricing.optimize(&self.pricing_input(product), context, Utc::now())?;
        self.publish_price(&optimization);
        Ok(optimization)
    }

    pub fn optimize_batch(
        &self,
        products: &[ProductPricing],
        context: &PricingContext,
    ) -> Result<BatchOptimization, ComputationError> {
        let products: Vec<_> = products.iter().map(|p| self.pricing_input(p)).collect();
        let batch = self.pricing.optimize_batch(&products, context, Utc::now())?;
        for optimization in &batch.optimizations {
            self.publish_price(optimization);
        }
        Ok(batch)
    }

    /// Records an observed price and the demand it produced; feeds elasticity estimates.
    pub fn record_price_observation(&self, product_id: &str, price: Decimal, demand: f64) {
        lock(&self.pricing_book).observe(product_id, price, demand);
    }

    pub fn pricing_decision(&self, product_id: &str) -> Option<PricingOptimization> {
        lock(&self.pricing_book).decision(product_id).cloned()
    }

    pub fn pricing_statistics(&self) -> PricingStatistics {
        lock(&self.pricing_book).statistics()
    }

    /// Recomputes store-wide insights over the last 24 hours on a worker.
    pub async fn refresh_insights(&self) -> Result<InsightReport, ComputationError> {
        let now = Utc::now();
        let events: Vec<BehaviorEvent> = self
            .core
            .store
            .events_since(now - Duration::hours(24))
            .iter()
            .map(|event| event.pseudonymized(&self.core.sanitizer))
            .collect();
        let report = self.offloader.insights(InsightsInput { events, now }).await?;
        *write(&self.core.insights) = report.clone();
        self.core
            .listeners
            .notify(&EngineUpdate::InsightsRefreshed { window_events: report.window_events });
        Ok(report)
    }

    pub fn insights(&self) -> InsightReport {
        read(&self.core.insights).clone()
    }

    pub fn customer_summary(&self, customer_id: &str) -> Option<CustomerSummary> {
        let store = &self.core.store;
        let customer = store.customer_index(customer_id)?;
        let state = read(&self.core.customers).get(customer.slot()).cloned().unwrap_or_default();

        let events = store.customer_events(customer_id, u64::MAX);
        let churn = events.last().map(|last| churn_risk(last, &events)).unwrap_or(100.0);
        let journeys = store.journeys_for(customer_id);
        let purchases = store.purchases(customer, u64::MAX);
        let (total_quantity, total_spent) = store.purchase_totals(customer);

        Some(CustomerSummary {
            customer: self.core.sanitizer.sanitize_customer_id(customer_id),
            engagement: state.latest_engagement().cloned(),
            running_engagement: state.engagement.running_score,
            engagement_level: EngagementLevel::from_score(state.engagement.running_score),
            churn_risk: churn,
            satisfaction: state.latest_satisfaction().cloned(),
            satisfaction_detail: state.satisfaction_detail.clone(),
            pattern_confidence: patterns::overall_confidence(&state.patterns),
            patterns: state.patterns,
            predictions: state.predictions,
            pattern_insights: state.pattern_insights,
            favorite_categories: store.favorite_categories(customer, FAVORITE_CATEGORIES),
            time_analysis: patterns::time_analysis(&purchases),
            total_quantity,
            total_spent,
            active_journeys: journeys.iter().filter(|journey| journey.is_active).count(),
            journeys: journeys.len(),
            buffered_events: events.len(),
            last_activity: events.last().map(|event| event.timestamp),
            processed_through: state.processed_through,
        })
    }

    pub fn journey(&self, customer_id: &str, session_id: &str) -> Option<CustomerJourney> {
        self.core.store.journey(customer_id, session_id)
    }

    pub fn metrics(&self) -> AnalyticsSnapshot {
        self.core.store.metrics()
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let store = &self.core.store;
        let buffered = store.len();
        PerformanceMetrics {
            offload: self.core.metrics.snapshot(),
            status: self.offloader.status(),
            buffered_events: buffered,
            buffer_capacity: store.capacity(),
            buffer_utilization_pct: buffered as f64 / store.capacity().max(1) as f64 * 100.0,
            listeners: self.core.listeners.len(),
            errors_recorded: lock(&self.core.errors).len(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    pub fn statistics(&self) -> EngineStatistics {
        let snapshot = self.core.store.metrics();
        let customers = read(&self.core.customers);
        let analyzed: Vec<_> =
            customers.iter().filter(|state| state.engagement.events_seen > 0).collect();
        let average_engagement = if analyzed.is_empty() {
            0.0
        } else {
            analyzed.iter().map(|state| state.engagement.running_score).sum::<f64>()
                / analyzed.len() as f64
        };
        let satisfaction: Vec<_> = customers
            .iter()
            .filter_map(|state| state.latest_satisfaction().map(|record| record.overall_score))
            .collect();
        let alerts = lock(&self.core.alerts);

        EngineStatistics {
            total_events: snapshot.total_events,
            buffered_events: snapshot.buffered_events,
            customers: snapshot.unique_customers,
            analyzed_customers: analyzed.len(),
            active_sessions: snapshot.active_sessions,
            alerts_issued: alerts.issued(),
            alerts_retained: alerts.len(),
            patterns_detected: customers.iter().map(|state| state.patterns.len()).sum(),
            average_engagement,
            average_satisfaction: (!satisfaction.is_empty())
                .then(|| satisfaction.iter().sum::<f64>() / satisfaction.len() as f64),
            pricing: self.pricing_statistics(),
        }
    }

    /// Retained alerts, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        lock(&self.core.alerts).snapshot()
    }

    pub fn recent_errors(&self) -> Vec<SanitizedError> {
        lock(&self.core.errors).iter().cloned().collect()
    }

    pub fn clear_older_than(&self, days: u32) -> ClearReport {
        self.core.store.clear_older_than(days, Utc::now())
    }

    pub fn sweep_inactive(&self) -> usize {
        self.core.store.sweep_inactive(Utc::now())
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&EngineUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.core.listeners.add(Arc::new(listener));
        Subscription { id, registry: Arc::downgrade(&self.core.listeners) }
    }

    /// Waits until every event and feedback submitted so far is reflected in customer state.
    pub async fn flush(&self) {
        self.offloader.flush().await;
    }

    /// Drains queued work and stops background tasks. Later events are analyzed inline.
    pub async fn shutdown(&self) {
        self.offloader.shutdown().await;
        if let Some(task) = lock(&self.maintenance).take() {
            task.abort();
        }
        let stats = self.core.metrics.snapshot();
        tracing::info!(
            event_name = "engine.stopped",
            dispatched = stats.dispatched,
            fallbacks = stats.fallbacks,
            "analytics engine stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{AnalyticsEngine, EngineUpdate};
    use crate::config::AppConfig;
    use crate::domain::event::{BehaviorInput, EventType};
    use crate::domain::pricing::{PricingContext, ProductPricing};
    use crate::errors::{EngineError, IngestError};

    fn synchronous() -> AnalyticsEngine {
        AnalyticsEngine::builder().synchronous().build().expect("engine builds")
    }

    #[test]
    fn offloaded_engine_requires_a_runtime() {
        let result = AnalyticsEngine::builder().build();
        assert!(matches!(result, Err(EngineError::Runtime(_))));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.store.capacity = 0;
        let result = AnalyticsEngine::builder().config(config).synchronous().build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn blank_customer_is_rejected_and_recorded() {
        let engine = synchronous();
        let result = engine.track_behavior(BehaviorInput::new("  ", EventType::PageView));
        assert!(matches!(result, Err(IngestError::Validation(_))));
        assert_eq!(engine.recent_errors().len(), 1);
        assert_eq!(engine.metrics().total_events, 0);
    }

    #[test]
    fn synchronous_engine_scores_on_ingest() {
        let engine = synchronous();
        for _ in 0..3 {
            engine
                .track_behavior(BehaviorInput::new("alice", EventType::ProductView).page("/p/1"))
                .expect("tracked");
        }

        let summary = engine.customer_summary("alice").expect("known customer");
        assert_eq!(summary.processed_through, 3);
        assert!(summary.engagement.is_some());
        assert!(summary.customer.starts_with("cust_"));
        assert_eq!(engine.performance_metrics().offload.inline, 3);
    }

    #[test]
    fn metadata_is_sanitized_before_storage() {
        let engine = synchronous();
        let mut input = BehaviorInput::new("bob", EventType::Search);
        input.metadata.insert("email".into(), json!("bob@example.com"));
        input.metadata.insert("note".into(), json!("call bob@example.com"));
        engine.track_behavior(input).expect("tracked");

        let stored = engine.core.store.customer_events("bob", u64::MAX);
        assert!(!stored[0].metadata.contains_key("email"));
        assert!(!stored[0].metadata["note"].as_str().unwrap_or_default().contains("@example"));
    }

    #[test]
    fn listener_panics_are_contained_and_drop_unsubscribes() {
        let engine = synchronous();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let subscription = engine.subscribe(move |update| {
            if let EngineUpdate::EventTracked { .. } = update {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let _panicking = engine.subscribe(|_| panic!("listener bug"));

        engine.track_behavior(BehaviorInput::new("carol", EventType::PageView)).expect("tracked");
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        engine.track_behavior(BehaviorInput::new("carol", EventType::PageView)).expect("tracked");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(engine.performance_metrics().listeners, 1);
    }

    #[test]
    fn feedback_for_unseen_customer_is_scored() {
        let engine = synchronous();
        let feedback = crate::domain::feedback::FeedbackData {
            likelihood_recommend: Some(10.0),
            text_feedback: Some("excellent service, love it".into()),
            ..Default::default()
        };
        assert_eq!(engine.record_feedback("dave", feedback).expect("recorded"), 1);

        let summary = engine.customer_summary("dave").expect("interned");
        assert!(summary.satisfaction.is_some());
        assert_eq!(summary.buffered_events, 0);
    }

    #[test]
    fn optimized_price_respects_margin_and_is_remembered() {
        let engine = synchronous();
        let product = ProductPricing::new("mug", Decimal::new(1050, 2), Decimal::new(1000, 2));
        assert!(engine.pricing_decision("mug").is_none());

        let optimization =
            engine.optimize_price(&product, &PricingContext::default()).expect("optimized");
        assert!(optimization.optimized_price >= Decimal::new(1150, 2));

        let remembered = engine.pricing_decision("mug").expect("decision recorded");
        assert_eq!(remembered.optimized_price, optimization.optimized_price);
        assert_eq!(engine.pricing_statistics().total_optimizations, 1);
    }
}
