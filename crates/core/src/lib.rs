pub mod alerts;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod insights;
pub mod offload;
pub mod patterns;
pub mod sanitizer;
pub mod scoring;
pub mod store;

mod sync;

pub use alerts::{AlertLog, AlertRules};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::alert::{Alert, AlertSeverity, AlertType};
pub use domain::event::{BehaviorEvent, BehaviorInput, EventId, EventType};
pub use domain::feedback::FeedbackData;
pub use domain::pricing::{PricingContext, PricingOptimization, ProductPricing};
pub use domain::score::{EngagementLevel, SatisfactionLevel, ScoreRecord};
pub use engine::{
    AnalyticsEngine, CustomerSummary, EngineBuilder, EngineStatistics, EngineUpdate,
    PerformanceMetrics, Subscription,
};
pub use errors::{ComputationError, EngineError, IngestError, OffloadError};
pub use insights::InsightReport;
pub use offload::{AnalysisProcessor, OffloadSnapshot, OffloadStatus, StandardProcessor};
pub use sanitizer::{SanitizedError, Sanitizer};
pub use store::{AnalyticsSnapshot, EventStore};
