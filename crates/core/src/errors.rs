use thiserror::Error;

use crate::config::ConfigError;

/// Raised synchronously from the ingestion entry point. Nothing else is.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("behavior event rejected: {0}")]
    Validation(String),
}

/// Failures on the worker boundary. None of these reach the ingesting caller; every variant
/// ends in the synchronous fallback path.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OffloadError {
    #[error("worker {worker} did not answer request {correlation_id} within {timeout_ms}ms")]
    Timeout { worker: usize, correlation_id: String, timeout_ms: u64 },
    #[error("worker {worker} crashed: {reason}")]
    WorkerFatal { worker: usize, reason: String },
    #[error("worker reported an error: {0}")]
    Remote(String),
    #[error("worker channel closed")]
    Closed,
}

/// A single sub-model (or the ensemble holding it) could not produce a value.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ComputationError {
    #[error("sub-model `{model}` failed: {reason}")]
    SubModel { model: &'static str, reason: String },
    #[error("sub-model `{model}` produced a non-finite value")]
    NonFinite { model: &'static str },
    #[error("ensemble `{ensemble}` weights sum to {total}, expected 1.0")]
    InvalidWeights { ensemble: &'static str, total: f64 },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Computation(#[from] ComputationError),
    #[error("analytics engine requires a tokio runtime: {0}")]
    Runtime(String),
}

impl IngestError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
        }
    }
}

impl OffloadError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "worker_timeout",
            Self::WorkerFatal { .. } => "worker_fatal",
            Self::Remote(_) => "worker_error",
            Self::Closed => "worker_closed",
        }
    }

    /// Whether the worker that produced this error must be torn down before it is used again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::WorkerFatal { .. } | Self::Closed)
    }
}

impl ComputationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SubModel { .. } | Self::NonFinite { .. } => "computation_error",
            Self::InvalidWeights { .. } => "ensemble_weights",
        }
    }
}
