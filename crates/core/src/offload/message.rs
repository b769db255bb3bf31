//! Request/response envelope exchanged with workers. Everything here is owned and
//! serializable; identifiers inside are already sanitized.

use serde::{Deserialize, Serialize};

use crate::insights::{InsightReport, InsightsInput};
use crate::offload::processor::{AnalysisInput, AnalysisOutcome};
use crate::sanitizer::SanitizedError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    ProcessBehavior,
    BatchProcess,
    ProcessInsights,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessBehavior => "PROCESS_BEHAVIOR",
            Self::BatchProcess => "BATCH_PROCESS",
            Self::ProcessInsights => "PROCESS_INSIGHTS",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestPayload {
    Analysis(AnalysisInput),
    Insights(InsightsInput),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub kind: RequestKind,
    pub id: String,
    pub data: RequestPayload,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseKind {
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Analysis(AnalysisOutcome),
    Insights(InsightReport),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub kind: ResponseKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResponsePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SanitizedError>,
}

impl WorkerResponse {
    pub fn success(id: impl Into<String>, result: ResponsePayload) -> Self {
        Self { kind: ResponseKind::Success, id: id.into(), result: Some(result), error: None }
    }

    pub fn failure(id: impl Into<String>, error: SanitizedError) -> Self {
        Self { kind: ResponseKind::Error, id: id.into(), result: None, error: Some(error) }
    }
}
