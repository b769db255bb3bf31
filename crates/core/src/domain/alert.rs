use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HighValuePurchase,
    RapidEngagement,
    BehaviorAnomaly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Alert produced by rule evaluation, before it is stamped with an id and logged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    /// Sanitized customer token, never the raw id.
    pub customer: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub data: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub customer: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub data: Map<String, Value>,
}

impl AlertDraft {
    pub fn issue(self) -> Alert {
        Alert {
            id: format!("alert-{}", Uuid::new_v4()),
            alert_type: self.alert_type,
            severity: self.severity,
            customer: self.customer,
            message: self.message,
            timestamp: self.timestamp,
            data: self.data,
        }
    }
}
