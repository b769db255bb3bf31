use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sanitizer::Sanitizer;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    PageView,
    ProductView,
    CartAdd,
    Purchase,
    Review,
    Search,
    WishlistAdd,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PageView => "page_view",
            Self::ProductView => "product_view",
            Self::CartAdd => "cart_add",
            Self::Purchase => "purchase",
            Self::Review => "review",
            Self::Search => "search",
            Self::WishlistAdd => "wishlist_add",
            Self::Other(name) => name,
        }
    }

    /// Points added to the running engagement score.
    pub fn engagement_points(&self) -> f64 {
        match self {
            Self::PageView => 2.0,
            Self::ProductView => 5.0,
            Self::CartAdd => 10.0,
            Self::Purchase => 25.0,
            Self::Review => 15.0,
            Self::Search => 3.0,
            Self::WishlistAdd => 8.0,
            Self::Other(_) => 1.0,
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "page_view" => Self::PageView,
            "product_view" => Self::ProductView,
            "cart_add" => Self::CartAdd,
            "purchase" => Self::Purchase,
            "review" => Self::Review,
            "search" => Self::Search,
            "wishlist_add" => Self::WishlistAdd,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFlags {
    pub is_purchase: bool,
    pub is_conversion: bool,
    pub is_bounce: bool,
}

/// Immutable once stored. `sequence` is assigned by the store and orders events globally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BehaviorEvent {
    pub id: EventId,
    pub sequence: u64,
    pub customer_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub action: Option<String>,
    pub category: Option<String>,
    pub value: f64,
    pub page: Option<String>,
    pub product: Option<ProductRef>,
    pub search_query: Option<String>,
    pub referrer: Option<String>,
    pub device: String,
    pub location: Option<String>,
    pub flags: EventFlags,
    pub metadata: Map<String, Value>,
}

impl BehaviorEvent {
    pub fn is_purchase(&self) -> bool {
        self.flags.is_purchase
    }

    /// Copy safe to hand to a worker: identifiers become salted tokens.
    pub fn pseudonymized(&self, sanitizer: &Sanitizer) -> Self {
        Self {
            customer_id: sanitizer.sanitize_customer_id(&self.customer_id),
            session_id: sanitizer.sanitize_session_id(&self.session_id),
            search_query: self.search_query.as_deref().map(|query| sanitizer.sanitize_text(query)),
            ..self.clone()
        }
    }
}

/// Caller-facing shape of an event before the store stamps it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorInput {
    pub customer_id: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub event_type: Option<EventType>,
    pub action: Option<String>,
    pub category: Option<String>,
    pub value: Option<f64>,
    pub page: Option<String>,
    pub product: Option<ProductRef>,
    pub search_query: Option<String>,
    pub referrer: Option<String>,
    pub device: Option<String>,
    pub location: Option<String>,
    pub is_conversion: bool,
    pub is_bounce: bool,
    pub metadata: Map<String, Value>,
}

impl BehaviorInput {
    pub fn new(customer_id: impl Into<String>, event_type: impl Into<EventType>) -> Self {
        Self {
            customer_id: Some(customer_id.into()),
            event_type: Some(event_type.into()),
            ..Self::default()
        }
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn page(mut self, page: impl Into<String>) -> Self {
        self.page = Some(page.into());
        self
    }

    pub fn product(mut self, id: impl Into<String>, category: Option<&str>, quantity: u32) -> Self {
        self.product =
            Some(ProductRef { id: id.into(), category: category.map(str::to_string), quantity });
        self
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn conversion(mut self) -> Self {
        self.is_conversion = true;
        self
    }

    pub fn bounce(mut self) -> Self {
        self.is_bounce = true;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{BehaviorInput, EventType};

    #[test]
    fn event_types_round_trip_through_their_wire_names() {
        for name in ["page_view", "product_view", "cart_add", "purchase", "review", "search"] {
            assert_eq!(EventType::from(name).as_str(), name);
        }
        assert_eq!(EventType::from("Purchase"), EventType::Purchase);
        assert_eq!(EventType::from("share"), EventType::Other("share".to_string()));
    }

    #[test]
    fn point_table_matches_engagement_policy() {
        assert_eq!(EventType::PageView.engagement_points(), 2.0);
        assert_eq!(EventType::Purchase.engagement_points(), 25.0);
        assert_eq!(EventType::WishlistAdd.engagement_points(), 8.0);
        assert_eq!(EventType::Other("share".into()).engagement_points(), 1.0);
    }

    #[test]
    fn input_deserializes_with_defaults() {
        let input: BehaviorInput = serde_json::from_str(
            r#"{"customer_id":"c-1","event_type":"cart_add","product":{"id":"sku-1"}}"#,
        )
        .unwrap_or_default();

        assert_eq!(input.customer_id.as_deref(), Some("c-1"));
        assert_eq!(input.event_type, Some(EventType::CartAdd));
        assert_eq!(input.product.map(|p| p.quantity), Some(1));
        assert!(input.metadata.is_empty());
    }
}
