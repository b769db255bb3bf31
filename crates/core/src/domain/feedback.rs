use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Support messages retained per customer for sentiment analysis.
const SUPPORT_MESSAGE_CAP: usize = 20;

/// Survey answers, free text and usage signals gathered for one customer.
///
/// Every field is optional; the satisfaction sub-models fall back to neutral defaults for
/// anything that was never reported.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackData {
    /// 0-10
    pub likelihood_recommend: Option<f64>,
    /// 0-10
    pub overall_experience: Option<f64>,
    /// 1-5
    pub service_rating: Option<f64>,
    /// 1-5
    pub product_quality: Option<f64>,
    /// 1-5
    pub value_perception: Option<f64>,
    /// 1-5, higher means more effort
    pub ease_of_use: Option<f64>,
    pub problem_resolution: Option<f64>,
    pub interaction_effort: Option<f64>,
    pub text_feedback: Option<String>,
    pub review_text: Option<String>,
    pub support_messages: Vec<String>,
    /// 0-1
    pub usage_frequency: Option<f64>,
    /// 0-1
    pub feature_adoption: Option<f64>,
    pub support_tickets: Option<u32>,
    /// 0-1
    pub return_rate: Option<f64>,
    /// 1-5 ratings keyed by touchpoint factor (`checkout_ease`, `delivery_speed`, ...)
    pub touchpoint_ratings: BTreeMap<String, f64>,
}

impl FeedbackData {
    /// Reads feedback fields carried in a review event's metadata. Unknown keys are ignored;
    /// a mistyped survey field discards the survey fields but still keeps touchpoint ratings.
    pub fn from_metadata(metadata: &Map<String, Value>) -> Self {
        let mut feedback: FeedbackData =
            serde_json::from_value(Value::Object(metadata.clone())).unwrap_or_default();

        if feedback.product_quality.is_none() {
            feedback.product_quality = metadata.get("rating").and_then(Value::as_f64);
        }
        for area in TouchpointArea::ALL {
            for factor in area.factors() {
                if let Some(rating) = metadata.get(*factor).and_then(Value::as_f64) {
                    feedback.touchpoint_ratings.insert((*factor).to_string(), rating);
                }
            }
        }
        feedback
    }

    /// Newer answers replace older ones; support messages accumulate.
    pub fn merge(&mut self, newer: FeedbackData) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.likelihood_recommend, newer.likelihood_recommend);
        take(&mut self.overall_experience, newer.overall_experience);
        take(&mut self.service_rating, newer.service_rating);
        take(&mut self.product_quality, newer.product_quality);
        take(&mut self.value_perception, newer.value_perception);
        take(&mut self.ease_of_use, newer.ease_of_use);
        take(&mut self.problem_resolution, newer.problem_resolution);
        take(&mut self.interaction_effort, newer.interaction_effort);
        take(&mut self.text_feedback, newer.text_feedback);
        take(&mut self.review_text, newer.review_text);
        take(&mut self.usage_frequency, newer.usage_frequency);
        take(&mut self.feature_adoption, newer.feature_adoption);
        take(&mut self.support_tickets, newer.support_tickets);
        take(&mut self.return_rate, newer.return_rate);

        self.support_messages.extend(newer.support_messages);
        if self.support_messages.len() > SUPPORT_MESSAGE_CAP {
            let excess = self.support_messages.len() - SUPPORT_MESSAGE_CAP;
            self.support_messages.drain(..excess);
        }
        self.touchpoint_ratings.extend(newer.touchpoint_ratings);
    }

    pub fn combined_text(&self) -> String {
        self.text_feedback
            .iter()
            .chain(self.review_text.iter())
            .chain(self.support_messages.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchpointArea {
    Purchase,
    Delivery,
    Product,
    Support,
    Website,
}

impl TouchpointArea {
    pub const ALL: [TouchpointArea; 5] =
        [Self::Purchase, Self::Delivery, Self::Product, Self::Support, Self::Website];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Delivery => "delivery",
            Self::Product => "product",
            Self::Support => "support",
            Self::Website => "website",
        }
    }

    pub fn factors(self) -> &'static [&'static str] {
        match self {
            Self::Purchase => &["checkout_ease", "payment_process", "order_confirmation"],
            Self::Delivery => &["delivery_speed", "packaging_quality", "delivery_tracking"],
            Self::Product => &["product_quality", "value_for_money", "expectations_met"],
            Self::Support => &["response_time", "issue_resolution", "support_quality"],
            Self::Website => &["site_navigation", "search_functionality", "loading_speed"],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SatisfactionInsightKind {
    Strength,
    Concern,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SatisfactionInsight {
    pub kind: SatisfactionInsightKind,
    pub model: String,
    pub message: String,
    pub score: f64,
    pub confidence: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: RecommendationPriority,
    pub action: String,
    pub description: String,
}

/// Everything the satisfaction pass derives besides the score record itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SatisfactionDetail {
    pub touchpoint_scores: BTreeMap<TouchpointArea, f64>,
    pub insights: Vec<SatisfactionInsight>,
    pub recommendations: Vec<Recommendation>,
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::FeedbackData;

    #[test]
    fn metadata_fields_and_touchpoint_factors_are_picked_up() {
        let Value::Object(metadata) = json!({
            "likelihood_recommend": 9,
            "review_text": "great value",
            "delivery_speed": 5,
            "rating": 4,
            "unrelated": true
        }) else {
            panic!("fixture must be an object");
        };

        let feedback = FeedbackData::from_metadata(&metadata);

        assert_eq!(feedback.likelihood_recommend, Some(9.0));
        assert_eq!(feedback.review_text.as_deref(), Some("great value"));
        assert_eq!(feedback.product_quality, Some(4.0));
        assert_eq!(feedback.touchpoint_ratings.get("delivery_speed"), Some(&5.0));
    }

    #[test]
    fn merge_keeps_old_answers_unless_replaced() {
        let mut base = FeedbackData {
            likelihood_recommend: Some(6.0),
            service_rating: Some(3.0),
            support_messages: vec!["first".into()],
            ..FeedbackData::default()
        };
        base.merge(FeedbackData {
            likelihood_recommend: Some(10.0),
            support_messages: vec!["second".into()],
            ..FeedbackData::default()
        });

        assert_eq!(base.likelihood_recommend, Some(10.0));
        assert_eq!(base.service_rating, Some(3.0));
        assert_eq!(base.support_messages, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(base.combined_text(), "first second");
    }
}
