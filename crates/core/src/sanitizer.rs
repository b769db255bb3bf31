//! Removal and pseudonymisation of personally identifying data.
//!
//! Identifiers are replaced by a keyed HMAC-SHA256 digest so the same customer always maps to
//! the same token within one deployment, but the raw id cannot be recovered without the salt.
//! Every record that leaves the ingestion path (log lines, alert messages, worker requests,
//! error records) goes through this type first.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::SanitizerConfig;

type HmacSha256 = Hmac<Sha256>;

/// Hex characters kept from the digest in issued tokens.
const TOKEN_HEX_LEN: usize = 16;
/// Digit runs at least this long are treated as phone/card/account numbers.
const NUMBER_REDACTION_DIGITS: usize = 7;

const PII_KEYS: &[&str] = &[
    "name",
    "first_name",
    "last_name",
    "full_name",
    "firstname",
    "lastname",
    "address",
    "street",
    "postal_code",
    "zip",
    "zipcode",
    "ip",
    "ip_address",
    "ssn",
    "dob",
    "date_of_birth",
    "birthday",
    "card_number",
    "credit_card",
];

const PII_KEY_FRAGMENTS: &[&str] = &["email", "phone", "password", "mobile"];

/// Error record safe to log, store, or send across the worker boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedError {
    pub code: String,
    pub message: String,
    pub correlation_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct Sanitizer {
    salt: SecretString,
}

impl Sanitizer {
    pub fn new(salt: SecretString) -> Self {
        Self { salt }
    }

    pub fn from_config(config: &SanitizerConfig) -> Self {
        Self::new(config.salt.clone())
    }

    pub fn sanitize_customer_id(&self, customer_id: &str) -> String {
        format!("cust_{}", self.token("customer", customer_id))
    }

    pub fn sanitize_session_id(&self, session_id: &str) -> String {
        format!("sess_{}", self.token("session", session_id))
    }

    /// Drops identifying keys and redacts emails and long digit runs in string values, at any
    /// nesting depth.
    pub fn sanitize_behavior_data(&self, data: &Map<String, Value>) -> Map<String, Value> {
        data.iter()
            .filter(|(key, _)| !is_pii_key(key))
            .map(|(key, value)| (key.clone(), self.sanitize_value(value)))
            .collect()
    }

    pub fn sanitize_text(&self, text: &str) -> String {
        scrub_text(text)
    }

    pub fn create_sanitized_error(
        &self,
        code: &str,
        error: &dyn Display,
        correlation_id: Option<&str>,
    ) -> SanitizedError {
        SanitizedError {
            code: code.to_string(),
            message: scrub_text(&error.to_string()),
            correlation_id: correlation_id
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            at: Utc::now(),
        }
    }

    fn sanitize_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(scrub_text(text)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.sanitize_value(item)).collect())
            }
            Value::Object(map) => Value::Object(self.sanitize_behavior_data(map)),
            other => other.clone(),
        }
    }

    fn token(&self, domain: &str, value: &str) -> String {
        let payload = format!("{domain}:{value}");
        let secret = self.salt.expose_secret().as_bytes();
        let mut digest = match HmacSha256::new_from_slice(secret) {
            Ok(mut mac) => {
                mac.update(payload.as_bytes());
                encode_hex(mac.finalize().into_bytes().as_slice())
            }
            Err(_) => encode_hex(Sha256::digest(payload.as_bytes()).as_slice()),
        };
        digest.truncate(TOKEN_HEX_LEN);
        digest
    }
}

fn is_pii_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    PII_KEYS.contains(&key.as_str()) || PII_KEY_FRAGMENTS.iter().any(|part| key.contains(part))
}

fn scrub_text(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for piece in text.split_inclusive(char::is_whitespace) {
        let word = piece.trim_end_matches(char::is_whitespace);
        let trailing = &piece[word.len()..];
        output.push_str(&scrub_word(word));
        output.push_str(trailing);
    }
    output
}

fn scrub_word(word: &str) -> String {
    let core = word.trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '.' | '(' | ')' | '"'));
    if looks_like_email(core) {
        return word.replacen(core, "[email]", 1);
    }
    let digits = word.chars().filter(char::is_ascii_digit).count();
    if digits >= NUMBER_REDACTION_DIGITS {
        return word.replacen(core, "[number]", 1);
    }
    word.to_string()
}

fn looks_like_email(candidate: &str) -> bool {
    let Some((local, domain)) = candidate.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::Sanitizer;

    fn sanitizer(salt: &str) -> Sanitizer {
        Sanitizer::new(salt.to_string().into())
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn customer_tokens_are_stable_and_salted() {
        let a = sanitizer("first-salt-value");
        let b = sanitizer("other-salt-value");

        let token = a.sanitize_customer_id("alice@example.com");
        assert_eq!(token, a.sanitize_customer_id("alice@example.com"));
        assert_ne!(token, b.sanitize_customer_id("alice@example.com"));
        assert!(token.starts_with("cust_"));
        assert_eq!(token.len(), "cust_".len() + 16);
        assert!(!token.contains("alice"));
    }

    #[test]
    fn session_and_customer_domains_do_not_collide() {
        let s = sanitizer("first-salt-value");
        let customer = s.sanitize_customer_id("abc");
        let session = s.sanitize_session_id("abc");
        assert_ne!(customer.trim_start_matches("cust_"), session.trim_start_matches("sess_"));
    }

    #[test]
    fn behavior_data_drops_identifying_keys_recursively() {
        let s = sanitizer("first-salt-value");
        let data = object(json!({
            "email": "bob@example.com",
            "contact_phone": "555-123-4567",
            "rating": 5,
            "shipping": { "address": "1 Main St", "carrier": "ups" },
            "text_feedback": "mail me at bob@example.com or 5551234567, great service"
        }));

        let clean = s.sanitize_behavior_data(&data);

        assert!(!clean.contains_key("email"));
        assert!(!clean.contains_key("contact_phone"));
        assert_eq!(clean["rating"], json!(5));
        assert_eq!(clean["shipping"], json!({ "carrier": "ups" }));
        assert_eq!(
            clean["text_feedback"],
            json!("mail me at [email] or [number], great service")
        );
    }

    #[test]
    fn short_numbers_are_left_alone() {
        let s = sanitizer("first-salt-value");
        assert_eq!(s.sanitize_text("ordered 12 items on 2024"), "ordered 12 items on 2024");
    }

    #[test]
    fn sanitized_errors_scrub_message_and_keep_correlation() {
        let s = sanitizer("first-salt-value");
        let message = "failed for carol@example.com";
        let record = s.create_sanitized_error("worker_error", &message, Some("req-7"));

        assert_eq!(record.code, "worker_error");
        assert_eq!(record.correlation_id, "req-7");
        assert_eq!(record.message, "failed for [email]");

        let generated = s.create_sanitized_error("worker_error", &"boom", None);
        assert!(!generated.correlation_id.is_empty());
    }
}
