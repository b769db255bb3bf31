use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use pulse_core::config::AppConfig;
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::load_options;

struct Field {
    key: &'static str,
    value: String,
    env_key: Option<&'static str>,
}

impl Field {
    fn new(key: &'static str, value: impl ToString, env_key: Option<&'static str>) -> Self {
        Self { key, value: value.to_string(), env_key }
    }
}

pub fn run(config_path: Option<PathBuf>) -> String {
    let config = match AppConfig::load(load_options(config_path.clone())) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = config_path.filter(|path| path.exists()).or_else(detect_config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let salt = if config.sanitizer.uses_default_salt() {
        "<development default>".to_string()
    } else {
        redact_secret(config.sanitizer.salt.expose_secret())
    };

    vec![
        Field::new("store.capacity", config.store.capacity, Some("PULSE_STORE_CAPACITY")),
        Field::new(
            "store.journey_idle_timeout_secs",
            config.store.journey_idle_timeout_secs,
            Some("PULSE_STORE_JOURNEY_IDLE_TIMEOUT_SECS"),
        ),
        Field::new(
            "store.retention_days",
            config.store.retention_days,
            Some("PULSE_STORE_RETENTION_DAYS"),
        ),
        Field::new("store.ledger_history_cap", config.store.ledger_history_cap, None),
        Field::new("offload.workers", config.offload.workers, Some("PULSE_OFFLOAD_WORKERS")),
        Field::new(
            "offload.task_timeout_ms",
            config.offload.task_timeout_ms,
            Some("PULSE_OFFLOAD_TASK_TIMEOUT_MS"),
        ),
        Field::new(
            "offload.batch_size",
            config.offload.batch_size,
            Some("PULSE_OFFLOAD_BATCH_SIZE"),
        ),
        Field::new(
            "offload.batch_delay_ms",
            config.offload.batch_delay_ms,
            Some("PULSE_OFFLOAD_BATCH_DELAY_MS"),
        ),
        Field::new(
            "offload.queue_capacity",
            config.offload.queue_capacity,
            Some("PULSE_OFFLOAD_QUEUE_CAPACITY"),
        ),
        Field::new(
            "offload.max_consecutive_failures",
            config.offload.max_consecutive_failures,
            Some("PULSE_OFFLOAD_MAX_CONSECUTIVE_FAILURES"),
        ),
        Field::new(
            "alerts.high_value_threshold",
            config.alerts.high_value_threshold,
            Some("PULSE_ALERTS_HIGH_VALUE_THRESHOLD"),
        ),
        Field::new("alerts.rapid_engagement_count", config.alerts.rapid_engagement_count, None),
        Field::new(
            "alerts.rapid_engagement_window_secs",
            config.alerts.rapid_engagement_window_secs,
            None,
        ),
        Field::new(
            "alerts.anomaly_threshold",
            config.alerts.anomaly_threshold,
            Some("PULSE_ALERTS_ANOMALY_THRESHOLD"),
        ),
        Field::new("alerts.max_alerts", config.alerts.max_alerts, Some("PULSE_ALERTS_MAX_ALERTS")),
        Field::new("scoring.history_cap", config.scoring.history_cap, None),
        Field::new("scoring.recency_window_days", config.scoring.recency_window_days, None),
        Field::new(
            "scoring.current_weight",
            config.scoring.current_weight,
            Some("PULSE_SCORING_CURRENT_WEIGHT"),
        ),
        Field::new("sanitizer.salt", salt, Some("PULSE_SANITIZER_SALT")),
        Field::new("logging.level", &config.logging.level, Some("PULSE_LOGGING_LEVEL")),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            Some("PULSE_LOGGING_FORMAT"),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("pulse.toml"), PathBuf::from("config/pulse.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var(env_key).is_ok_and(|value| !value.trim().is_empty()) {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    match secret.trim().chars().count() {
        0 => "<empty>".to_string(),
        length => format!("<redacted, {length} chars>"),
    }
}
