use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SALT: &str = "pulse-local-development-salt";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub offload: OffloadConfig,
    pub alerts: AlertConfig,
    pub scoring: ScoringConfig,
    pub sanitizer: SanitizerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Maximum number of buffered behavior events (default: 500)
    pub capacity: usize,
    /// Seconds without events before a journey is flagged inactive (default: 1800)
    pub journey_idle_timeout_secs: u64,
    /// Age used by scheduled cleanup (default: 7)
    pub retention_days: u32,
    /// Purchase records kept per customer in the consumption ledger (default: 1000)
    pub ledger_history_cap: usize,
}

#[derive(Clone, Debug)]
pub struct OffloadConfig {
    pub workers: usize,
    pub task_timeout_ms: u64,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub queue_capacity: usize,
    pub max_consecutive_failures: u32,
}

#[derive(Clone, Debug)]
pub struct AlertConfig {
    pub high_value_threshold: f64,
    pub rapid_engagement_count: usize,
    pub rapid_engagement_window_secs: u64,
    pub anomaly_threshold: f64,
    pub max_alerts: usize,
}

#[derive(Clone, Debug)]
pub struct ScoringConfig {
    /// Score records kept per customer and ensemble (default: 100)
    pub history_cap: usize,
    /// Prior scores older than this are ignored by recency blending (default: 30)
    pub recency_window_days: i64,
    /// Weight of the fresh ensemble score against the decayed prior average (default: 0.5)
    pub current_weight: f64,
}

#[derive(Clone, Debug)]
pub struct SanitizerConfig {
    pub salt: SecretString,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub store_capacity: Option<usize>,
    pub offload_workers: Option<usize>,
    pub offload_task_timeout_ms: Option<u64>,
    pub offload_batch_size: Option<usize>,
    pub offload_batch_delay_ms: Option<u64>,
    pub sanitizer_salt: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                capacity: 500,
                journey_idle_timeout_secs: 30 * 60,
                retention_days: 7,
                ledger_history_cap: 1000,
            },
            offload: OffloadConfig {
                workers: 2,
                task_timeout_ms: 10_000,
                batch_size: 5,
                batch_delay_ms: 50,
                queue_capacity: 1024,
                max_consecutive_failures: 3,
            },
            alerts: AlertConfig {
                high_value_threshold: 1000.0,
                rapid_engagement_count: 10,
                rapid_engagement_window_secs: 10 * 60,
                anomaly_threshold: 2.5,
                max_alerts: 100,
            },
            scoring: ScoringConfig {
                history_cap: 100,
                recency_window_days: 30,
                current_weight: 0.5,
            },
            sanitizer: SanitizerConfig { salt: secret_value(DEFAULT_SALT.to_string()) },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl OffloadConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

impl SanitizerConfig {
    pub fn uses_default_salt(&self) -> bool {
        self.salt.expose_secret() == DEFAULT_SALT
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match resolve_config_path(options.config_path.as_deref()) {
            Some(path) => config.apply_patch(read_patch(&path)?),
            None if options.require_file => {
                let expected = options.config_path.unwrap_or_else(|| PathBuf::from("pulse.toml"));
                return Err(ConfigError::MissingConfigFile(expected));
            }
            None => {}
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(store) = patch.store {
            if let Some(capacity) = store.capacity {
                self.store.capacity = capacity;
            }
            if let Some(timeout) = store.journey_idle_timeout_secs {
                self.store.journey_idle_timeout_secs = timeout;
            }
            if let Some(days) = store.retention_days {
                self.store.retention_days = days;
            }
            if let Some(cap) = store.ledger_history_cap {
                self.store.ledger_history_cap = cap;
            }
        }

        if let Some(offload) = patch.offload {
            if let Some(workers) = offload.workers {
                self.offload.workers = workers;
            }
            if let Some(timeout) = offload.task_timeout_ms {
                self.offload.task_timeout_ms = timeout;
            }
            if let Some(batch_size) = offload.batch_size {
                self.offload.batch_size = batch_size;
            }
            if let Some(delay) = offload.batch_delay_ms {
                self.offload.batch_delay_ms = delay;
            }
            if let Some(capacity) = offload.queue_capacity {
                self.offload.queue_capacity = capacity;
            }
            if let Some(failures) = offload.max_consecutive_failures {
                self.offload.max_consecutive_failures = failures;
            }
        }

        if let Some(alerts) = patch.alerts {
            if let Some(threshold) = alerts.high_value_threshold {
                self.alerts.high_value_threshold = threshold;
            }
            if let Some(count) = alerts.rapid_engagement_count {
                self.alerts.rapid_engagement_count = count;
            }
            if let Some(window) = alerts.rapid_engagement_window_secs {
                self.alerts.rapid_engagement_window_secs = window;
            }
            if let Some(threshold) = alerts.anomaly_threshold {
                self.alerts.anomaly_threshold = threshold;
            }
            if let Some(max_alerts) = alerts.max_alerts {
                self.alerts.max_alerts = max_alerts;
            }
        }

        if let Some(scoring) = patch.scoring {
            if let Some(cap) = scoring.history_cap {
                self.scoring.history_cap = cap;
            }
            if let Some(days) = scoring.recency_window_days {
                self.scoring.recency_window_days = days;
            }
            if let Some(weight) = scoring.current_weight {
                self.scoring.current_weight = weight;
            }
        }

        if let Some(sanitizer) = patch.sanitizer {
            if let Some(salt) = sanitizer.salt {
                self.sanitizer.salt = secret_value(salt);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PULSE_STORE_CAPACITY") {
            self.store.capacity = parse_usize("PULSE_STORE_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("PULSE_STORE_JOURNEY_IDLE_TIMEOUT_SECS") {
            self.store.journey_idle_timeout_secs =
                parse_u64("PULSE_STORE_JOURNEY_IDLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PULSE_STORE_RETENTION_DAYS") {
            self.store.retention_days = parse_u32("PULSE_STORE_RETENTION_DAYS", &value)?;
        }

        if let Some(value) = read_env("PULSE_OFFLOAD_WORKERS") {
            self.offload.workers = parse_usize("PULSE_OFFLOAD_WORKERS", &value)?;
        }
        if let Some(value) = read_env("PULSE_OFFLOAD_TASK_TIMEOUT_MS") {
            self.offload.task_timeout_ms = parse_u64("PULSE_OFFLOAD_TASK_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("PULSE_OFFLOAD_BATCH_SIZE") {
            self.offload.batch_size = parse_usize("PULSE_OFFLOAD_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read_env("PULSE_OFFLOAD_BATCH_DELAY_MS") {
            self.offload.batch_delay_ms = parse_u64("PULSE_OFFLOAD_BATCH_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("PULSE_OFFLOAD_QUEUE_CAPACITY") {
            self.offload.queue_capacity = parse_usize("PULSE_OFFLOAD_QUEUE_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("PULSE_OFFLOAD_MAX_CONSECUTIVE_FAILURES") {
            self.offload.max_consecutive_failures =
                parse_u32("PULSE_OFFLOAD_MAX_CONSECUTIVE_FAILURES", &value)?;
        }

        if let Some(value) = read_env("PULSE_ALERTS_HIGH_VALUE_THRESHOLD") {
            self.alerts.high_value_threshold =
                parse_f64("PULSE_ALERTS_HIGH_VALUE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("PULSE_ALERTS_ANOMALY_THRESHOLD") {
            self.alerts.anomaly_threshold = parse_f64("PULSE_ALERTS_ANOMALY_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("PULSE_ALERTS_MAX_ALERTS") {
            self.alerts.max_alerts = parse_usize("PULSE_ALERTS_MAX_ALERTS", &value)?;
        }

        if let Some(value) = read_env("PULSE_SCORING_CURRENT_WEIGHT") {
            self.scoring.current_weight = parse_f64("PULSE_SCORING_CURRENT_WEIGHT", &value)?;
        }

        if let Some(value) = read_env("PULSE_SANITIZER_SALT") {
            self.sanitizer.salt = secret_value(value);
        }

        let log_level = read_env("PULSE_LOGGING_LEVEL").or_else(|| read_env("PULSE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("PULSE_LOGGING_FORMAT").or_else(|| read_env("PULSE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(capacity) = overrides.store_capacity {
            self.store.capacity = capacity;
        }
        if let Some(workers) = overrides.offload_workers {
            self.offload.workers = workers;
        }
        if let Some(timeout) = overrides.offload_task_timeout_ms {
            self.offload.task_timeout_ms = timeout;
        }
        if let Some(batch_size) = overrides.offload_batch_size {
            self.offload.batch_size = batch_size;
        }
        if let Some(delay) = overrides.offload_batch_delay_ms {
            self.offload.batch_delay_ms = delay;
        }
        if let Some(salt) = overrides.sanitizer_salt {
            self.sanitizer.salt = secret_value(salt);
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(format) = overrides.log_format {
            self.logging.format = format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_store(&self.store)?;
        validate_offload(&self.offload)?;
        validate_alerts(&self.alerts)?;
        validate_scoring(&self.scoring)?;
        validate_sanitizer(&self.sanitizer)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("pulse.toml"), PathBuf::from("config/pulse.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Expands `${VAR}` references from the process environment.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            output.push(ch);
            continue;
        }

        chars.next();
        let mut var = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some(next) => var.push(next),
                None => return Err(ConfigError::UnterminatedInterpolation),
            }
        }

        match env::var(&var) {
            Ok(value) => output.push_str(&value),
            Err(_) => return Err(ConfigError::MissingEnvInterpolation { var }),
        }
    }

    Ok(output)
}

fn validate_store(store: &StoreConfig) -> Result<(), ConfigError> {
    if store.capacity == 0 {
        return Err(ConfigError::Validation("store.capacity must be greater than zero".into()));
    }
    if store.journey_idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "store.journey_idle_timeout_secs must be greater than zero".into(),
        ));
    }
    if store.retention_days == 0 {
        return Err(ConfigError::Validation(
            "store.retention_days must be greater than zero".into(),
        ));
    }
    if store.ledger_history_cap == 0 {
        return Err(ConfigError::Validation(
            "store.ledger_history_cap must be greater than zero".into(),
        ));
    }
    Ok(())
}

fn validate_offload(offload: &OffloadConfig) -> Result<(), ConfigError> {
    if offload.workers == 0 || offload.workers > 64 {
        return Err(ConfigError::Validation("offload.workers must be in range 1..=64".into()));
    }
    if offload.task_timeout_ms == 0 || offload.task_timeout_ms > 300_000 {
        return Err(ConfigError::Validation(
            "offload.task_timeout_ms must be in range 1..=300000".into(),
        ));
    }
    if offload.batch_size == 0 {
        return Err(ConfigError::Validation(
            "offload.batch_size must be greater than zero".into(),
        ));
    }
    if offload.batch_delay_ms == 0 || offload.batch_delay_ms > 10_000 {
        return Err(ConfigError::Validation(
            "offload.batch_delay_ms must be in range 1..=10000".into(),
        ));
    }
    if offload.queue_capacity < offload.batch_size {
        return Err(ConfigError::Validation(
            "offload.queue_capacity must be at least offload.batch_size".into(),
        ));
    }
    if offload.max_consecutive_failures == 0 {
        return Err(ConfigError::Validation(
            "offload.max_consecutive_failures must be greater than zero".into(),
        ));
    }
    Ok(())
}

fn validate_alerts(alerts: &AlertConfig) -> Result<(), ConfigError> {
    if !alerts.high_value_threshold.is_finite() || alerts.high_value_threshold <= 0.0 {
        return Err(ConfigError::Validation(
            "alerts.high_value_threshold must be a positive number".into(),
        ));
    }
    if !alerts.anomaly_threshold.is_finite() || alerts.anomaly_threshold <= 0.0 {
        return Err(ConfigError::Validation(
            "alerts.anomaly_threshold must be a positive number".into(),
        ));
    }
    if alerts.rapid_engagement_count == 0 || alerts.rapid_engagement_window_secs == 0 {
        return Err(ConfigError::Validation(
            "alerts.rapid_engagement_count and window must be greater than zero".into(),
        ));
    }
    if alerts.max_alerts == 0 {
        return Err(ConfigError::Validation("alerts.max_alerts must be greater than zero".into()));
    }
    Ok(())
}

fn validate_scoring(scoring: &ScoringConfig) -> Result<(), ConfigError> {
    if scoring.history_cap == 0 {
        return Err(ConfigError::Validation(
            "scoring.history_cap must be greater than zero".into(),
        ));
    }
    if scoring.recency_window_days <= 0 {
        return Err(ConfigError::Validation(
            "scoring.recency_window_days must be greater than zero".into(),
        ));
    }
    if !(0.5..=1.0).contains(&scoring.current_weight) {
        return Err(ConfigError::Validation(
            "scoring.current_weight must be in range 0.5..=1.0".into(),
        ));
    }
    Ok(())
}

fn validate_sanitizer(sanitizer: &SanitizerConfig) -> Result<(), ConfigError> {
    if sanitizer.salt.expose_secret().trim().len() < 8 {
        return Err(ConfigError::Validation(
            "sanitizer.salt must be at least 8 characters".into(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    store: Option<StorePatch>,
    offload: Option<OffloadPatch>,
    alerts: Option<AlertPatch>,
    scoring: Option<ScoringPatch>,
    sanitizer: Option<SanitizerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct StorePatch {
    capacity: Option<usize>,
    journey_idle_timeout_secs: Option<u64>,
    retention_days: Option<u32>,
    ledger_history_cap: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct OffloadPatch {
    workers: Option<usize>,
    task_timeout_ms: Option<u64>,
    batch_size: Option<usize>,
    batch_delay_ms: Option<u64>,
    queue_capacity: Option<usize>,
    max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AlertPatch {
    high_value_threshold: Option<f64>,
    rapid_engagement_count: Option<usize>,
    rapid_engagement_window_secs: Option<u64>,
    anomaly_threshold: Option<f64>,
    max_alerts: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ScoringPatch {
    history_cap: Option<usize>,
    recency_window_days: Option<i64>,
    current_weight: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SanitizerPatch {
    salt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_and_match_documented_values() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| err.to_string())?;

        ensure(config.store.capacity == 500, "store capacity defaults to 500")?;
        ensure(config.store.journey_idle_timeout_secs == 1800, "idle timeout is 30 minutes")?;
        ensure(config.offload.task_timeout_ms == 10_000, "task timeout defaults to 10s")?;
        ensure(config.offload.batch_size == 5, "batch size defaults to 5")?;
        ensure(config.offload.batch_delay_ms == 50, "batch delay defaults to 50ms")?;
        ensure(config.alerts.max_alerts == 100, "alert ring defaults to 100")?;
        ensure(config.sanitizer.uses_default_salt(), "default salt is flagged")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_PULSE_SALT", "salt-from-environment");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("pulse.toml");
            fs::write(
                &path,
                r#"
[sanitizer]
salt = "${TEST_PULSE_SALT}"

[store]
capacity = 64
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.sanitizer.salt.expose_secret() == "salt-from-environment",
                "salt should be interpolated from the environment",
            )?;
            ensure(config.store.capacity == 64, "capacity should come from the file")
        })();

        clear_vars(&["TEST_PULSE_SALT"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["TEST_PULSE_UNSET_VAR"]);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("pulse.toml");
        fs::write(&path, "[sanitizer]\nsalt = \"${TEST_PULSE_UNSET_VAR}\"\n")
            .map_err(|err| err.to_string())?;

        match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() }) {
            Err(ConfigError::MissingEnvInterpolation { var }) => {
                ensure(var == "TEST_PULSE_UNSET_VAR", "error should name the missing variable")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected interpolation failure".to_string()),
        }
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PULSE_OFFLOAD_WORKERS", "3");
        env::set_var("PULSE_STORE_CAPACITY", "200");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("pulse.toml");
            fs::write(
                &path,
                r#"
[store]
capacity = 100

[offload]
workers = 4
batch_size = 8

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    store_capacity: Some(300),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.store.capacity == 300, "explicit override should win")?;
            ensure(config.offload.workers == 3, "env should win over file")?;
            ensure(config.offload.batch_size == 8, "file should win over defaults")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")
        })();

        clear_vars(&["PULSE_OFFLOAD_WORKERS", "PULSE_STORE_CAPACITY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PULSE_LOG_LEVEL", "warn");
        env::set_var("PULSE_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "log level should be set from env alias")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env alias",
            )
        })();

        clear_vars(&["PULSE_LOG_LEVEL", "PULSE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PULSE_OFFLOAD_TASK_TIMEOUT_MS", "soon");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, value }) => ensure(
                key == "PULSE_OFFLOAD_TASK_TIMEOUT_MS" && value == "soon",
                "error should carry the offending key and value",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override failure".to_string()),
        };

        clear_vars(&["PULSE_OFFLOAD_TASK_TIMEOUT_MS"]);
        result
    }

    #[test]
    fn current_weight_below_half_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PULSE_SCORING_CURRENT_WEIGHT", "0.3");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::Validation(message)) => ensure(
                message.contains("scoring.current_weight"),
                "validation failure should mention scoring.current_weight",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected validation failure".to_string()),
        };

        clear_vars(&["PULSE_SCORING_CURRENT_WEIGHT"]);
        result
    }

    #[test]
    fn salt_is_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PULSE_SANITIZER_SALT", "very-secret-salt-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("very-secret-salt-value"), "debug output must redact the salt")?;
            ensure(!config.sanitizer.uses_default_salt(), "env salt should replace the default")
        })();

        clear_vars(&["PULSE_SANITIZER_SALT"]);
        result
    }

    #[test]
    fn required_file_missing_is_an_error() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("definitely/missing/pulse.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        });
        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }
}
