use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use pulse_cli::commands::{config, doctor, price, replay};
use serde_json::Value;
use tempfile::TempDir;

const TEST_SALT: &str = "integration-test-salt";

#[test]
fn config_attributes_file_and_env_sources() {
    let dir = TempDir::new().expect("tempdir");
    let toml = "[offload]\nworkers = 3\n\n[store]\ncapacity = 250\n";
    let path = write_file(&dir, "pulse.toml", toml);

    with_env(&[("PULSE_OFFLOAD_BATCH_SIZE", "7"), ("PULSE_SANITIZER_SALT", TEST_SALT)], || {
        let output = config::run(Some(path.clone()));

        let file_source = format!("(source: file ({}))", path.display());
        assert!(output.contains(&format!("- offload.workers = 3 {file_source}")), "{output}");
        assert!(output.contains(&format!("- store.capacity = 250 {file_source}")), "{output}");
        assert!(output
            .contains("- offload.batch_size = 7 (source: env (PULSE_OFFLOAD_BATCH_SIZE))"));
        assert!(output.contains("- store.retention_days = 7 (source: default)"));
        assert!(output.contains("<redacted, 21 chars>"));
        assert!(!output.contains(TEST_SALT));
    });
}

#[test]
fn config_reports_validation_failure() {
    with_env(&[("PULSE_OFFLOAD_WORKERS", "0")], || {
        let output = config::run(None);
        assert!(output.starts_with("config validation failed"), "{output}");
        assert!(output.contains("offload.workers"));
    });
}

#[test]
fn doctor_passes_with_deployment_salt() {
    with_env(&[("PULSE_SANITIZER_SALT", TEST_SALT)], || {
        let payload = parse_payload(&doctor::run(true, None));
        assert_eq!(payload["overall_status"], "pass", "{payload}");

        let checks = payload["checks"].as_array().expect("checks array");
        let names: Vec<_> = checks.iter().filter_map(|check| check["name"].as_str()).collect();
        assert_eq!(names, ["config_validation", "sanitizer_salt", "worker_pool"]);
    });
}

#[test]
fn doctor_flags_development_salt() {
    with_env(&[], || {
        let output = doctor::run(false, None);
        assert!(output.starts_with("doctor: one or more readiness checks failed"));
        assert!(output.contains("- [fail] sanitizer_salt"));
        assert!(output.contains("- [ok] worker_pool"));
    });
}

#[test]
fn doctor_skips_checks_when_config_is_invalid() {
    with_env(&[("PULSE_LOGGING_LEVEL", "loud")], || {
        let payload = parse_payload(&doctor::run(true, None));
        assert_eq!(payload["overall_status"], "fail");
        assert_eq!(payload["checks"][0]["status"], "fail");
        assert_eq!(payload["checks"][1]["status"], "skipped");
        assert_eq!(payload["checks"][2]["status"], "skipped");
    });
}

#[test]
fn replay_counts_accepted_and_rejected_lines() {
    let dir = TempDir::new().expect("tempdir");
    let lines = [
        r#"{"customer_id":"ana","session_id":"s-1","event_type":"page_view","page":"/"}"#,
        r#"{"customer_id":"ana","session_id":"s-1","event_type":"product_view","page":"/p/1"}"#,
        "",
        concat!(
            r#"{"customer_id":"ana","session_id":"s-1","event_type":"purchase","value":1500,"#,
            r#""product":{"id":"espresso-machine","category":"kitchen","quantity":1}}"#
        ),
        r#"{"customer_id":"ana","feedback":{"likelihood_recommend":9}}"#,
        r#"{"customer_id":"   ","event_type":"page_view"}"#,
        "not json",
    ];
    let path = write_file(&dir, "events.jsonl", &lines.join("\n"));

    for synchronous in [false, true] {
        with_env(&[("PULSE_SANITIZER_SALT", TEST_SALT)], || {
            let result = replay::run(path.clone(), None, synchronous);
            assert_eq!(result.exit_code, 0, "{}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "replay");
            assert_eq!(payload["status"], "ok");

            let report = &payload["report"];
            assert_eq!(report["events_accepted"], 3);
            assert_eq!(report["feedback_accepted"], 1);
            let rejected: Vec<_> = report["rejected"]
                .as_array()
                .expect("rejected lines")
                .iter()
                .filter_map(|line| line["line"].as_u64())
                .collect();
            assert_eq!(rejected, [6, 7]);
            assert_eq!(report["statistics"]["total_events"], 3);
            assert_eq!(report["alerts"][0]["alert_type"], "high_value_purchase");
            assert!(!result.output.contains("\"ana\""));
        });
    }
}

#[test]
fn replay_reports_missing_input() {
    with_env(&[], || {
        let result = replay::run(PathBuf::from("does-not-exist.jsonl"), None, true);
        assert_eq!(result.exit_code, 4);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "input_read");
    });
}

#[test]
fn price_optimizes_every_product() {
    let dir = TempDir::new().expect("tempdir");
    let request = serde_json::json!({
        "products": [
            {"product_id": "mug", "base_price": "12.00", "cost": "10.00"},
            {"product_id": "kettle", "base_price": "80.00", "cost": "30.00",
             "days_to_expiry": 5, "inventory_turnover": 0.1}
        ],
        "context": {"demand_level": "high", "stock_level": "low"}
    });
    let path = write_file(&dir, "catalog.json", &request.to_string());

    with_env(&[], || {
        let result = price::run(path.clone(), None);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        let batch = &payload["report"]["batch"];
        assert_eq!(batch["optimizations"].as_array().map(Vec::len), Some(2));
        assert_eq!(batch["summary"]["total_products"], 2);
        assert_eq!(payload["report"]["rules_in_order"][0], "minimum-margin");
    });
}

#[test]
fn price_rejects_empty_request() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_file(&dir, "empty.json", r#"{"products": []}"#);

    with_env(&[], || {
        let result = price::run(path.clone(), None);
        assert_eq!(result.exit_code, 4);
        assert_eq!(parse_payload(&result.output)["error_class"], "input_read");
    });
}

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "PULSE_STORE_CAPACITY",
        "PULSE_STORE_JOURNEY_IDLE_TIMEOUT_SECS",
        "PULSE_STORE_RETENTION_DAYS",
        "PULSE_OFFLOAD_WORKERS",
        "PULSE_OFFLOAD_TASK_TIMEOUT_MS",
        "PULSE_OFFLOAD_BATCH_SIZE",
        "PULSE_OFFLOAD_BATCH_DELAY_MS",
        "PULSE_OFFLOAD_QUEUE_CAPACITY",
        "PULSE_OFFLOAD_MAX_CONSECUTIVE_FAILURES",
        "PULSE_ALERTS_HIGH_VALUE_THRESHOLD",
        "PULSE_ALERTS_ANOMALY_THRESHOLD",
        "PULSE_ALERTS_MAX_ALERTS",
        "PULSE_SCORING_CURRENT_WEIGHT",
        "PULSE_SANITIZER_SALT",
        "PULSE_LOGGING_LEVEL",
        "PULSE_LOGGING_FORMAT",
        "PULSE_LOG_LEVEL",
        "PULSE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
