use std::path::PathBuf;
use std::time::Duration;

use pulse_core::config::AppConfig;
use pulse_core::{AnalyticsEngine, BehaviorInput, EventType};
use serde::Serialize;

use crate::commands::{build_runtime, load_options};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool, config_path: Option<PathBuf>) -> String {
    let report = build_report(config_path);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\
                 \"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(config_path: Option<PathBuf>) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(load_options(config_path)) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_sanitizer_salt(&config));
            checks.push(check_worker_pool(config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["sanitizer_salt", "worker_pool"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_sanitizer_salt(config: &AppConfig) -> DoctorCheck {
    if config.sanitizer.uses_default_salt() {
        DoctorCheck {
            name: "sanitizer_salt",
            status: CheckStatus::Fail,
            details: "using the built-in development salt; set PULSE_SANITIZER_SALT".to_string(),
        }
    } else {
        DoctorCheck {
            name: "sanitizer_salt",
            status: CheckStatus::Pass,
            details: "deployment salt configured".to_string(),
        }
    }
}

/// Starts an offloaded engine, pushes one probe event through a worker and shuts it down.
fn check_worker_pool(config: AppConfig) -> DoctorCheck {
    let fail = |details: String| DoctorCheck {
        name: "worker_pool",
        status: CheckStatus::Fail,
        details,
    };
    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(error) => return fail(format!("failed to initialize async runtime: {error}")),
    };

    let workers = config.offload.workers;
    let result = runtime.block_on(async {
        let engine = AnalyticsEngine::builder()
            .config(config)
            .build()
            .map_err(|error| format!("engine failed to start: {error}"))?;
        engine
            .track_behavior(BehaviorInput::new("doctor-probe", EventType::PageView))
            .map_err(|error| format!("probe event rejected: {error}"))?;
        let flushed = tokio::time::timeout(PROBE_TIMEOUT, engine.flush()).await;
        let metrics = engine.performance_metrics();
        engine.shutdown().await;

        if flushed.is_err() {
            return Err(format!("probe not analyzed within {}s", PROBE_TIMEOUT.as_secs()));
        }
        if metrics.offload.fallbacks > 0 {
            return Err("probe fell back to synchronous processing".to_string());
        }
        Ok::<_, String>(metrics.offload.average_processing_ms)
    });

    match result {
        Ok(elapsed_ms) => DoctorCheck {
            name: "worker_pool",
            status: CheckStatus::Pass,
            details: format!("{workers} worker(s) answered the probe in {elapsed_ms:.1}ms"),
        },
        Err(error) => fail(error),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
