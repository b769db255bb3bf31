//! Feeds a JSON-lines file of behavior events and feedback through a fresh engine and
//! reports what it derived.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use pulse_core::config::AppConfig;
use pulse_core::{
    Alert, AnalyticsEngine, AnalyticsSnapshot, BehaviorInput, EngineStatistics, FeedbackData,
    InsightReport, PerformanceMetrics,
};
use serde::{Deserialize, Serialize};

use crate::commands::{build_runtime, load_options, CommandResult};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayRecord {
    Feedback { customer_id: String, feedback: FeedbackData },
    Behavior(BehaviorInput),
}

#[derive(Debug, Serialize)]
struct RejectedLine {
    line: usize,
    reason: String,
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    source: String,
    mode: &'static str,
    events_accepted: usize,
    feedback_accepted: usize,
    rejected: Vec<RejectedLine>,
    statistics: EngineStatistics,
    metrics: AnalyticsSnapshot,
    performance: PerformanceMetrics,
    insights: InsightReport,
    alerts: Vec<Alert>,
}

pub fn run(input: PathBuf, config_path: Option<PathBuf>, synchronous: bool) -> CommandResult {
    let config = match AppConfig::load(load_options(config_path)) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "replay",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let raw = match fs::read_to_string(&input) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                "replay",
                "input_read",
                format!("could not read `{}`: {error}", input.display()),
                4,
            );
        }
    };

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "replay",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(replay(config, &input, &raw, synchronous));
    match result {
        Ok(report) => CommandResult::report("replay", &report),
        Err(error) => CommandResult::failure("replay", "engine_init", format!("{error:#}"), 3),
    }
}

async fn replay(
    config: AppConfig,
    source: &Path,
    raw: &str,
    synchronous: bool,
) -> anyhow::Result<ReplayReport> {
    let mut builder = AnalyticsEngine::builder().config(config);
    if synchronous {
        builder = builder.synchronous();
    }
    let engine = builder.build().context("analytics engine failed to start")?;

    let mut events_accepted = 0;
    let mut feedback_accepted = 0;
    let mut rejected = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        let line_number = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let outcome = match serde_json::from_str::<ReplayRecord>(line) {
            Ok(ReplayRecord::Behavior(input)) => {
                engine.track_behavior(input).map(|_| events_accepted += 1)
            }
            Ok(ReplayRecord::Feedback { customer_id, feedback }) => {
                engine.record_feedback(&customer_id, feedback).map(|_| feedback_accepted += 1)
            }
            Err(error) => {
                rejected.push(RejectedLine { line: line_number, reason: error.to_string() });
                continue;
            }
        };
        if let Err(error) = outcome {
            rejected.push(RejectedLine { line: line_number, reason: error.to_string() });
        }
    }

    engine.flush().await;
    let insights = match engine.refresh_insights().await {
        Ok(report) => report,
        Err(error) => {
            tracing::warn!(
                event_name = "cli.replay.insights_failed",
                error = %error,
                "insights refresh failed"
            );
            engine.insights()
        }
    };
    engine.shutdown().await;

    tracing::info!(
        event_name = "cli.replay.completed",
        events_accepted,
        feedback_accepted,
        rejected = rejected.len(),
        "replay completed"
    );
    Ok(ReplayReport {
        source: source.display().to_string(),
        mode: if synchronous { "synchronous" } else { "offloaded" },
        events_accepted,
        feedback_accepted,
        rejected,
        statistics: engine.statistics(),
        metrics: engine.metrics(),
        performance: engine.performance_metrics(),
        insights,
        alerts: engine.alerts(),
    })
}
