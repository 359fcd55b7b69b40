//! Lightweight in-process performance counters for the supervisor.
//!
//! Carried as ambient observability the same way the rest of this workspace
//! carries `tracing` spans — there's no dashboard consuming this, but a
//! running process should always be able to report what it's been doing.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::types::ExecutionMode;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ToolCounters {
    pub success: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedError {
    pub tool_or_stage: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    llm_calls: u64,
    llm_latency: Vec<Duration>,
    tool_calls: HashMap<String, ToolCounters>,
    tool_latency: HashMap<String, Vec<Duration>>,
    mode_usage: HashMap<ExecutionMode, u64>,
    errors: Vec<RecordedError>,
}

/// Snapshot returned by [`MetricsCollector::summary`]; cheap to serialize
/// and log or hand back over an admin channel.
#[derive(Debug, Serialize)]
pub struct MetricsSummary {
    pub llm_calls: u64,
    pub llm_avg_latency_ms: f64,
    pub tool_usage: HashMap<String, ToolCounters>,
    pub tool_avg_latency_ms: HashMap<String, f64>,
    pub mode_usage: HashMap<String, u64>,
    pub error_count: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_llm_call(&mut self, duration: Duration) {
        self.llm_calls += 1;
        self.llm_latency.push(duration);
    }

    pub fn record_tool_call(&mut self, tool_name: &str, duration: Duration, success: bool) {
        let counters = self.tool_calls.entry(tool_name.to_string()).or_default();
        if success {
            counters.success += 1;
        } else {
            counters.failed += 1;
        }
        self.tool_latency.entry(tool_name.to_string()).or_default().push(duration);
    }

    pub fn record_mode(&mut self, mode: ExecutionMode) {
        *self.mode_usage.entry(mode).or_insert(0) += 1;
    }

    pub fn record_error(&mut self, tool_or_stage: impl Into<String>, message: impl Into<String>) {
        self.errors.push(RecordedError { tool_or_stage: tool_or_stage.into(), message: message.into() });
    }

    pub fn summary(&self) -> MetricsSummary {
        let llm_avg_latency_ms = avg_ms(&self.llm_latency);
        let tool_avg_latency_ms = self
            .tool_latency
            .iter()
            .map(|(name, latencies)| (name.clone(), avg_ms(latencies)))
            .collect();
        let mode_usage = self
            .mode_usage
            .iter()
            .map(|(mode, count)| (mode_label(*mode).to_string(), *count))
            .collect();

        MetricsSummary {
            llm_calls: self.llm_calls,
            llm_avg_latency_ms,
            tool_usage: self.tool_calls.clone(),
            tool_avg_latency_ms,
            mode_usage,
            error_count: self.errors.len(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn avg_ms(latencies: &[Duration]) -> f64 {
    if latencies.is_empty() {
        return 0.0;
    }
    let total: Duration = latencies.iter().sum();
    total.as_secs_f64() * 1000.0 / latencies.len() as f64
}

fn mode_label(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::FastPath => "fast_path",
        ExecutionMode::SingleStep => "single_step",
        ExecutionMode::MultiStep => "multi_step",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reports_empty_defaults() {
        let metrics = MetricsCollector::new();
        let summary = metrics.summary();
        assert_eq!(summary.llm_calls, 0);
        assert_eq!(summary.llm_avg_latency_ms, 0.0);
        assert_eq!(summary.error_count, 0);
    }

    #[test]
    fn records_tool_success_and_failure_separately() {
        let mut metrics = MetricsCollector::new();
        metrics.record_tool_call("list_tasks", Duration::from_millis(10), true);
        metrics.record_tool_call("list_tasks", Duration::from_millis(20), false);
        let summary = metrics.summary();
        let counters = summary.tool_usage.get("list_tasks").unwrap();
        assert_eq!(counters.success, 1);
        assert_eq!(counters.failed, 1);
        assert!(summary.tool_avg_latency_ms["list_tasks"] > 0.0);
    }

    #[test]
    fn mode_usage_tracks_each_mode_independently() {
        let mut metrics = MetricsCollector::new();
        metrics.record_mode(ExecutionMode::FastPath);
        metrics.record_mode(ExecutionMode::FastPath);
        metrics.record_mode(ExecutionMode::SingleStep);
        let summary = metrics.summary();
        assert_eq!(summary.mode_usage["fast_path"], 2);
        assert_eq!(summary.mode_usage["single_step"], 1);
    }

    #[test]
    fn reset_clears_all_counters() {
        let mut metrics = MetricsCollector::new();
        metrics.record_llm_call(Duration::from_millis(5));
        metrics.record_error("plan", "boom");
        metrics.reset();
        let summary = metrics.summary();
        assert_eq!(summary.llm_calls, 0);
        assert_eq!(summary.error_count, 0);
    }
}
