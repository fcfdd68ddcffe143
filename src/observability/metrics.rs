//! Prometheus metrics for tool calls and HTTP requests.
//!
//! The recorder belongs to this value instead of being installed globally, so every
//! server instance (and every test) counts on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};

pub const TOOL_CALLS_TOTAL: &str = "tool_calls_total";
pub const TOOL_CALL_DURATION: &str = "tool_call_duration_seconds";
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

pub struct Metrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    enabled: AtomicBool,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new(enabled: bool) -> Result<Self, BuildError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Full(TOOL_CALL_DURATION.to_string()), DURATION_BUCKETS)?
            .build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_counter!(TOOL_CALLS_TOTAL, "Tool invocations that reached a handler");
            describe_histogram!(TOOL_CALL_DURATION, Unit::Seconds, "Tool handler latency");
            describe_counter!(HTTP_REQUESTS_TOTAL, "HTTP requests served");
        });

        Ok(Self {
            recorder,
            handle,
            enabled: AtomicBool::new(enabled),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn record_tool_call(&self, tool: &str, cluster: &str, success: bool, elapsed: Duration) {
        if !self.is_enabled() {
            return;
        }
        metrics::with_local_recorder(&self.recorder, || {
            counter!(
                TOOL_CALLS_TOTAL,
                "tool" => tool.to_string(),
                "cluster" => cluster.to_string(),
                "success" => success.to_string()
            )
            .increment(1);
            histogram!(
                TOOL_CALL_DURATION,
                "tool" => tool.to_string(),
                "cluster" => cluster.to_string()
            )
            .record(elapsed.as_secs_f64());
        });
    }

    pub fn record_http(&self, method: &str, path: &str, status: u16) {
        if !self.is_enabled() {
            return;
        }
        metrics::with_local_recorder(&self.recorder, || {
            counter!(
                HTTP_REQUESTS_TOTAL,
                "method" => method.to_string(),
                "path" => path.to_string(),
                "status" => status.to_string()
            )
            .increment(1);
        });
    }

    /// Prometheus text exposition. Empty while recording is switched off.
    pub fn render(&self) -> String {
        if self.is_enabled() {
            self.handle.render()
        } else {
            String::new()
        }
    }

    /// Value of the counter `name` whose label set contains every `labels` pair.
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.handle
            .render()
            .lines()
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| {
                let (series, value) = line.rsplit_once(' ')?;
                let series_name = series.split('{').next()?;
                if series_name != name {
                    return None;
                }
                let matches = labels
                    .iter()
                    .all(|(key, val)| series.contains(&format!("{}=\"{}\"", key, val)));
                if matches {
                    value.parse::<f64>().ok().map(|v| v as u64)
                } else {
                    None
                }
            })
            .sum()
    }
}
