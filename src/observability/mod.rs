//! Structured logging and request metrics.

pub mod logging;
pub mod metrics;

use std::sync::Arc;
use std::time::Instant;

pub use self::logging::{LogError, LogHandle};
pub use self::metrics::Metrics;

use crate::mcp::ToolError;

/// One handler invocation, from just before the call until it reports. Records its
/// metrics exactly once: on [`close`](Self::close), or on drop if the call was abandoned.
pub struct ToolScope {
    metrics: Arc<Metrics>,
    tool: String,
    cluster: String,
    caller: String,
    started: Instant,
    span: tracing::Span,
    closed: bool,
}

impl ToolScope {
    pub fn open(metrics: Arc<Metrics>, tool: &str, cluster: &str, caller: &str) -> Self {
        let span = tracing::info_span!("tool_call", tool = %tool, cluster = %cluster, caller = %caller);
        span.in_scope(|| tracing::debug!("tool call started"));
        Self {
            metrics,
            tool: tool.to_string(),
            cluster: cluster.to_string(),
            caller: caller.to_string(),
            started: Instant::now(),
            span,
            closed: false,
        }
    }

    /// Span carrying `tool`, `cluster` and `caller` for the handler's own records.
    pub fn span(&self) -> tracing::Span {
        self.span.clone()
    }

    pub fn close<T>(mut self, outcome: &Result<T, ToolError>) {
        self.closed = true;
        let elapsed = self.started.elapsed();
        let duration_ms = elapsed.as_millis() as u64;
        let _entered = self.span.enter();
        match outcome {
            Ok(_) => tracing::info!(
                tool = %self.tool,
                cluster = %self.cluster,
                caller = %self.caller,
                duration_ms,
                "tool call succeeded"
            ),
            Err(error) => tracing::warn!(
                tool = %self.tool,
                cluster = %self.cluster,
                caller = %self.caller,
                duration_ms,
                error_kind = error.kind(),
                error = %error,
                "tool call failed"
            ),
        }
        self.metrics
            .record_tool_call(&self.tool, &self.cluster, outcome.is_ok(), elapsed);
    }
}

impl Drop for ToolScope {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let elapsed = self.started.elapsed();
        tracing::warn!(
            tool = %self.tool,
            cluster = %self.cluster,
            caller = %self.caller,
            duration_ms = elapsed.as_millis() as u64,
            "tool call abandoned before completion"
        );
        self.metrics
            .record_tool_call(&self.tool, &self.cluster, false, elapsed);
    }
}
