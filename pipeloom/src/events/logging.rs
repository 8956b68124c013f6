//! A sink that turns lifecycle events into `tracing` records.

use super::sink::EventSink;
use async_trait::async_trait;
use serde_json::Value as Json;
use tracing::{debug, info, warn, Level};

/// Logs every event with its run, node and module as structured fields.
///
/// Events that report a problem (`run.failed`, `run.aborted`,
/// `module.failed`, `module.skipped`, `circuit.opened`) are logged at
/// `WARN`. Everything else uses the sink's routine level, `INFO` unless
/// built with [`LoggingEventSink::debug`].
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    routine: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self::info()
    }
}

impl LoggingEventSink {
    /// Routine events at `DEBUG`, for chatty per-module tracing.
    #[must_use]
    pub fn debug() -> Self {
        Self {
            routine: Level::DEBUG,
        }
    }

    /// Routine events at `INFO`.
    #[must_use]
    pub fn info() -> Self {
        Self {
            routine: Level::INFO,
        }
    }

    /// The level `event_type` is logged at.
    #[must_use]
    pub fn level_for(&self, event_type: &str) -> Level {
        match event_type {
            "run.failed" | "run.aborted" | "module.failed" | "module.skipped"
            | "circuit.opened" => Level::WARN,
            _ => self.routine,
        }
    }

    fn log(&self, event_type: &str, data: Option<&Json>) {
        let text = |key: &str| data.and_then(|d| d.get(key)).and_then(Json::as_str);
        let run_id = text("run_id");
        let node = text("node");
        let module = text("module");
        let status = text("status");
        let duration_ms = data
            .and_then(|d| d.get("duration_ms"))
            .and_then(Json::as_f64);
        let error = data
            .and_then(|d| d.get("error"))
            .and_then(|e| e.get("message"))
            .and_then(Json::as_str);

        // `tracing` needs the level at the call site.
        match self.level_for(event_type) {
            Level::WARN => warn!(
                event = event_type,
                run_id, node, module, status, duration_ms, error,
                "Pipeline event"
            ),
            Level::DEBUG => debug!(
                event = event_type,
                run_id, node, module, status, duration_ms,
                "Pipeline event"
            ),
            _ => info!(
                event = event_type,
                run_id, node, module, status, duration_ms,
                "Pipeline event"
            ),
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Json>) {
        self.log(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Json>) {
        self.log(event_type, data.as_ref());
    }
}
