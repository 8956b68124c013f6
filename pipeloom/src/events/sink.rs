//! The sink trait plus the discarding and recording sinks.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::warn;

/// Receives lifecycle events from a runtime.
///
/// Event types are dotted names grouped by prefix: `run.*`, `module.*`,
/// `cache.*` and `circuit.*`. The payload is a JSON object that carries at
/// least `run_id` for run and module events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers an event, waiting for the sink if it needs to.
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Delivers an event from synchronous code. Must not block.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// Sends one event to `sink`.
///
/// A panicking sink is logged and otherwise ignored, so observers can never
/// change the outcome of a run.
pub fn emit_event(sink: &dyn EventSink, event_type: &str, data: serde_json::Value) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        sink.try_emit(event_type, Some(data));
    })) {
        warn!(event_type = %event_type, "Event sink panicked: {:?}", e);
    }
}

/// Drops every event. The runtime's default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

type Recorded = (String, Option<serde_json::Value>);

/// Keeps every event in arrival order so tests can inspect a run.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<Recorded>>,
}

impl CollectingEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<Recorded> {
        self.events.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events whose type starts with `type_prefix`, e.g. `"module."`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<Recorded> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Event types in arrival order.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
    }

    fn record(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.record(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.record(event_type, data);
    }
}
