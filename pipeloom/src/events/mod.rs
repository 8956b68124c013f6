//! Lifecycle events for observability.
//!
//! The runtime reports run and module lifecycle transitions to an
//! [`EventSink`]. Sinks are passed in explicitly; there is no global sink.

mod logging;
mod sink;

pub use logging::LoggingEventSink;
pub use sink::{emit_event, CollectingEventSink, EventSink, NoOpEventSink};
