//! Observability utilities.
//!
//! Runs and module calls log through `tracing`; [`init_logging`] installs a
//! subscriber for binaries and tests that want output.

mod logging;
mod timer;

pub use logging::{init_logging, LoggingConfig};
pub use timer::SpanTimer;
