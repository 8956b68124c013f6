//! Runtime configuration.

use crate::observability::LoggingConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable bounding how many module calls run at once.
pub const ENV_MAX_PARALLELISM: &str = "PIPELOOM_MAX_PARALLELISM";
/// Environment variable holding the log filter directive.
pub const ENV_LOG: &str = "PIPELOOM_LOG";
/// Environment variable switching logs to JSON when set to `1` or `true`.
pub const ENV_LOG_JSON: &str = "PIPELOOM_LOG_JSON";

/// Configuration for a [`Runtime`](crate::scheduler::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on module calls executing at once within a run.
    /// `None` means unbounded.
    pub max_parallelism: Option<usize>,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the parallelism bound.
    #[must_use]
    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = Some(max.max(1));
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Builds a configuration from `PIPELOOM_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparsable ones are logged and
    /// ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_PARALLELISM) {
            match raw.trim().parse::<usize>() {
                Ok(0) | Err(_) => {
                    warn!(variable = ENV_MAX_PARALLELISM, value = %raw, "Ignoring invalid parallelism bound");
                }
                Ok(max) => config.max_parallelism = Some(max),
            }
        }
        if let Some(filter) = lookup(ENV_LOG) {
            config.logging.filter = filter;
        }
        if let Some(raw) = lookup(ENV_LOG_JSON) {
            config.logging.json = matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true");
        }

        config
    }
}
