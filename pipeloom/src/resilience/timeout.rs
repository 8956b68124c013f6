//! Per-attempt timeout.

use super::{CallInfo, Decorator, Next};
use crate::errors::ModuleError;
use crate::value::Value;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Fails a call that does not finish within the budget.
///
/// The inner future is dropped on expiry, so the module observes
/// cancellation at its next await point.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutDecorator {
    timeout: Duration,
}

impl TimeoutDecorator {
    /// Creates a timeout decorator.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Decorator for TimeoutDecorator {
    fn name(&self) -> &'static str {
        "timeout"
    }

    async fn call(
        &self,
        info: &CallInfo,
        input: Value,
        next: Next<'_>,
    ) -> Result<Value, ModuleError> {
        match tokio::time::timeout(self.timeout, next.run(input)).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(module = %info.module, node = %info.node, timeout_ms, "Module call timed out");
                Err(ModuleError::timeout(&info.module, timeout_ms))
            }
        }
    }
}
