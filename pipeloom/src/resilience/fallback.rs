//! Fallback value substitution.

use super::{CallInfo, Decorator, Next};
use crate::errors::ModuleError;
use crate::events::{emit_event, EventSink};
use crate::value::Value;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Replaces any failure of the inner chain with a configured value.
pub struct FallbackDecorator {
    value: Value,
    events: Arc<dyn EventSink>,
}

impl FallbackDecorator {
    /// Creates a fallback decorator.
    #[must_use]
    pub fn new(value: Value, events: Arc<dyn EventSink>) -> Self {
        Self { value, events }
    }
}

#[async_trait]
impl Decorator for FallbackDecorator {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn call(
        &self,
        info: &CallInfo,
        input: Value,
        next: Next<'_>,
    ) -> Result<Value, ModuleError> {
        match next.run(input).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(module = %info.module, node = %info.node, error = %e, "Using fallback value");
                emit_event(
                    self.events.as_ref(),
                    "module.fallback",
                    serde_json::json!({
                        "run_id": info.run_id.to_string(),
                        "node": info.node.as_str(),
                        "module": info.module,
                        "error": e.to_string(),
                        "class": e.class(),
                    }),
                );
                Ok(self.value.clone())
            }
        }
    }
}
