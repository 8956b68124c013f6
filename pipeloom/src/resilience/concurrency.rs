//! Per-module concurrency limits shared across runs.

use super::{CallInfo, Decorator, Next};
use crate::errors::ModuleError;
use crate::value::Value;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// A counting semaphore for one module.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl ConcurrencyLimiter {
    /// Creates a limiter. A limit of zero is treated as one.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Returns the configured limit.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Returns how many permits are currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }
}

/// Process-wide registry of concurrency limiters keyed by module name.
///
/// The first configuration registered for a module wins; later, different
/// configurations are logged and ignored.
#[derive(Debug, Default)]
pub struct ConcurrencyRegistry {
    limiters: DashMap<String, Arc<ConcurrencyLimiter>>,
}

impl ConcurrencyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the limiter for a module, creating it if needed.
    pub fn get_or_create(&self, module: &str, max_concurrent: usize) -> Arc<ConcurrencyLimiter> {
        let limiter = self
            .limiters
            .entry(module.to_string())
            .or_insert_with(|| Arc::new(ConcurrencyLimiter::new(max_concurrent)))
            .clone();

        if limiter.max_concurrent() != max_concurrent.max(1) {
            warn!(
                module = %module,
                existing = limiter.max_concurrent(),
                requested = max_concurrent,
                "Concurrency limit already registered with a different value; keeping the first"
            );
        }
        limiter
    }

    /// Returns the limiter for a module, if one exists.
    #[must_use]
    pub fn get(&self, module: &str) -> Option<Arc<ConcurrencyLimiter>> {
        self.limiters.get(module).map(|l| Arc::clone(&l))
    }
}

/// Holds a permit of the module's limiter for the duration of the call.
pub struct ConcurrencyDecorator {
    limiter: Arc<ConcurrencyLimiter>,
}

impl ConcurrencyDecorator {
    /// Creates a concurrency decorator.
    #[must_use]
    pub fn new(limiter: Arc<ConcurrencyLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Decorator for ConcurrencyDecorator {
    fn name(&self) -> &'static str {
        "concurrency"
    }

    async fn call(
        &self,
        info: &CallInfo,
        input: Value,
        next: Next<'_>,
    ) -> Result<Value, ModuleError> {
        // Released on every exit path, including cancellation.
        let _permit = Arc::clone(&self.limiter.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ModuleError::permanent(&info.module, "concurrency limiter closed"))?;
        debug!(
            module = %info.module,
            node = %info.node,
            in_use = self.limiter.in_use(),
            "Acquired concurrency permit"
        );
        next.run(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_config_wins() {
        let registry = ConcurrencyRegistry::new();
        let first = registry.get_or_create("Search", 2);
        let second = registry.get_or_create("Search", 5);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.max_concurrent(), 2);
    }

    #[test]
    fn test_limiters_are_per_module() {
        let registry = ConcurrencyRegistry::new();
        let a = registry.get_or_create("A", 1);
        let b = registry.get_or_create("B", 1);

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(registry.get("A").is_some());
        assert!(registry.get("C").is_none());
    }

    #[test]
    fn test_zero_limit_clamped() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.max_concurrent(), 1);
        assert_eq!(limiter.in_use(), 0);
    }
}
