//! Sliding-window throttling of call starts.

use super::{CallInfo, Decorator, Next};
use crate::errors::ModuleError;
use crate::value::Value;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Admits at most `count` call starts within any window of length `period`.
///
/// Calls over the limit wait for a slot; nothing is rejected.
#[derive(Debug)]
pub struct Throttle {
    count: usize,
    period: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl Throttle {
    /// Creates a throttle. A count of zero is treated as one.
    #[must_use]
    pub fn new(count: u32, period: Duration) -> Self {
        let count = usize::try_from(count.max(1)).unwrap_or(usize::MAX);
        Self {
            count,
            period,
            admitted: Mutex::new(VecDeque::with_capacity(count.min(1024))),
        }
    }

    /// Returns `(count, period)`.
    #[must_use]
    pub fn limits(&self) -> (usize, Duration) {
        (self.count, self.period)
    }

    /// Admits a call now if the window allows, otherwise returns how long to
    /// wait before trying again.
    pub fn try_admit(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut admitted = self.admitted.lock();

        while admitted
            .front()
            .is_some_and(|&t| now.duration_since(t) >= self.period)
        {
            admitted.pop_front();
        }

        if admitted.len() < self.count {
            admitted.push_back(now);
            return Ok(());
        }

        let oldest = admitted.front().copied().unwrap_or(now);
        Err(self.period.saturating_sub(now.duration_since(oldest)))
    }

    /// Waits until a call may start. Returns how long the caller waited.
    pub async fn admit(&self) -> Duration {
        let start = Instant::now();
        loop {
            match self.try_admit() {
                Ok(()) => return start.elapsed(),
                Err(wait) => tokio::time::sleep(wait.max(Duration::from_millis(1))).await,
            }
        }
    }
}

/// Process-wide registry of throttles keyed by module name.
///
/// The first configuration registered for a module wins.
#[derive(Debug, Default)]
pub struct ThrottleRegistry {
    throttles: DashMap<String, Arc<Throttle>>,
}

impl ThrottleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the throttle for a module, creating it if needed.
    pub fn get_or_create(&self, module: &str, count: u32, period: Duration) -> Arc<Throttle> {
        let throttle = self
            .throttles
            .entry(module.to_string())
            .or_insert_with(|| Arc::new(Throttle::new(count, period)))
            .clone();

        let requested = Throttle::new(count, period).limits();
        if throttle.limits() != requested {
            warn!(
                module = %module,
                existing = ?throttle.limits(),
                requested = ?requested,
                "Throttle already registered with a different configuration; keeping the first"
            );
        }
        throttle
    }

    /// Returns the throttle for a module, if one exists.
    #[must_use]
    pub fn get(&self, module: &str) -> Option<Arc<Throttle>> {
        self.throttles.get(module).map(|t| Arc::clone(&t))
    }
}

/// Delays call starts to respect the module's throttle.
pub struct ThrottleDecorator {
    throttle: Arc<Throttle>,
}

impl ThrottleDecorator {
    /// Creates a throttle decorator.
    #[must_use]
    pub fn new(throttle: Arc<Throttle>) -> Self {
        Self { throttle }
    }
}

#[async_trait]
impl Decorator for ThrottleDecorator {
    fn name(&self) -> &'static str {
        "throttle"
    }

    async fn call(
        &self,
        info: &CallInfo,
        input: Value,
        next: Next<'_>,
    ) -> Result<Value, ModuleError> {
        let waited = self.throttle.admit().await;
        if !waited.is_zero() {
            debug!(
                module = %info.module,
                node = %info.node,
                waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                "Throttled call start"
            );
        }
        next.run(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_up_to_count() {
        let throttle = Throttle::new(2, Duration::from_secs(60));
        assert!(throttle.try_admit().is_ok());
        assert!(throttle.try_admit().is_ok());

        let wait = throttle.try_admit().unwrap_err();
        assert!(wait > Duration::from_secs(59));
    }

    #[tokio::test]
    async fn test_window_slides() {
        let throttle = Throttle::new(1, Duration::from_millis(50));
        assert!(throttle.admit().await < Duration::from_millis(5));

        let waited = throttle.admit().await;
        assert!(waited >= Duration::from_millis(40));
    }

    #[test]
    fn test_registry_first_config_wins() {
        let registry = ThrottleRegistry::new();
        let first = registry.get_or_create("Api", 3, Duration::from_secs(1));
        let second = registry.get_or_create("Api", 10, Duration::from_secs(5));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.limits(), (3, Duration::from_secs(1)));
    }
}
