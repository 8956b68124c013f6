//! Shared resilience state and chain assembly.

use super::{
    CacheBackend, CacheDecorator, CircuitBreakerDecorator, CircuitBreakerRegistry,
    ConcurrencyDecorator, ConcurrencyRegistry, FallbackDecorator, ResilienceChain,
    RetryDecorator, ThrottleDecorator, ThrottleRegistry, TimeoutDecorator,
};
use crate::events::EventSink;
use crate::graph::CallOptions;
use crate::module::Module;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Process-scoped registries keyed by module name.
///
/// Every pipeline bound through runtimes sharing one `Registries` shares the
/// same concurrency limits, throttles and circuit breakers per module.
#[derive(Debug, Default)]
pub struct Registries {
    /// Circuit breakers.
    pub breakers: CircuitBreakerRegistry,
    /// Concurrency limiters.
    pub concurrency: ConcurrencyRegistry,
    /// Throttles.
    pub throttles: ThrottleRegistry,
}

impl Registries {
    /// Creates empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the resilience chain for one module node.
    ///
    /// Decorators are layered, outermost first: fallback, concurrency,
    /// throttle, circuit breaker, cache, retry, timeout. Options that are not
    /// set contribute no layer. Shared limiters and breakers are keyed by
    /// `module_name`, the name the graph calls the module by, whatever name
    /// the bound implementation reports.
    pub fn build_chain(
        &self,
        module_name: &str,
        module: Arc<dyn Module>,
        options: &CallOptions,
        cache: Option<&Arc<dyn CacheBackend>>,
        events: &Arc<dyn EventSink>,
    ) -> ResilienceChain {
        let name = module_name;
        let mut chain = ResilienceChain::new(module);

        if let Some(value) = &options.fallback {
            chain = chain.with(Arc::new(FallbackDecorator::new(
                value.clone(),
                Arc::clone(events),
            )));
        }
        if let Some(concurrency) = options.concurrency {
            let limiter = self
                .concurrency
                .get_or_create(name, concurrency.max_concurrent);
            chain = chain.with(Arc::new(ConcurrencyDecorator::new(limiter)));
        }
        if let Some(throttle) = options.throttle {
            let throttle = self.throttles.get_or_create(
                name,
                throttle.count,
                Duration::from_millis(throttle.period_ms),
            );
            chain = chain.with(Arc::new(ThrottleDecorator::new(throttle)));
        }
        if let Some(breaker) = options.circuit_breaker {
            let breaker = self.breakers.get_or_create(name, breaker, events);
            chain = chain.with(Arc::new(CircuitBreakerDecorator::new(breaker)));
        }
        if let Some(cache_options) = options.cache {
            match cache {
                Some(backend) => {
                    chain = chain.with(Arc::new(CacheDecorator::new(
                        Arc::clone(backend),
                        Duration::from_millis(cache_options.ttl_ms),
                        Arc::clone(events),
                    )));
                }
                None => warn!(module = %name, "Caching requested but no cache backend configured"),
            }
        }
        if let Some(retry) = options.retry {
            chain = chain.with(Arc::new(RetryDecorator::new(retry, Arc::clone(events))));
        }
        if let Some(timeout_ms) = options.timeout_ms {
            chain = chain.with(Arc::new(TimeoutDecorator::new(Duration::from_millis(
                timeout_ms,
            ))));
        }

        chain
    }
}
