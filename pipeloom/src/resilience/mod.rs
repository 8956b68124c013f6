//! Resilience decorators around module calls.
//!
//! Each module node executes through a [`ResilienceChain`]: an ordered list
//! of [`Decorator`]s wrapping the module. The chain is assembled once per node
//! from its [`CallOptions`](crate::graph::CallOptions) by
//! [`Registries::build_chain`].
//!
//! Concurrency limits, throttles and circuit breakers are keyed by module name
//! and live in [`Registries`], so they apply across every node and every run
//! that invokes the same module.

mod cache;
mod chain;
mod circuit_breaker;
mod concurrency;
mod fallback;
mod registry;
#[cfg(test)]
mod resilience_tests;
mod retry;
mod throttle;
mod timeout;

pub use cache::{cache_key, CacheBackend, CacheDecorator, InMemoryCacheBackend};
pub use chain::{CallInfo, Decorator, Next, ResilienceChain};
pub use circuit_breaker::{
    Admission, BreakerState, CircuitBreaker, CircuitBreakerDecorator, CircuitBreakerRegistry,
    CircuitStatus,
};
pub use concurrency::{ConcurrencyDecorator, ConcurrencyLimiter, ConcurrencyRegistry};
pub use fallback::FallbackDecorator;
pub use registry::Registries;
pub use retry::{BackoffStrategy, JitterStrategy, RetryDecorator, RetryOptions, RetryState};
pub use throttle::{Throttle, ThrottleDecorator, ThrottleRegistry};
pub use timeout::TimeoutDecorator;
