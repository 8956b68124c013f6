//! Per-call options attached to module nodes.

use crate::resilience::RetryOptions;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when a module call fails after every resilience decorator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Fail the whole run.
    #[default]
    Fail,
    /// Mark the node's outputs unreachable and continue.
    Skip,
    /// Like [`ErrorPolicy::Skip`], and record the error on the run result.
    Log,
}

/// Cache configuration for a module call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// How long a cached result stays valid.
    pub ttl_ms: u64,
}

/// Throttle configuration: at most `count` calls start per `period_ms` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleOptions {
    /// Calls admitted per window.
    pub count: u32,
    /// Window length.
    pub period_ms: u64,
}

/// Concurrency limit shared by every call to the same module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyOptions {
    /// Maximum simultaneous executions.
    pub max_concurrent: usize,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerOptions {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call.
    pub cooldown_ms: u64,
}

/// Options controlling how a module node is invoked.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallOptions {
    /// Retry transient failures.
    pub retry: Option<RetryOptions>,
    /// Per-attempt timeout.
    pub timeout_ms: Option<u64>,
    /// Value substituted when the call ultimately fails.
    pub fallback: Option<Value>,
    /// Memoize results by input.
    pub cache: Option<CacheOptions>,
    /// Rate limit call starts.
    pub throttle: Option<ThrottleOptions>,
    /// Bound simultaneous executions.
    pub concurrency: Option<ConcurrencyOptions>,
    /// Fail fast after repeated failures.
    pub circuit_breaker: Option<CircuitBreakerOptions>,
    /// Failure handling policy.
    pub on_error: ErrorPolicy,
    /// Only run when some output is needed.
    pub lazy: bool,
    /// Scheduling priority under a parallelism limit. Higher runs first.
    pub priority: i32,
}

impl CallOptions {
    /// Creates default options: no decorators, fail on error, eager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry options.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Sets the fallback value.
    #[must_use]
    pub fn with_fallback(mut self, value: Value) -> Self {
        self.fallback = Some(value);
        self
    }

    /// Enables caching with the given time to live.
    #[must_use]
    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.cache = Some(CacheOptions {
            ttl_ms: duration_ms(ttl),
        });
        self
    }

    /// Enables throttling.
    #[must_use]
    pub fn with_throttle(mut self, count: u32, period: Duration) -> Self {
        self.throttle = Some(ThrottleOptions {
            count,
            period_ms: duration_ms(period),
        });
        self
    }

    /// Enables a per-module concurrency limit.
    #[must_use]
    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.concurrency = Some(ConcurrencyOptions { max_concurrent });
        self
    }

    /// Enables a circuit breaker.
    #[must_use]
    pub fn with_circuit_breaker(mut self, failure_threshold: u32, cooldown: Duration) -> Self {
        self.circuit_breaker = Some(CircuitBreakerOptions {
            failure_threshold,
            cooldown_ms: duration_ms(cooldown),
        });
        self
    }

    /// Sets the error policy.
    #[must_use]
    pub fn with_on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    /// Marks the node lazy.
    #[must_use]
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Sets the scheduling priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
