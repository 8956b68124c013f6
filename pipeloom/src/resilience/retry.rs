//! Retry decorator with configurable backoff and jitter strategies.
//!
//! Re-invokes the inner chain on retryable failures (transient execution
//! errors and timeouts) until the attempt ceiling is reached.

use super::{CallInfo, Decorator, Next};
use crate::errors::ModuleError;
use crate::events::{emit_event, EventSink};
use crate::value::Value;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Maximum attempts, including the initial one.
    pub max_attempts: u32,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
        }
    }
}

impl RetryOptions {
    /// Creates retry options with the given attempt ceiling.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }
}

/// State tracking for one retried call.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Retries performed so far.
    pub attempt: u32,
    /// Previous delay, for decorrelated jitter.
    previous_delay: Option<u64>,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculates the delay before the next retry and advances the state.
    pub fn next_delay(&mut self, options: &RetryOptions) -> Duration {
        let base = options.base_delay_ms;
        let max = options.max_delay_ms;
        let attempt = self.attempt;
        self.attempt += 1;

        let delay = match options.backoff {
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(attempt)).min(max)
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt) + 1).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match options.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let prev = self.previous_delay.unwrap_or(base);
                let upper = prev.saturating_mul(3).min(max);
                let next = if upper <= base {
                    base
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                };
                self.previous_delay = Some(next);
                next
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Retries retryable failures of the inner chain.
pub struct RetryDecorator {
    options: RetryOptions,
    events: Arc<dyn EventSink>,
}

impl RetryDecorator {
    /// Creates a retry decorator.
    #[must_use]
    pub fn new(options: RetryOptions, events: Arc<dyn EventSink>) -> Self {
        Self { options, events }
    }
}

#[async_trait]
impl Decorator for RetryDecorator {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn call(
        &self,
        info: &CallInfo,
        input: Value,
        next: Next<'_>,
    ) -> Result<Value, ModuleError> {
        let max_attempts = self.options.max_attempts.max(1);
        let mut state = RetryState::new();
        let mut attempt = 1;

        loop {
            match next.run(input.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = state.next_delay(&self.options);
                    debug!(
                        module = %info.module,
                        node = %info.node,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying after error"
                    );
                    emit_event(
                        self.events.as_ref(),
                        "module.retry",
                        serde_json::json!({
                            "run_id": info.run_id.to_string(),
                            "node": info.node.as_str(),
                            "module": info.module,
                            "attempt": attempt,
                            "error": e.to_string(),
                        }),
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
