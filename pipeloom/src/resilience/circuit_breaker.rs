//! Per-module circuit breakers shared across runs.
//!
//! A breaker is closed while calls succeed, opens after `failure_threshold`
//! consecutive failures, and after `cooldown_ms` admits exactly one trial
//! call in the half-open state. The trial's outcome closes or re-opens it.
//!
//! The whole state lives in a single `AtomicU64` and every transition is a
//! compare-and-swap, so concurrent callers always observe a consistent state
//! and at most one trial is ever in flight.

use super::{CallInfo, Decorator, Next};
use crate::errors::ModuleError;
use crate::events::{emit_event, EventSink};
use crate::graph::CircuitBreakerOptions;
use crate::value::Value;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Breaker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// One trial call is allowed.
    HalfOpen,
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// A decoded breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerState {
    /// Current status.
    pub status: CircuitStatus,
    /// Whether a half-open trial call is running.
    pub trial_in_flight: bool,
    /// Consecutive failures while closed.
    pub consecutive_failures: u32,
    /// When the breaker last opened, in ms since the breaker was created.
    pub opened_at_ms: u64,
}

// Bit layout: [0..2) status, [2] trial flag, [3..23) failures, [23..64) opened_at.
const STATUS_MASK: u64 = 0b11;
const TRIAL_BIT: u64 = 1 << 2;
const FAILURE_SHIFT: u32 = 3;
const FAILURE_MASK: u64 = (1 << 20) - 1;
const OPENED_SHIFT: u32 = 23;
const OPENED_MASK: u64 = (1 << 41) - 1;

impl BreakerState {
    const CLOSED: Self = Self {
        status: CircuitStatus::Closed,
        trial_in_flight: false,
        consecutive_failures: 0,
        opened_at_ms: 0,
    };

    fn pack(self) -> u64 {
        let status = match self.status {
            CircuitStatus::Closed => 0,
            CircuitStatus::Open => 1,
            CircuitStatus::HalfOpen => 2,
        };
        let trial = if self.trial_in_flight { TRIAL_BIT } else { 0 };
        let failures = u64::from(self.consecutive_failures).min(FAILURE_MASK) << FAILURE_SHIFT;
        let opened = (self.opened_at_ms & OPENED_MASK) << OPENED_SHIFT;
        status | trial | failures | opened
    }

    fn unpack(raw: u64) -> Self {
        let status = match raw & STATUS_MASK {
            1 => CircuitStatus::Open,
            2 => CircuitStatus::HalfOpen,
            _ => CircuitStatus::Closed,
        };
        Self {
            status,
            trial_in_flight: raw & TRIAL_BIT != 0,
            consecutive_failures: u32::try_from((raw >> FAILURE_SHIFT) & FAILURE_MASK)
                .unwrap_or(u32::MAX),
            opened_at_ms: (raw >> OPENED_SHIFT) & OPENED_MASK,
        }
    }
}

/// The outcome of asking a breaker for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Closed: the call proceeds normally.
    Allowed,
    /// Half-open: this call is the single trial.
    Trial,
    /// Open, or a trial is already running.
    Rejected,
}

/// A circuit breaker for one module.
pub struct CircuitBreaker {
    module: String,
    options: CircuitBreakerOptions,
    state: AtomicU64,
    epoch: Instant,
    events: Arc<dyn EventSink>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(
        module: impl Into<String>,
        options: CircuitBreakerOptions,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            module: module.into(),
            options: CircuitBreakerOptions {
                failure_threshold: options.failure_threshold.max(1),
                ..options
            },
            state: AtomicU64::new(BreakerState::CLOSED.pack()),
            epoch: Instant::now(),
            events,
        }
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> CircuitBreakerOptions {
        self.options
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        BreakerState::unpack(self.state.load(Ordering::SeqCst))
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> CircuitStatus {
        self.state().status
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Applies `f` atomically. Returns the previous and new state when `f`
    /// produced a change.
    fn transition<F>(&self, mut f: F) -> Option<(BreakerState, BreakerState)>
    where
        F: FnMut(BreakerState) -> Option<BreakerState>,
    {
        let mut next = None;
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                next = f(BreakerState::unpack(raw));
                next.map(BreakerState::pack)
            })
            .ok()
            .and_then(|prev| next.map(|n| (BreakerState::unpack(prev), n)))
    }

    /// Asks for admission of a call.
    pub fn try_acquire(&self) -> Admission {
        let now = self.now_ms();
        let cooldown = self.options.cooldown_ms;
        let mut admission = Admission::Rejected;

        let changed = self.transition(|s| match s.status {
            CircuitStatus::Closed => {
                admission = Admission::Allowed;
                None
            }
            CircuitStatus::Open if now.saturating_sub(s.opened_at_ms) >= cooldown => {
                admission = Admission::Trial;
                Some(BreakerState {
                    status: CircuitStatus::HalfOpen,
                    trial_in_flight: true,
                    ..s
                })
            }
            CircuitStatus::HalfOpen if !s.trial_in_flight => {
                admission = Admission::Trial;
                Some(BreakerState {
                    trial_in_flight: true,
                    ..s
                })
            }
            CircuitStatus::Open | CircuitStatus::HalfOpen => {
                admission = Admission::Rejected;
                None
            }
        });

        if let Some((prev, next)) = changed {
            self.announce(prev, next);
        }
        admission
    }

    /// Records a successful call.
    pub fn record_success(&self, trial: bool) {
        let changed = self.transition(|s| {
            if trial {
                Some(BreakerState::CLOSED)
            } else if s.status == CircuitStatus::Closed && s.consecutive_failures > 0 {
                Some(BreakerState {
                    consecutive_failures: 0,
                    ..s
                })
            } else {
                None
            }
        });
        if let Some((prev, next)) = changed {
            self.announce(prev, next);
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self, trial: bool) {
        let now = self.now_ms();
        let threshold = self.options.failure_threshold;

        let changed = self.transition(|s| {
            if trial {
                return Some(BreakerState {
                    status: CircuitStatus::Open,
                    trial_in_flight: false,
                    opened_at_ms: now,
                    ..s
                });
            }
            if s.status != CircuitStatus::Closed {
                return None;
            }
            let failures = s.consecutive_failures.saturating_add(1);
            if failures >= threshold {
                Some(BreakerState {
                    status: CircuitStatus::Open,
                    trial_in_flight: false,
                    consecutive_failures: failures,
                    opened_at_ms: now,
                })
            } else {
                Some(BreakerState {
                    consecutive_failures: failures,
                    ..s
                })
            }
        });
        if let Some((prev, next)) = changed {
            self.announce(prev, next);
        }
    }

    /// Gives the trial slot back without deciding the outcome.
    pub fn release_trial(&self) {
        self.transition(|s| {
            (s.status == CircuitStatus::HalfOpen && s.trial_in_flight).then_some(BreakerState {
                trial_in_flight: false,
                ..s
            })
        });
    }

    /// Forces the breaker closed.
    pub fn reset(&self) {
        let prev = BreakerState::unpack(
            self.state
                .swap(BreakerState::CLOSED.pack(), Ordering::SeqCst),
        );
        self.announce(prev, BreakerState::CLOSED);
    }

    fn announce(&self, prev: BreakerState, next: BreakerState) {
        if prev.status == next.status {
            return;
        }
        let event = match next.status {
            CircuitStatus::Open => {
                warn!(
                    module = %self.module,
                    failures = next.consecutive_failures,
                    "Circuit opened"
                );
                "circuit.opened"
            }
            CircuitStatus::HalfOpen => {
                info!(module = %self.module, "Circuit half-open, admitting trial call");
                "circuit.half_open"
            }
            CircuitStatus::Closed => {
                info!(module = %self.module, "Circuit closed");
                "circuit.closed"
            }
        };
        emit_event(
            self.events.as_ref(),
            event,
            serde_json::json!({
                "module": self.module,
                "from": prev.status,
                "to": next.status,
            }),
        );
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("module", &self.module)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

/// Process-wide registry of circuit breakers keyed by module name.
///
/// The first configuration registered for a module wins.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the breaker for a module, creating it if needed.
    pub fn get_or_create(
        &self,
        module: &str,
        options: CircuitBreakerOptions,
        events: &Arc<dyn EventSink>,
    ) -> Arc<CircuitBreaker> {
        let breaker = self
            .breakers
            .entry(module.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(module, options, Arc::clone(events))))
            .clone();

        let existing = breaker.options();
        if existing.cooldown_ms != options.cooldown_ms
            || existing.failure_threshold != options.failure_threshold.max(1)
        {
            warn!(
                module = %module,
                existing = ?existing,
                requested = ?options,
                "Circuit breaker already registered with a different configuration; keeping the first"
            );
        }
        breaker
    }

    /// Returns the breaker for a module, if one exists.
    #[must_use]
    pub fn get(&self, module: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(module).map(|b| Arc::clone(&b))
    }

    /// Returns the status of a module's breaker, if one exists.
    #[must_use]
    pub fn status(&self, module: &str) -> Option<CircuitStatus> {
        self.breakers.get(module).map(|b| b.status())
    }

    /// Forces a module's breaker closed. Returns false if none exists.
    pub fn reset(&self, module: &str) -> bool {
        match self.get(module) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}

/// Gives back an unresolved trial slot when the call is dropped mid-flight.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_trial();
        }
    }
}

/// Rejects calls while the module's circuit is open.
pub struct CircuitBreakerDecorator {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerDecorator {
    /// Creates a circuit breaker decorator.
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

#[async_trait]
impl Decorator for CircuitBreakerDecorator {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    async fn call(
        &self,
        info: &CallInfo,
        input: Value,
        next: Next<'_>,
    ) -> Result<Value, ModuleError> {
        let trial = match self.breaker.try_acquire() {
            Admission::Allowed => false,
            Admission::Trial => true,
            Admission::Rejected => return Err(ModuleError::circuit_open(&info.module)),
        };

        let mut guard = TrialGuard {
            breaker: &self.breaker,
            armed: trial,
        };
        let result = next.run(input).await;
        guard.armed = false;

        match &result {
            Ok(_) => self.breaker.record_success(trial),
            Err(e) if e.counts_as_failure() => self.breaker.record_failure(trial),
            Err(_) if trial => self.breaker.release_trial(),
            Err(_) => {}
        }
        result
    }
}
