//! Mock modules for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::ModuleError;
use crate::module::Module;
use crate::value::Value;

/// A module that returns an incrementing counter, starting at 1.
#[derive(Debug)]
pub struct CountingModule {
    name: String,
    call_count: Mutex<usize>,
}

impl CountingModule {
    /// Creates a new counting module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            call_count: Mutex::new(0),
        }
    }

    /// Returns the number of times the module executed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl Module for CountingModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: Value) -> Result<Value, ModuleError> {
        let mut count = self.call_count.lock();
        *count += 1;
        Ok(Value::Int(i64::try_from(*count).unwrap_or(i64::MAX)))
    }
}

/// A module that always fails.
#[derive(Debug)]
pub struct FailingModule {
    name: String,
    error: String,
    transient: bool,
    call_count: Mutex<usize>,
}

impl FailingModule {
    /// Creates a module failing with a transient error.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            transient: true,
            call_count: Mutex::new(0),
        }
    }

    /// Creates a module failing with a permanent error.
    #[must_use]
    pub fn permanent(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            transient: false,
            ..Self::new(name, error)
        }
    }

    /// Returns the number of times the module executed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl Module for FailingModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: Value) -> Result<Value, ModuleError> {
        *self.call_count.lock() += 1;
        if self.transient {
            Err(ModuleError::execution(&self.name, &self.error))
        } else {
            Err(ModuleError::permanent(&self.name, &self.error))
        }
    }
}

/// A module that fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyModule {
    name: String,
    failures: usize,
    output: Value,
    call_count: Mutex<usize>,
}

impl FlakyModule {
    /// Creates a module that fails `failures` times before returning `output`.
    #[must_use]
    pub fn new(name: impl Into<String>, failures: usize, output: Value) -> Self {
        Self {
            name: name.into(),
            failures,
            output,
            call_count: Mutex::new(0),
        }
    }

    /// Returns the number of times the module executed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl Module for FlakyModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: Value) -> Result<Value, ModuleError> {
        let attempt = {
            let mut count = self.call_count.lock();
            *count += 1;
            *count
        };
        if attempt <= self.failures {
            Err(ModuleError::execution(
                &self.name,
                format!("transient failure {attempt}"),
            ))
        } else {
            Ok(self.output.clone())
        }
    }
}

/// A module that sleeps before returning a fixed value.
#[derive(Debug)]
pub struct SlowModule {
    name: String,
    delay: Duration,
    output: Value,
    started: Mutex<usize>,
    completed: Mutex<usize>,
}

impl SlowModule {
    /// Creates a slow module.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration, output: Value) -> Self {
        Self {
            name: name.into(),
            delay,
            output,
            started: Mutex::new(0),
            completed: Mutex::new(0),
        }
    }

    /// Returns how many calls started.
    #[must_use]
    pub fn started(&self) -> usize {
        *self.started.lock()
    }

    /// Returns how many calls ran to completion.
    #[must_use]
    pub fn completed(&self) -> usize {
        *self.completed.lock()
    }
}

#[async_trait]
impl Module for SlowModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: Value) -> Result<Value, ModuleError> {
        *self.started.lock() += 1;
        tokio::time::sleep(self.delay).await;
        *self.completed.lock() += 1;
        Ok(self.output.clone())
    }
}

/// A module that measures how many of its calls overlap.
#[derive(Debug)]
pub struct GaugeModule {
    name: String,
    delay: Duration,
    state: Mutex<(usize, usize)>,
}

impl GaugeModule {
    /// Creates a gauge module that holds each call for `delay`.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            state: Mutex::new((0, 0)),
        }
    }

    /// Returns the highest number of simultaneous calls observed.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().1
    }

    /// Returns the number of calls currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().0
    }
}

struct GaugeGuard<'a>(&'a Mutex<(usize, usize)>);

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().0 -= 1;
    }
}

#[async_trait]
impl Module for GaugeModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value) -> Result<Value, ModuleError> {
        {
            let mut state = self.state.lock();
            state.0 += 1;
            state.1 = state.1.max(state.0);
        }
        let _guard = GaugeGuard(&self.state);
        tokio::time::sleep(self.delay).await;
        Ok(input)
    }
}

/// A module that appends a label to a shared log each time it starts.
#[derive(Debug)]
pub struct RecordingModule {
    name: String,
    label: String,
    delay: Duration,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingModule {
    /// Creates a recording module.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        delay: Duration,
        log: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            delay,
            log,
        }
    }
}

#[async_trait]
impl Module for RecordingModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: Value) -> Result<Value, ModuleError> {
        self.log.lock().push(self.label.clone());
        tokio::time::sleep(self.delay).await;
        Ok(Value::from(self.label.as_str()))
    }
}
