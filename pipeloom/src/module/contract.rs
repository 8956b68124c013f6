//! The module contract and closure-backed implementations.

use crate::errors::ModuleError;
use crate::graph::CallOptions;
use crate::value::{Type, Value};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

/// An executable unit of work.
///
/// A module receives a record of its input fields and returns a value. Errors
/// are reported as [`ModuleError`]; the runtime fills in the module name if an
/// implementation leaves it empty.
#[async_trait]
pub trait Module: Send + Sync + fmt::Debug {
    /// Returns the module name that graph nodes refer to.
    fn name(&self) -> &str;

    /// Executes the module.
    async fn execute(&self, input: Value) -> Result<Value, ModuleError>;
}

/// The declared interface of a module: its name, types and default options.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDeclaration {
    /// Module name.
    pub name: String,
    /// Type of the input record.
    pub input: Type,
    /// Type of the result.
    pub output: Type,
    /// Options applied by default to nodes invoking this module.
    pub options: CallOptions,
}

impl ModuleDeclaration {
    /// Creates a declaration with default options.
    #[must_use]
    pub fn new(name: impl Into<String>, input: Type, output: Type) -> Self {
        Self {
            name: name.into(),
            input,
            output,
            options: CallOptions::default(),
        }
    }

    /// Sets the default options.
    #[must_use]
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }
}

/// A module backed by a synchronous closure.
pub struct FnModule<F> {
    name: String,
    func: F,
}

impl<F> FnModule<F>
where
    F: Fn(Value) -> Result<Value, ModuleError> + Send + Sync,
{
    /// Creates a new closure module.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> fmt::Debug for FnModule<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnModule").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Module for FnModule<F>
where
    F: Fn(Value) -> Result<Value, ModuleError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value) -> Result<Value, ModuleError> {
        (self.func)(input)
    }
}

/// A module backed by an async closure.
pub struct AsyncFnModule<F, Fut> {
    name: String,
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnModule<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ModuleError>> + Send,
{
    /// Creates a new async closure module.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _marker: PhantomData,
        }
    }
}

impl<F, Fut> fmt::Debug for AsyncFnModule<F, Fut> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFnModule")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> Module for AsyncFnModule<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ModuleError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value) -> Result<Value, ModuleError> {
        (self.func)(input).await
    }
}
