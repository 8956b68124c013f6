//! Decorator chain around a module call.

use crate::errors::ModuleError;
use crate::graph::NodeId;
use crate::module::Module;
use crate::value::Value;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifies the call flowing through a chain.
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// Run the call belongs to.
    pub run_id: Uuid,
    /// Module node being executed.
    pub node: NodeId,
    /// Module name.
    pub module: String,
}

impl CallInfo {
    /// Creates call info.
    #[must_use]
    pub fn new(run_id: Uuid, node: NodeId, module: impl Into<String>) -> Self {
        Self {
            run_id,
            node,
            module: module.into(),
        }
    }
}

/// One layer of the resilience chain.
///
/// A decorator receives the call and a [`Next`] handle for the rest of the
/// chain. It may invoke `next` zero, one or several times.
#[async_trait]
pub trait Decorator: Send + Sync {
    /// Short name used in logs and introspection.
    fn name(&self) -> &'static str;

    /// Handles the call.
    async fn call(
        &self,
        info: &CallInfo,
        input: Value,
        next: Next<'_>,
    ) -> Result<Value, ModuleError>;
}

/// The remainder of a chain: inner decorators followed by the module.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    info: &'a CallInfo,
    rest: &'a [Arc<dyn Decorator>],
    module: &'a dyn Module,
}

impl<'a> Next<'a> {
    /// Invokes the rest of the chain.
    pub async fn run(self, input: Value) -> Result<Value, ModuleError> {
        match self.rest.split_first() {
            Some((decorator, rest)) => {
                let next = Next {
                    info: self.info,
                    rest,
                    module: self.module,
                };
                decorator.call(self.info, input, next).await
            }
            None => self
                .module
                .execute(input)
                .await
                .map_err(|e| e.with_module(&self.info.module)),
        }
    }
}

/// A module wrapped in an ordered list of decorators, outermost first.
#[derive(Clone)]
pub struct ResilienceChain {
    module: Arc<dyn Module>,
    decorators: Vec<Arc<dyn Decorator>>,
}

impl ResilienceChain {
    /// Creates a chain with no decorators.
    #[must_use]
    pub fn new(module: Arc<dyn Module>) -> Self {
        Self {
            module,
            decorators: Vec::new(),
        }
    }

    /// Appends a decorator inside those already present.
    #[must_use]
    pub fn with(mut self, decorator: Arc<dyn Decorator>) -> Self {
        self.decorators.push(decorator);
        self
    }

    /// Returns the wrapped module.
    #[must_use]
    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    /// Returns decorator names, outermost first.
    #[must_use]
    pub fn decorator_names(&self) -> Vec<&'static str> {
        self.decorators.iter().map(|d| d.name()).collect()
    }

    /// Invokes the chain.
    pub async fn invoke(&self, info: &CallInfo, input: Value) -> Result<Value, ModuleError> {
        Next {
            info,
            rest: &self.decorators,
            module: self.module.as_ref(),
        }
        .run(input)
        .await
    }
}

impl fmt::Debug for ResilienceChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceChain")
            .field("module", &self.module.name())
            .field("decorators", &self.decorator_names())
            .finish()
    }
}
