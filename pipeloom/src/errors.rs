//! Error types for the pipeloom runtime.
//!
//! Module calls fail with [`ModuleError`], which is what flows through the
//! resilience chain. Invariant violations on a run's execution context surface
//! as [`ContextError`], structural graph problems as [`GraphError`], and every
//! error the caller sees at the API boundary is a [`PipeloomError`].

use crate::graph::NodeId;
use crate::suspension::SnapshotId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for pipeloom operations.
#[derive(Debug, Error)]
pub enum PipeloomError {
    /// The graph handed to the runtime is malformed.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// A module node references a module with no bound implementation.
    #[error("Module '{module}' is referenced by node '{node}' but has no binding")]
    Binding {
        /// The module name.
        module: String,
        /// The module node that referenced it.
        node: NodeId,
    },

    /// An execution context invariant was violated.
    #[error("{0}")]
    Context(#[from] ContextError),

    /// The suspension store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The run was aborted before it reached a terminal state.
    #[error("Pipeline aborted: {0}")]
    Aborted(String),

    /// A snapshot was resumed against a different pipeline version.
    #[error("Snapshot '{snapshot}' belongs to pipeline '{expected}', not '{actual}'")]
    VersionMismatch {
        /// The snapshot being resumed.
        snapshot: SnapshotId,
        /// `name@version` recorded in the snapshot.
        expected: String,
        /// `name@version` of the pipeline asked to resume it.
        actual: String,
    },

    /// An input name that the pipeline does not declare.
    #[error("Unknown pipeline input: {0}")]
    UnknownInput(String),

    /// An output name that the pipeline does not declare.
    #[error("Unknown pipeline output: {0}")]
    UnknownOutput(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for PipeloomError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Coarse classification of a module failure, used in user-visible reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Input or output did not match the declared type.
    Validation,
    /// The module implementation raised an error.
    Execution,
    /// The call exceeded its time budget.
    Timeout,
    /// The module's circuit breaker rejected the call.
    CircuitOpen,
    /// An upstream node was skipped, so an input never arrived.
    UnreachableInput,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Execution => write!(f, "execution"),
            Self::Timeout => write!(f, "timeout"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::UnreachableInput => write!(f, "unreachable_input"),
        }
    }
}

/// An error produced by a single module call.
///
/// Every variant carries the module name so that failures reported to the
/// caller always identify the module.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum ModuleError {
    /// Input or output did not match the declared type. Never retried.
    #[error("Validation error in module '{module}': {message}")]
    Validation {
        /// The module name.
        module: String,
        /// What did not match.
        message: String,
    },

    /// The module implementation failed.
    #[error("Module '{module}' failed: {message}")]
    Execution {
        /// The module name.
        module: String,
        /// The underlying message.
        message: String,
        /// Whether a retry may succeed.
        transient: bool,
    },

    /// The call exceeded its timeout.
    #[error("Module '{module}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The module name.
        module: String,
        /// The budget that was exceeded.
        timeout_ms: u64,
    },

    /// The circuit breaker for this module is open.
    #[error("Circuit breaker for module '{module}' is open")]
    CircuitOpen {
        /// The module name.
        module: String,
    },

    /// An input data node was marked unreachable by a skipped producer.
    #[error("Module '{module}' cannot run: input '{node}' is unreachable")]
    UnreachableInput {
        /// The module name.
        module: String,
        /// The unreachable data node.
        node: NodeId,
    },
}

impl ModuleError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Creates a transient execution error (eligible for retry).
    #[must_use]
    pub fn execution(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            module: module.into(),
            message: message.into(),
            transient: true,
        }
    }

    /// Creates a permanent execution error (never retried).
    #[must_use]
    pub fn permanent(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            module: module.into(),
            message: message.into(),
            transient: false,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(module: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            module: module.into(),
            timeout_ms,
        }
    }

    /// Creates a circuit-open error.
    #[must_use]
    pub fn circuit_open(module: impl Into<String>) -> Self {
        Self::CircuitOpen {
            module: module.into(),
        }
    }

    /// Creates an unreachable-input error.
    #[must_use]
    pub fn unreachable_input(module: impl Into<String>, node: NodeId) -> Self {
        Self::UnreachableInput {
            module: module.into(),
            node,
        }
    }

    /// Returns the module name.
    #[must_use]
    pub fn module(&self) -> &str {
        match self {
            Self::Validation { module, .. }
            | Self::Execution { module, .. }
            | Self::Timeout { module, .. }
            | Self::CircuitOpen { module }
            | Self::UnreachableInput { module, .. } => module,
        }
    }

    /// Fills in the module name when the implementation left it empty.
    #[must_use]
    pub fn with_module(mut self, name: &str) -> Self {
        let slot = match &mut self {
            Self::Validation { module, .. }
            | Self::Execution { module, .. }
            | Self::Timeout { module, .. }
            | Self::CircuitOpen { module }
            | Self::UnreachableInput { module, .. } => module,
        };
        if slot.is_empty() {
            *slot = name.to_string();
        }
        self
    }

    /// Returns the error class.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation { .. } => ErrorClass::Validation,
            Self::Execution { .. } => ErrorClass::Execution,
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::CircuitOpen { .. } => ErrorClass::CircuitOpen,
            Self::UnreachableInput { .. } => ErrorClass::UnreachableInput,
        }
    }

    /// Returns true if a retry decorator may re-invoke the call.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Execution { transient: true, .. }
        )
    }

    /// Returns true if the error reflects the module's health.
    ///
    /// Validation errors describe the payload, not the module, and do not
    /// count towards tripping a circuit breaker.
    #[must_use]
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, Self::Execution { .. } | Self::Timeout { .. })
    }
}

/// A failure attributed to one module node of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    /// The failing module node.
    pub node: NodeId,
    /// The module the node invokes.
    pub module: String,
    /// The error that escaped the resilience chain.
    pub error: ModuleError,
}

impl NodeFailure {
    /// Creates a new node failure.
    #[must_use]
    pub fn new(node: NodeId, module: impl Into<String>, error: ModuleError) -> Self {
        Self {
            node,
            module: module.into(),
            error,
        }
    }

    /// Returns the error class.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        self.error.class()
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("node".to_string(), serde_json::json!(self.node.as_str()));
        map.insert("module".to_string(), serde_json::json!(self.module));
        map.insert("class".to_string(), serde_json::json!(self.class().to_string()));
        map.insert("message".to_string(), serde_json::json!(self.error.to_string()));
        map
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node '{}' (module '{}') failed with {}: {}",
            self.node,
            self.module,
            self.class(),
            self.error
        )
    }
}

/// Errors raised by the per-run execution context.
///
/// These indicate a scheduler or graph bug and are always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// A data node was written twice.
    #[error("Data node '{node}' was already written")]
    DoubleWrite {
        /// The data node.
        node: NodeId,
    },

    /// The run was aborted while waiting on a data node.
    #[error("Run aborted while waiting on '{node}': {reason}")]
    Aborted {
        /// The data node being awaited.
        node: NodeId,
        /// The abort reason.
        reason: String,
    },

    /// The data node's producer was skipped.
    #[error("Data node '{node}' is unreachable: {reason}")]
    Unreachable {
        /// The data node.
        node: NodeId,
        /// Why it will never be written.
        reason: String,
    },

    /// The data node does not exist in this run's graph.
    #[error("Unknown data node '{node}'")]
    UnknownNode {
        /// The data node.
        node: NodeId,
    },
}

/// Errors raised by the graph builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two nodes share an id.
    #[error("Duplicate node id '{0}'")]
    DuplicateNode(NodeId),

    /// An edge or output references a node that does not exist.
    #[error("'{referenced_by}' references unknown data node '{node}'")]
    UnknownNode {
        /// The node or list holding the reference.
        referenced_by: String,
        /// The missing node.
        node: NodeId,
    },

    /// A data node has more than one producing module.
    #[error("Data node '{node}' has multiple producers: {}", producers.iter().map(NodeId::as_str).collect::<Vec<_>>().join(", "))]
    MultipleProducers {
        /// The data node.
        node: NodeId,
        /// The module nodes writing it.
        producers: Vec<NodeId>,
    },

    /// A data node with no producer has no name, so callers cannot supply it.
    #[error("Data node '{0}' has no producer and no input name")]
    UnnamedInput(NodeId),

    /// A pipeline output has no name.
    #[error("Output data node '{0}' has no name")]
    UnnamedOutput(NodeId),

    /// Two inputs or two outputs share a name.
    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName {
        /// `"input"` or `"output"`.
        kind: &'static str,
        /// The repeated name.
        name: String,
    },

    /// The module dependency graph contains a cycle.
    #[error("Cycle detected in pipeline: {}", path.iter().map(NodeId::as_str).collect::<Vec<_>>().join(" -> "))]
    Cycle {
        /// The module nodes forming the cycle, first node repeated at the end.
        path: Vec<NodeId>,
    },
}

/// Errors raised by a suspension store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No snapshot with the given id.
    #[error("Snapshot '{0}' not found")]
    NotFound(SnapshotId),

    /// The backend failed.
    #[error("Suspension store error: {0}")]
    Backend(String),
}
