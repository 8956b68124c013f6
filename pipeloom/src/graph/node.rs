//! Node and edge types of a pipeline graph.

use super::CallOptions;
use crate::value::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a data node or module node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single-assignment value slot in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataNode {
    /// Unique id.
    pub id: NodeId,
    /// Pipeline input or output name, if this node is one.
    pub name: Option<String>,
    /// Declared type.
    pub ty: Type,
}

impl DataNode {
    /// Creates an unnamed intermediate data node.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, ty: Type) -> Self {
        Self {
            id: id.into(),
            name: None,
            ty,
        }
    }

    /// Creates a named data node.
    #[must_use]
    pub fn named(id: impl Into<NodeId>, name: impl Into<String>, ty: Type) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            ty,
        }
    }
}

/// Binds one field of a module's input record to a data node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEdge {
    /// Field of the input record.
    pub field: String,
    /// Data node supplying it.
    pub source: NodeId,
}

/// Routes a module's result, or one field of it, to a data node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEdge {
    /// Field of the result record, or `None` for the whole result.
    pub field: Option<String>,
    /// Data node receiving it.
    pub target: NodeId,
}

/// An invocation of a named module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleNode {
    /// Unique id.
    pub id: NodeId,
    /// Name of the module to invoke.
    pub module: String,
    /// Input edges.
    pub inputs: Vec<InputEdge>,
    /// Output edges.
    pub outputs: Vec<OutputEdge>,
    /// Call options.
    #[serde(default)]
    pub options: CallOptions,
}

impl ModuleNode {
    /// Creates a module node with no edges.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, module: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            module: module.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            options: CallOptions::default(),
        }
    }

    /// Binds an input field to a data node.
    #[must_use]
    pub fn input(mut self, field: impl Into<String>, source: impl Into<NodeId>) -> Self {
        self.inputs.push(InputEdge {
            field: field.into(),
            source: source.into(),
        });
        self
    }

    /// Writes the whole result to a data node.
    #[must_use]
    pub fn output(mut self, target: impl Into<NodeId>) -> Self {
        self.outputs.push(OutputEdge {
            field: None,
            target: target.into(),
        });
        self
    }

    /// Writes one field of the result to a data node.
    #[must_use]
    pub fn output_field(mut self, field: impl Into<String>, target: impl Into<NodeId>) -> Self {
        self.outputs.push(OutputEdge {
            field: Some(field.into()),
            target: target.into(),
        });
        self
    }

    /// Sets the call options.
    #[must_use]
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// Iterates over the data nodes this module reads.
    pub fn sources(&self) -> impl Iterator<Item = &NodeId> {
        self.inputs.iter().map(|e| &e.source)
    }

    /// Iterates over the data nodes this module writes.
    pub fn targets(&self) -> impl Iterator<Item = &NodeId> {
        self.outputs.iter().map(|e| &e.target)
    }
}
