//! Fluent construction of pipeline graphs.

use super::{DataNode, Graph, GraphDef, ModuleNode, NodeId};
use crate::errors::GraphError;
use crate::value::Type;

/// Builder for [`Graph`].
///
/// Inputs and outputs use their name as data node id. Validation happens in
/// [`GraphBuilder::build`].
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    def: GraphDef,
}

impl GraphBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            def: GraphDef {
                name: name.into(),
                version: version.into(),
                data: Vec::new(),
                modules: Vec::new(),
                outputs: Vec::new(),
            },
        }
    }

    /// Declares a pipeline input.
    #[must_use]
    pub fn input(mut self, name: &str, ty: Type) -> Self {
        self.def.data.push(DataNode::named(name, name, ty));
        self
    }

    /// Declares a pipeline output.
    #[must_use]
    pub fn output(mut self, name: &str, ty: Type) -> Self {
        self.def.data.push(DataNode::named(name, name, ty));
        self.def.outputs.push(NodeId::from(name));
        self
    }

    /// Declares an intermediate data node.
    #[must_use]
    pub fn data(mut self, id: &str, ty: Type) -> Self {
        self.def.data.push(DataNode::new(id, ty));
        self
    }

    /// Adds an arbitrary data node.
    #[must_use]
    pub fn data_node(mut self, node: DataNode) -> Self {
        self.def.data.push(node);
        self
    }

    /// Exposes an existing named data node as an output.
    #[must_use]
    pub fn expose(mut self, id: impl Into<NodeId>) -> Self {
        self.def.outputs.push(id.into());
        self
    }

    /// Adds a module node.
    #[must_use]
    pub fn module(mut self, node: ModuleNode) -> Self {
        self.def.modules.push(node);
        self
    }

    /// Validates and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] if the graph is malformed.
    pub fn build(self) -> Result<Graph, GraphError> {
        Graph::compile(self.def)
    }
}
