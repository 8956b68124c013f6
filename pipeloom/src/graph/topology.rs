//! The validated pipeline graph.

use super::{DataNode, ModuleNode, NodeId};
use crate::errors::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// The serializable description of a graph, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    /// Pipeline name.
    pub name: String,
    /// Pipeline version. Snapshots only resume against the same version.
    pub version: String,
    /// Data nodes.
    pub data: Vec<DataNode>,
    /// Module nodes.
    pub modules: Vec<ModuleNode>,
    /// Data nodes exposed as pipeline outputs.
    pub outputs: Vec<NodeId>,
}

/// A validated, immutable pipeline graph.
///
/// Construction guarantees that every edge references an existing data node,
/// every data node has at most one producer, every producer-less data node is
/// a named input, and the module dependency graph is acyclic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GraphDef", into = "GraphDef")]
pub struct Graph {
    def: GraphDef,
    data_index: HashMap<NodeId, usize>,
    module_index: HashMap<NodeId, usize>,
    producers: HashMap<NodeId, NodeId>,
    consumers: HashMap<NodeId, Vec<NodeId>>,
    dependencies: HashMap<NodeId, Vec<NodeId>>,
    order: Vec<NodeId>,
    inputs: BTreeMap<String, NodeId>,
    outputs: BTreeMap<String, NodeId>,
}

impl Graph {
    /// Validates a definition and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] describing the first structural problem found.
    pub fn compile(def: GraphDef) -> Result<Self, GraphError> {
        let mut seen = HashSet::new();
        for id in def.data.iter().map(|d| &d.id).chain(def.modules.iter().map(|m| &m.id)) {
            if !seen.insert(id.clone()) {
                return Err(GraphError::DuplicateNode(id.clone()));
            }
        }

        let data_index: HashMap<NodeId, usize> = def
            .data
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
        let module_index: HashMap<NodeId, usize> = def
            .modules
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), i))
            .collect();

        let mut writers: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut consumers: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for module in &def.modules {
            for node in module.sources().chain(module.targets()) {
                if !data_index.contains_key(node) {
                    return Err(GraphError::UnknownNode {
                        referenced_by: module.id.to_string(),
                        node: node.clone(),
                    });
                }
            }
            for source in module.sources() {
                let entry = consumers.entry(source.clone()).or_default();
                if !entry.contains(&module.id) {
                    entry.push(module.id.clone());
                }
            }
            for target in module.targets() {
                writers
                    .entry(target.clone())
                    .or_default()
                    .push(module.id.clone());
            }
        }

        let mut producers = HashMap::new();
        for data in &def.data {
            match writers.remove(&data.id) {
                Some(list) if list.len() > 1 => {
                    return Err(GraphError::MultipleProducers {
                        node: data.id.clone(),
                        producers: list,
                    });
                }
                Some(mut list) => {
                    if let Some(producer) = list.pop() {
                        producers.insert(data.id.clone(), producer);
                    }
                }
                None => {}
            }
        }

        let mut inputs = BTreeMap::new();
        for data in def.data.iter().filter(|d| !producers.contains_key(&d.id)) {
            let name = data
                .name
                .clone()
                .ok_or_else(|| GraphError::UnnamedInput(data.id.clone()))?;
            if inputs.insert(name.clone(), data.id.clone()).is_some() {
                return Err(GraphError::DuplicateName { kind: "input", name });
            }
        }

        let mut outputs = BTreeMap::new();
        for id in &def.outputs {
            let data = data_index
                .get(id)
                .map(|&i| &def.data[i])
                .ok_or_else(|| GraphError::UnknownNode {
                    referenced_by: "outputs".to_string(),
                    node: id.clone(),
                })?;
            let name = data
                .name
                .clone()
                .ok_or_else(|| GraphError::UnnamedOutput(id.clone()))?;
            if outputs.insert(name.clone(), id.clone()).is_some() {
                return Err(GraphError::DuplicateName { kind: "output", name });
            }
        }

        let dependencies: HashMap<NodeId, Vec<NodeId>> = def
            .modules
            .iter()
            .map(|m| {
                let mut deps: Vec<NodeId> = Vec::new();
                for producer in m.sources().filter_map(|s| producers.get(s)) {
                    if !deps.contains(producer) {
                        deps.push(producer.clone());
                    }
                }
                (m.id.clone(), deps)
            })
            .collect();

        let mut graph = Self {
            def,
            data_index,
            module_index,
            producers,
            consumers,
            dependencies,
            order: Vec::new(),
            inputs,
            outputs,
        };
        graph.detect_cycles()?;
        graph.order = graph.topological_sort();
        Ok(graph)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Returns the pipeline version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.def.version
    }

    /// Returns `name@version`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}@{}", self.def.name, self.def.version)
    }

    /// Returns a data node by id.
    #[must_use]
    pub fn data_node(&self, id: &NodeId) -> Option<&DataNode> {
        self.data_index.get(id).map(|&i| &self.def.data[i])
    }

    /// Returns a module node by id.
    #[must_use]
    pub fn module_node(&self, id: &NodeId) -> Option<&ModuleNode> {
        self.module_index.get(id).map(|&i| &self.def.modules[i])
    }

    /// Iterates over all data nodes in definition order.
    pub fn data_nodes(&self) -> impl Iterator<Item = &DataNode> {
        self.def.data.iter()
    }

    /// Iterates over module nodes in topological order.
    pub fn module_nodes(&self) -> impl Iterator<Item = &ModuleNode> {
        self.order.iter().filter_map(|id| self.module_node(id))
    }

    /// Module ids in topological order.
    #[must_use]
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Returns the module producing a data node, if any.
    #[must_use]
    pub fn producer_of(&self, data: &NodeId) -> Option<&NodeId> {
        self.producers.get(data)
    }

    /// Returns the modules reading a data node.
    #[must_use]
    pub fn consumers_of(&self, data: &NodeId) -> &[NodeId] {
        self.consumers.get(data).map_or(&[], Vec::as_slice)
    }

    /// Returns the modules a module depends on.
    #[must_use]
    pub fn dependencies_of(&self, module: &NodeId) -> &[NodeId] {
        self.dependencies.get(module).map_or(&[], Vec::as_slice)
    }

    /// Returns true if the data node is a pipeline input.
    #[must_use]
    pub fn is_input(&self, data: &NodeId) -> bool {
        self.data_index.contains_key(data) && !self.producers.contains_key(data)
    }

    /// Resolves an input name to its data node.
    #[must_use]
    pub fn input_id(&self, name: &str) -> Option<&NodeId> {
        self.inputs.get(name)
    }

    /// Resolves an output name to its data node.
    #[must_use]
    pub fn output_id(&self, name: &str) -> Option<&NodeId> {
        self.outputs.get(name)
    }

    /// Input names and data nodes.
    #[must_use]
    pub fn inputs(&self) -> &BTreeMap<String, NodeId> {
        &self.inputs
    }

    /// Output names and data nodes.
    #[must_use]
    pub fn outputs(&self) -> &BTreeMap<String, NodeId> {
        &self.outputs
    }

    /// Returns the input name of a data node, if it is an input.
    #[must_use]
    pub fn input_name(&self, data: &NodeId) -> Option<&str> {
        if self.is_input(data) {
            self.data_node(data).and_then(|d| d.name.as_deref())
        } else {
            None
        }
    }

    /// Returns the underlying definition.
    #[must_use]
    pub fn def(&self) -> &GraphDef {
        &self.def
    }

    fn detect_cycles(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for module in &self.def.modules {
            if !visited.contains(&module.id) {
                if let Some(cycle) =
                    self.dfs_cycle(&module.id, &mut visited, &mut rec_stack, &mut path)
                {
                    return Err(GraphError::Cycle { path: cycle });
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &NodeId,
        visited: &mut HashSet<NodeId>,
        rec_stack: &mut HashSet<NodeId>,
        path: &mut Vec<NodeId>,
    ) -> Option<Vec<NodeId>> {
        visited.insert(node.clone());
        rec_stack.insert(node.clone());
        path.push(node.clone());

        for dep in self.dependencies_of(node) {
            if !visited.contains(dep) {
                if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                let cycle_start = path.iter().position(|n| n == dep).unwrap_or(0);
                let mut cycle: Vec<NodeId> = path[cycle_start..].to_vec();
                cycle.push(dep.clone());
                return Some(cycle);
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }

    fn topological_sort(&self) -> Vec<NodeId> {
        fn visit(
            graph: &Graph,
            id: &NodeId,
            visited: &mut HashSet<NodeId>,
            order: &mut Vec<NodeId>,
        ) {
            if !visited.insert(id.clone()) {
                return;
            }
            for dep in graph.dependencies_of(id) {
                visit(graph, dep, visited, order);
            }
            order.push(id.clone());
        }

        let mut visited = HashSet::new();
        let mut order = Vec::with_capacity(self.def.modules.len());
        for module in &self.def.modules {
            visit(self, &module.id, &mut visited, &mut order);
        }
        order
    }
}

impl TryFrom<GraphDef> for Graph {
    type Error = GraphError;

    fn try_from(def: GraphDef) -> Result<Self, Self::Error> {
        Self::compile(def)
    }
}

impl From<Graph> for GraphDef {
    fn from(graph: Graph) -> Self {
        graph.def
    }
}
