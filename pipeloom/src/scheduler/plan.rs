//! Deciding which module nodes a run executes.

use crate::graph::{Graph, NodeId};
use std::collections::{BTreeSet, HashSet};

/// The work of one run or resume invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExecutionPlan {
    /// Modules to spawn now, in topological order.
    pub runnable: Vec<NodeId>,
    /// Modules that transitively need a missing input.
    pub blocked: BTreeSet<NodeId>,
    /// Names of missing inputs that blocked modules or requested outputs need.
    pub missing_inputs: BTreeSet<String>,
}

impl ExecutionPlan {
    /// Builds the plan.
    ///
    /// `candidates` restricts which modules may run (the pending set when
    /// resuming); `None` allows all. `resolved` reports data nodes that are
    /// already written or unreachable.
    ///
    /// Eager modules always run. A lazy module runs only if a requested output
    /// or an input of a running module depends on it.
    pub fn build(
        graph: &Graph,
        requested: &[NodeId],
        candidates: Option<&BTreeSet<NodeId>>,
        resolved: impl Fn(&NodeId) -> bool,
    ) -> Self {
        let eligible = |id: &NodeId| {
            let Some(module) = graph.module_node(id) else {
                return false;
            };
            let pending = candidates.map_or(true, |c| c.contains(id));
            let finished = !module.outputs.is_empty() && module.targets().all(&resolved);
            pending && !finished
        };

        let mut scheduled: HashSet<NodeId> = graph
            .module_nodes()
            .filter(|m| !m.options.lazy && eligible(&m.id))
            .map(|m| m.id.clone())
            .collect();

        let mut worklist: Vec<NodeId> = requested.to_vec();
        for id in &scheduled {
            if let Some(module) = graph.module_node(id) {
                worklist.extend(module.sources().cloned());
            }
        }

        let mut visited = HashSet::new();
        while let Some(data) = worklist.pop() {
            if !visited.insert(data.clone()) || resolved(&data) {
                continue;
            }
            if let Some(producer) = graph.producer_of(&data) {
                if eligible(producer) && scheduled.insert(producer.clone()) {
                    if let Some(module) = graph.module_node(producer) {
                        worklist.extend(module.sources().cloned());
                    }
                }
            }
        }

        let mut dead: HashSet<NodeId> = graph
            .inputs()
            .values()
            .filter(|id| !resolved(id))
            .cloned()
            .collect();
        let mut runnable = Vec::new();
        let mut blocked = BTreeSet::new();
        let mut missing_inputs = BTreeSet::new();

        for id in graph.topological_order() {
            if !scheduled.contains(id) {
                continue;
            }
            let Some(module) = graph.module_node(id) else {
                continue;
            };

            let dead_sources: Vec<&NodeId> = module
                .sources()
                .filter(|s| {
                    dead.contains(*s)
                        || (!resolved(s)
                            && graph.producer_of(s).is_some_and(|p| !scheduled.contains(p)))
                })
                .collect();

            if dead_sources.is_empty() {
                runnable.push(id.clone());
            } else {
                for source in dead_sources {
                    if let Some(name) = graph.input_name(source) {
                        missing_inputs.insert(name.to_string());
                    }
                }
                blocked.insert(id.clone());
                dead.extend(module.targets().cloned());
            }
        }

        for id in requested {
            if graph.is_input(id) && !resolved(id) {
                if let Some(name) = graph.input_name(id) {
                    missing_inputs.insert(name.to_string());
                }
            }
        }

        Self {
            runnable,
            blocked,
            missing_inputs,
        }
    }

    /// Returns true if the run must suspend once runnable work finishes.
    pub fn needs_suspension(&self) -> bool {
        !self.blocked.is_empty() || !self.missing_inputs.is_empty()
    }
}
