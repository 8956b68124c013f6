//! Execution of a single module node within a run.

use super::worker_pool::PriorityGate;
use crate::context::ExecutionContext;
use crate::errors::{ContextError, ModuleError, NodeFailure};
use crate::events::{emit_event, EventSink};
use crate::graph::{CallOptions, ErrorPolicy, ModuleNode};
use crate::observability::SpanTimer;
use crate::resilience::{CallInfo, ResilienceChain};
use crate::value::Value;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A module node with its resolved options and decorator chain.
#[derive(Debug)]
pub(crate) struct BoundNode {
    pub node: ModuleNode,
    pub options: CallOptions,
    pub chain: ResilienceChain,
}

/// How one node task ended.
#[derive(Debug)]
pub(crate) enum TaskOutcome {
    /// Outputs were written.
    Completed,
    /// The error policy skipped the node and marked its outputs unreachable.
    Skipped {
        failure: NodeFailure,
        logged: bool,
    },
    /// The error policy failed the run.
    Failed(NodeFailure),
    /// The run was aborted while the node waited.
    Aborted,
    /// The execution context rejected an operation.
    Invariant(ContextError),
}

pub(crate) struct NodeTask {
    pub bound: Arc<BoundNode>,
    pub ctx: Arc<ExecutionContext>,
    pub events: Arc<dyn EventSink>,
    pub gate: Option<Arc<PriorityGate>>,
}

impl NodeTask {
    pub async fn run(self) -> TaskOutcome {
        let node = &self.bound.node;

        let input = match self.gather_input().await {
            Ok(input) => input,
            Err(ContextError::Unreachable { node: source, .. }) => {
                let error = ModuleError::unreachable_input(&node.module, source);
                return self.apply_policy(error, 0.0);
            }
            Err(ContextError::Aborted { .. }) => return TaskOutcome::Aborted,
            Err(other) => return TaskOutcome::Invariant(other),
        };

        let _slot = match &self.gate {
            Some(gate) => Some(gate.acquire(self.bound.options.priority).await),
            None => None,
        };

        emit_event(
            self.events.as_ref(),
            "module.started",
            serde_json::json!({
                "run_id": self.ctx.run_id().to_string(),
                "node": node.id.as_str(),
                "module": &node.module,
                "status": "running",
            }),
        );

        let info = CallInfo::new(self.ctx.run_id(), node.id.clone(), &node.module);
        let timer = SpanTimer::start(node.id.as_str());
        let result = self.bound.chain.invoke(&info, input).await;
        let duration_ms = timer.finish();

        match result {
            Ok(value) => match self.write_outputs(&value) {
                Ok(()) => {
                    debug!(node = %node.id, duration_ms, "Module node completed");
                    emit_event(
                        self.events.as_ref(),
                        "module.completed",
                        serde_json::json!({
                            "run_id": self.ctx.run_id().to_string(),
                            "node": node.id.as_str(),
                            "module": &node.module,
                            "duration_ms": duration_ms,
                            "status": "completed",
                        }),
                    );
                    TaskOutcome::Completed
                }
                Err(WriteError::Context(e)) => TaskOutcome::Invariant(e),
                Err(WriteError::Module(e)) => self.apply_policy(e, duration_ms),
            },
            Err(e) => self.apply_policy(e, duration_ms),
        }
    }

    async fn gather_input(&self) -> Result<Value, ContextError> {
        let edges = &self.bound.node.inputs;
        let values =
            try_join_all(edges.iter().map(|edge| self.ctx.await_value(&edge.source))).await?;
        let fields: BTreeMap<String, Value> = edges
            .iter()
            .map(|edge| edge.field.clone())
            .zip(values)
            .collect();
        Ok(Value::Record(fields))
    }

    /// Writes every output edge. Field lookups are checked before anything is
    /// written so a bad result leaves no partial writes behind.
    fn write_outputs(&self, value: &Value) -> Result<(), WriteError> {
        let node = &self.bound.node;
        let mut writes = Vec::with_capacity(node.outputs.len());
        for edge in &node.outputs {
            let out = match &edge.field {
                None => value.clone(),
                Some(field) => value.field(field).cloned().ok_or_else(|| {
                    WriteError::Module(ModuleError::validation(
                        &node.module,
                        format!("result has no field '{field}' for '{}'", edge.target),
                    ))
                })?,
            };
            writes.push((&edge.target, out));
        }
        for (target, out) in writes {
            self.ctx.seed(target, out).map_err(WriteError::Context)?;
        }
        Ok(())
    }

    /// Applies the node's error policy. `duration_ms` is the time spent in
    /// the module chain, zero when it never ran.
    fn apply_policy(&self, error: ModuleError, duration_ms: f64) -> TaskOutcome {
        let node = &self.bound.node;
        let failure = NodeFailure::new(node.id.clone(), &node.module, error);

        let logged = match self.bound.options.on_error {
            ErrorPolicy::Fail => {
                warn!(node = %node.id, error = %failure.error, "Module node failed");
                emit_event(
                    self.events.as_ref(),
                    "module.failed",
                    serde_json::json!({
                        "run_id": self.ctx.run_id().to_string(),
                        "node": node.id.as_str(),
                        "module": &node.module,
                        "duration_ms": duration_ms,
                        "status": "failed",
                        "error": failure.to_dict(),
                    }),
                );
                return TaskOutcome::Failed(failure);
            }
            ErrorPolicy::Skip => {
                warn!(node = %node.id, error = %failure.error, "Module node skipped");
                false
            }
            ErrorPolicy::Log => {
                error!(node = %node.id, error = %failure.error, "Module node error logged");
                true
            }
        };

        let reason = format!("producer '{}' was skipped", node.id);
        for target in node.targets() {
            if let Err(e) = self.ctx.mark_unreachable(target, reason.clone()) {
                return TaskOutcome::Invariant(e);
            }
        }

        emit_event(
            self.events.as_ref(),
            "module.skipped",
            serde_json::json!({
                "run_id": self.ctx.run_id().to_string(),
                "node": node.id.as_str(),
                "module": &node.module,
                "duration_ms": duration_ms,
                "status": "skipped",
                "error": failure.to_dict(),
            }),
        );
        TaskOutcome::Skipped { failure, logged }
    }
}

enum WriteError {
    Context(ContextError),
    Module(ModuleError),
}
