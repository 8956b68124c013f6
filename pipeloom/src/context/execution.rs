//! Per-run execution context.

use super::{Slot, SlotState};
use crate::cancellation::CancellationToken;
use crate::errors::ContextError;
use crate::graph::NodeId;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Holds one slot per data node of a run, plus the run's abort token.
///
/// Slots are write-once. A second write is a [`ContextError::DoubleWrite`],
/// which always indicates a scheduler or graph bug.
#[derive(Debug)]
pub struct ExecutionContext {
    run_id: Uuid,
    slots: HashMap<NodeId, Slot>,
    cancel: Arc<CancellationToken>,
}

impl ExecutionContext {
    /// Creates a context with an empty slot for each data node.
    #[must_use]
    pub fn new(run_id: Uuid, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self::with_token(run_id, nodes, Arc::new(CancellationToken::new()))
    }

    /// Creates a context that aborts when `cancel` is cancelled.
    #[must_use]
    pub fn with_token(
        run_id: Uuid,
        nodes: impl IntoIterator<Item = NodeId>,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        Self {
            run_id,
            slots: nodes.into_iter().map(|id| (id, Slot::new())).collect(),
            cancel,
        }
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn slot(&self, node: &NodeId) -> Result<&Slot, ContextError> {
        self.slots.get(node).ok_or_else(|| ContextError::UnknownNode {
            node: node.clone(),
        })
    }

    /// Writes a data node.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::DoubleWrite`] if the node was already resolved.
    pub fn seed(&self, node: &NodeId, value: Value) -> Result<(), ContextError> {
        if self.slot(node)?.fill(value) {
            debug!(run_id = %self.run_id, node = %node, "Seeded data node");
            Ok(())
        } else {
            Err(ContextError::DoubleWrite { node: node.clone() })
        }
    }

    /// Marks a data node as never going to be written.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::DoubleWrite`] if the node was already resolved.
    pub fn mark_unreachable(
        &self,
        node: &NodeId,
        reason: impl Into<String>,
    ) -> Result<(), ContextError> {
        if self.slot(node)?.mark_unreachable(reason) {
            Ok(())
        } else {
            Err(ContextError::DoubleWrite { node: node.clone() })
        }
    }

    /// Waits for a data node's value.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Unreachable`] if the producer was skipped and
    /// [`ContextError::Aborted`] if the run is aborted first.
    pub async fn await_value(&self, node: &NodeId) -> Result<Value, ContextError> {
        let slot = self.slot(node)?;
        let state = tokio::select! {
            biased;
            state = slot.resolved() => state,
            () = self.cancel.cancelled() => SlotState::Empty,
        };

        match state {
            SlotState::Filled(value) => Ok(value),
            SlotState::Unreachable(reason) => Err(ContextError::Unreachable {
                node: node.clone(),
                reason,
            }),
            SlotState::Empty => Err(ContextError::Aborted {
                node: node.clone(),
                reason: self.cancel.reason().unwrap_or_default(),
            }),
        }
    }

    /// Returns a node's value if it has been written.
    #[must_use]
    pub fn value(&self, node: &NodeId) -> Option<Value> {
        match self.slots.get(node).map(Slot::peek) {
            Some(SlotState::Filled(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns true if the node is written or unreachable.
    #[must_use]
    pub fn is_resolved(&self, node: &NodeId) -> bool {
        self.slots
            .get(node)
            .is_some_and(|slot| slot.peek().is_resolved())
    }

    /// Aborts the run. Every pending and future wait fails.
    pub fn abort(&self, reason: impl Into<String>) {
        self.cancel.cancel(reason);
    }

    /// Returns true if the run was aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the abort token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Returns every written data node and its value.
    #[must_use]
    pub fn completed_values(&self) -> BTreeMap<NodeId, Value> {
        self.slots
            .iter()
            .filter_map(|(id, slot)| match slot.peek() {
                SlotState::Filled(value) => Some((id.clone(), value)),
                _ => None,
            })
            .collect()
    }

    /// Returns every data node marked unreachable.
    #[must_use]
    pub fn unreachable_nodes(&self) -> BTreeSet<NodeId> {
        self.slots
            .iter()
            .filter(|(_, slot)| matches!(slot.peek(), SlotState::Unreachable(_)))
            .map(|(id, _)| id.clone())
            .collect()
    }
}
