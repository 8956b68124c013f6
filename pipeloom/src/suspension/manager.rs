//! Capturing and restoring suspended runs.

use super::{SnapshotId, SuspensionSnapshot, SuspensionStore};
use crate::cancellation::CancellationToken;
use crate::context::ExecutionContext;
use crate::errors::{PipeloomError, StoreError};
use crate::graph::{Graph, NodeId};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Moves run state between execution contexts and a [`SuspensionStore`].
#[derive(Debug, Clone)]
pub struct SuspensionManager {
    store: Arc<dyn SuspensionStore>,
}

impl SuspensionManager {
    /// Creates a manager over a store.
    #[must_use]
    pub fn new(store: Arc<dyn SuspensionStore>) -> Self {
        Self { store }
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SuspensionStore> {
        &self.store
    }

    /// Captures the state of a run.
    #[must_use]
    pub fn capture(
        graph: &Graph,
        ctx: &ExecutionContext,
        pending: BTreeSet<NodeId>,
        missing_inputs: BTreeSet<String>,
        requested_outputs: Option<BTreeSet<String>>,
    ) -> SuspensionSnapshot {
        SuspensionSnapshot {
            pipeline_name: graph.name().to_string(),
            pipeline_version: graph.version().to_string(),
            run_id: ctx.run_id(),
            completed_node_values: ctx.completed_values(),
            unreachable_node_ids: ctx.unreachable_nodes(),
            pending_node_ids: pending,
            missing_input_names: missing_inputs,
            requested_outputs,
            created_at: Utc::now(),
        }
    }

    /// Captures and stores the state of a run.
    pub async fn suspend(
        &self,
        graph: &Graph,
        ctx: &ExecutionContext,
        pending: BTreeSet<NodeId>,
        missing_inputs: BTreeSet<String>,
        requested_outputs: Option<BTreeSet<String>>,
    ) -> Result<SnapshotId, StoreError> {
        let snapshot = Self::capture(graph, ctx, pending, missing_inputs, requested_outputs);
        let id = self.store.save(&snapshot).await?;
        info!(
            snapshot_id = %id,
            run_id = %snapshot.run_id,
            pending = snapshot.pending_node_ids.len(),
            missing = ?snapshot.missing_input_names,
            "Run suspended"
        );
        Ok(id)
    }

    /// Loads a snapshot and checks that it belongs to `graph`.
    pub async fn load(
        &self,
        graph: &Graph,
        id: &SnapshotId,
    ) -> Result<SuspensionSnapshot, PipeloomError> {
        let snapshot = self.store.load(id).await?;
        if snapshot.pipeline_name != graph.name() || snapshot.pipeline_version != graph.version() {
            return Err(PipeloomError::VersionMismatch {
                snapshot: id.clone(),
                expected: snapshot.qualified_name(),
                actual: graph.qualified_name(),
            });
        }
        Ok(snapshot)
    }

    /// Rebuilds an execution context from a snapshot.
    ///
    /// The context continues the snapshot's run id.
    pub fn rehydrate(
        graph: &Graph,
        snapshot: &SuspensionSnapshot,
        cancel: Arc<CancellationToken>,
    ) -> Result<ExecutionContext, PipeloomError> {
        let ctx = ExecutionContext::with_token(
            snapshot.run_id,
            graph.data_nodes().map(|d| d.id.clone()),
            cancel,
        );
        for (id, value) in &snapshot.completed_node_values {
            ctx.seed(id, value.clone())?;
        }
        for id in &snapshot.unreachable_node_ids {
            ctx.mark_unreachable(id, "producer skipped before suspension")?;
        }
        Ok(ctx)
    }

    /// Deletes a snapshot.
    pub async fn discard(&self, id: &SnapshotId) -> Result<(), StoreError> {
        self.store.delete(id).await
    }
}
