//! Run results.

use crate::cancellation::CancellationToken;
use crate::errors::NodeFailure;
use crate::graph::NodeId;
use crate::suspension::SnapshotId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every requested output was produced or is unreachable.
    Completed,
    /// A module failed under the `Fail` policy.
    Failed,
    /// The run is waiting for missing inputs.
    Suspended,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Suspended => write!(f, "suspended"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The run completed.
    Completed {
        /// Requested outputs by name.
        outputs: BTreeMap<String, Value>,
    },
    /// The run failed.
    Failed {
        /// The failure that stopped the run.
        failure: NodeFailure,
    },
    /// The run suspended.
    Suspended {
        /// Snapshot to resume from.
        snapshot_id: SnapshotId,
        /// Input names that must be supplied to resume.
        missing_inputs: BTreeSet<String>,
    },
}

/// The result of running or resuming a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Run identifier.
    pub run_id: Uuid,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Wall-clock duration of this invocation.
    pub duration_ms: f64,
    /// Failures recorded under the `Log` policy.
    pub logged_errors: Vec<NodeFailure>,
    /// Module nodes skipped under the `Skip` or `Log` policy.
    pub skipped_nodes: Vec<NodeId>,
}

impl RunResult {
    /// Returns the status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        match self.outcome {
            RunOutcome::Completed { .. } => RunStatus::Completed,
            RunOutcome::Failed { .. } => RunStatus::Failed,
            RunOutcome::Suspended { .. } => RunStatus::Suspended,
        }
    }

    /// Returns true if the run completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status() == RunStatus::Completed
    }

    /// Returns true if the run failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status() == RunStatus::Failed
    }

    /// Returns true if the run suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.status() == RunStatus::Suspended
    }

    /// Returns the outputs of a completed run.
    #[must_use]
    pub fn outputs(&self) -> Option<&BTreeMap<String, Value>> {
        match &self.outcome {
            RunOutcome::Completed { outputs } => Some(outputs),
            _ => None,
        }
    }

    /// Returns one output of a completed run.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs().and_then(|outputs| outputs.get(name))
    }

    /// Returns the failure of a failed run.
    #[must_use]
    pub fn failure(&self) -> Option<&NodeFailure> {
        match &self.outcome {
            RunOutcome::Failed { failure } => Some(failure),
            _ => None,
        }
    }

    /// Returns the snapshot id of a suspended run.
    #[must_use]
    pub fn snapshot_id(&self) -> Option<&SnapshotId> {
        match &self.outcome {
            RunOutcome::Suspended { snapshot_id, .. } => Some(snapshot_id),
            _ => None,
        }
    }

    /// Returns the missing inputs of a suspended run.
    #[must_use]
    pub fn missing_inputs(&self) -> Option<&BTreeSet<String>> {
        match &self.outcome {
            RunOutcome::Suspended { missing_inputs, .. } => Some(missing_inputs),
            _ => None,
        }
    }
}

/// Options for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Output names to produce. `None` requests every output.
    pub outputs: Option<Vec<String>>,
    /// Token that aborts the run when cancelled.
    pub cancel: Option<Arc<CancellationToken>>,
}

impl RunOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests only the named outputs.
    #[must_use]
    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = Some(outputs.into_iter().map(Into::into).collect());
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }
}
