//! Suspension snapshots.

use crate::graph::NodeId;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Identifier of a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Generates a fresh id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SnapshotId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SnapshotId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The state of a run paused for missing inputs.
///
/// Snapshots are plain data: they serialize to JSON and can be resumed by a
/// different process, as long as it binds the same pipeline version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionSnapshot {
    /// Pipeline name.
    pub pipeline_name: String,
    /// Pipeline version.
    pub pipeline_version: String,
    /// The run that suspended.
    pub run_id: Uuid,
    /// Every data node written before suspension.
    pub completed_node_values: BTreeMap<NodeId, Value>,
    /// Data nodes whose producers were skipped.
    #[serde(default)]
    pub unreachable_node_ids: BTreeSet<NodeId>,
    /// Module nodes still to run.
    pub pending_node_ids: BTreeSet<NodeId>,
    /// Input names the pending work needs.
    pub missing_input_names: BTreeSet<String>,
    /// Output names the run was asked for. `None` means every output.
    #[serde(default)]
    pub requested_outputs: Option<BTreeSet<String>>,
    /// When the run suspended.
    pub created_at: DateTime<Utc>,
}

impl SuspensionSnapshot {
    /// Returns `name@version` of the pipeline that produced the snapshot.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}@{}", self.pipeline_name, self.pipeline_version)
    }

    /// Serializes to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is not a snapshot.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_snapshot_is_portable() {
        let snapshot = SuspensionSnapshot {
            pipeline_name: "review".to_string(),
            pipeline_version: "3".to_string(),
            run_id: Uuid::new_v4(),
            completed_node_values: [(NodeId::from("a"), Value::Int(1))].into_iter().collect(),
            unreachable_node_ids: BTreeSet::new(),
            pending_node_ids: [NodeId::from("f2")].into_iter().collect(),
            missing_input_names: ["b".to_string()].into_iter().collect(),
            requested_outputs: None,
            created_at: Utc::now(),
        };

        let json = snapshot.to_json().unwrap();
        let restored = SuspensionSnapshot::from_json(&json).unwrap();

        assert_eq!(restored, snapshot);
        assert_eq!(restored.qualified_name(), "review@3");
    }

    #[test]
    fn test_requested_outputs_default_to_all() {
        let json = serde_json::json!({
            "pipeline_name": "review",
            "pipeline_version": "3",
            "run_id": Uuid::new_v4(),
            "completed_node_values": {},
            "pending_node_ids": ["f2"],
            "missing_input_names": ["b"],
            "created_at": Utc::now(),
        });

        let snapshot = SuspensionSnapshot::from_json(&json.to_string()).unwrap();

        assert!(snapshot.requested_outputs.is_none());
        assert!(snapshot.unreachable_node_ids.is_empty());
    }

    #[test]
    fn test_snapshot_ids_are_unique() {
        assert_ne!(SnapshotId::generate(), SnapshotId::generate());
    }
}
