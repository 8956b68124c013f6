//! Snapshot storage.

use super::{SnapshotId, SuspensionSnapshot};
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;

/// Persistent storage for suspension snapshots.
#[async_trait]
pub trait SuspensionStore: Send + Sync + fmt::Debug {
    /// Stores a snapshot under a fresh id.
    async fn save(&self, snapshot: &SuspensionSnapshot) -> Result<SnapshotId, StoreError>;

    /// Loads a snapshot.
    async fn load(&self, id: &SnapshotId) -> Result<SuspensionSnapshot, StoreError>;

    /// Deletes a snapshot. Deleting a missing snapshot is not an error.
    async fn delete(&self, id: &SnapshotId) -> Result<(), StoreError>;
}

/// An in-memory store.
///
/// Snapshots are kept in their serialized form so that everything stored
/// here would survive a trip through an external store.
#[derive(Debug, Default)]
pub struct InMemorySuspensionStore {
    entries: DashMap<SnapshotId, String>,
}

impl InMemorySuspensionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if a snapshot is stored under `id`.
    #[must_use]
    pub fn contains(&self, id: &SnapshotId) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns the serialized snapshot stored under `id`.
    #[must_use]
    pub fn raw(&self, id: &SnapshotId) -> Option<String> {
        self.entries.get(id).map(|entry| entry.clone())
    }
}

#[async_trait]
impl SuspensionStore for InMemorySuspensionStore {
    async fn save(&self, snapshot: &SuspensionSnapshot) -> Result<SnapshotId, StoreError> {
        let json = snapshot
            .to_json()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let id = SnapshotId::generate();
        self.entries.insert(id.clone(), json);
        Ok(id)
    }

    async fn load(&self, id: &SnapshotId) -> Result<SuspensionSnapshot, StoreError> {
        let json = self
            .raw(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        SuspensionSnapshot::from_json(&json).map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn delete(&self, id: &SnapshotId) -> Result<(), StoreError> {
        self.entries.remove(id);
        Ok(())
    }
}
