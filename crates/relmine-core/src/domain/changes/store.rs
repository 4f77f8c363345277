//! State store collaborator for snapshot history
//!
//! The store owns snapshot history and the change journal. It is an
//! explicit collaborator handed to the detector, never process-global, so
//! two detector instances (or two test runs) never share state unless they
//! are given the same store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::error::Result;

use super::change::Change;
use super::snapshot::{Record, Snapshot};

/// Persistence for snapshots and detected changes
#[async_trait]
pub trait StateStore: Send + Sync {
    // ========== Snapshot Operations ==========

    /// Latest snapshot of an entity type, if any
    async fn get_latest_snapshot(&self, entity_type: &str) -> Result<Option<Snapshot>>;

    /// Record a new snapshot; timestamps are strictly increasing per type
    async fn save_snapshot(&self, entity_type: &str, entities: Vec<Record>) -> Result<Snapshot>;

    /// Latest snapshot taken at or before `timestamp`
    async fn get_snapshot_at_or_before(
        &self,
        entity_type: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Snapshot>>;

    /// Delete snapshots taken strictly after `timestamp`, returning how many
    async fn delete_snapshots_after(&self, entity_type: &str, timestamp: DateTime<Utc>) -> Result<usize>;

    // ========== Change Journal ==========

    /// Append detected changes to the journal
    async fn append_changes(&self, entity_type: &str, changes: &[Change]) -> Result<()>;

    /// Journaled changes for one entity, oldest first
    async fn get_changes(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Change>>;

    /// Delete journal entries detected strictly after `timestamp`
    async fn delete_changes_after(&self, entity_type: &str, timestamp: DateTime<Utc>) -> Result<usize>;
}

/// In-memory state store
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    snapshots: RwLock<HashMap<String, Vec<Snapshot>>>,
    journal: RwLock<HashMap<String, Vec<Change>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots held for an entity type
    pub fn snapshot_count(&self, entity_type: &str) -> usize {
        self.snapshots
            .read()
            .get(entity_type)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_latest_snapshot(&self, entity_type: &str) -> Result<Option<Snapshot>> {
        Ok(self
            .snapshots
            .read()
            .get(entity_type)
            .and_then(|history| history.last().cloned()))
    }

    async fn save_snapshot(&self, entity_type: &str, entities: Vec<Record>) -> Result<Snapshot> {
        let mut snapshots = self.snapshots.write();
        let history = snapshots.entry(entity_type.to_string()).or_default();

        let mut timestamp = Utc::now();
        if let Some(last) = history.last() {
            if timestamp <= last.timestamp {
                timestamp = last.timestamp + Duration::microseconds(1);
            }
        }

        let snapshot = Snapshot::new(entity_type, entities, timestamp);
        history.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn get_snapshot_at_or_before(
        &self,
        entity_type: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().get(entity_type).and_then(|history| {
            history
                .iter()
                .rev()
                .find(|s| s.timestamp <= timestamp)
                .cloned()
        }))
    }

    async fn delete_snapshots_after(&self, entity_type: &str, timestamp: DateTime<Utc>) -> Result<usize> {
        let mut snapshots = self.snapshots.write();
        let Some(history) = snapshots.get_mut(entity_type) else {
            return Ok(0);
        };
        let before = history.len();
        history.retain(|s| s.timestamp <= timestamp);
        Ok(before - history.len())
    }

    async fn append_changes(&self, entity_type: &str, changes: &[Change]) -> Result<()> {
        self.journal
            .write()
            .entry(entity_type.to_string())
            .or_default()
            .extend(changes.iter().cloned());
        Ok(())
    }

    async fn get_changes(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Change>> {
        Ok(self
            .journal
            .read()
            .get(entity_type)
            .map(|changes| {
                changes
                    .iter()
                    .filter(|c| c.entity_id == entity_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_changes_after(&self, entity_type: &str, timestamp: DateTime<Utc>) -> Result<usize> {
        let mut journal = self.journal.write();
        let Some(changes) = journal.get_mut(entity_type) else {
            return Ok(0);
        };
        let before = changes.len();
        changes.retain(|c| c.detected_at <= timestamp);
        Ok(before - changes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify trait is object-safe
    fn _assert_object_safe(_: &dyn StateStore) {}

    #[tokio::test]
    async fn test_snapshot_timestamps_strictly_increase() {
        let store = InMemoryStateStore::new();
        let first = store.save_snapshot("Customer", Vec::new()).await.unwrap();
        let second = store.save_snapshot("Customer", Vec::new()).await.unwrap();
        assert!(second.timestamp > first.timestamp);
        assert_eq!(store.snapshot_count("Customer"), 2);
    }

    #[tokio::test]
    async fn test_at_or_before_and_delete_after() {
        let store = InMemoryStateStore::new();
        let first = store.save_snapshot("Customer", Vec::new()).await.unwrap();
        store.save_snapshot("Customer", Vec::new()).await.unwrap();
        store.save_snapshot("Customer", Vec::new()).await.unwrap();

        let found = store
            .get_snapshot_at_or_before("Customer", first.timestamp)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);

        let removed = store
            .delete_snapshots_after("Customer", first.timestamp)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.snapshot_count("Customer"), 1);
    }

    #[tokio::test]
    async fn test_types_are_isolated() {
        let store = InMemoryStateStore::new();
        store.save_snapshot("Customer", Vec::new()).await.unwrap();
        assert!(store.get_latest_snapshot("Product").await.unwrap().is_none());
        assert_eq!(
            store.delete_snapshots_after("Product", Utc::now()).await.unwrap(),
            0
        );
    }
}
