//! Change detector service
//!
//! Diffs current records against the latest snapshot, scores the resulting
//! changes, persists the new snapshot and supports history and rollback.
//!
//! Rollback mutates snapshot history in the store and must not run
//! concurrently with `detect_changes` for the same entity type.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::change::{Change, ChangeOperation};
use super::snapshot::{Record, record_checksum, record_id};
use super::store::StateStore;

/// Default significance below which changes are left out of results
pub const DEFAULT_SIGNIFICANCE_THRESHOLD: f64 = 0.1;

/// Significance assigned to every change when scoring is disabled
pub const DISABLED_SIGNIFICANCE: f64 = 0.5;

/// Configuration for change detection and significance scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeDetectionConfig {
    /// Changes scoring below this are filtered from returned results
    pub significance_threshold: f64,
    /// Weight of each field when it changes in an update
    pub field_weights: HashMap<String, f64>,
    /// Weight for fields not listed in `field_weights`
    pub default_field_weight: f64,
    /// Significance of a newly created entity
    pub create_significance: f64,
    /// Significance of a deleted entity
    pub delete_significance: f64,
    /// Significance used when scoring is disabled for a call
    pub disabled_significance: f64,
}

impl Default for ChangeDetectionConfig {
    fn default() -> Self {
        let field_weights = [
            ("status", 0.5),
            ("arr", 0.6),
            ("mrr", 0.6),
            ("owner_id", 0.3),
            ("health_score", 0.4),
            ("plan", 0.4),
            ("email", 0.2),
        ]
        .into_iter()
        .map(|(field, weight)| (field.to_string(), weight))
        .collect();

        Self {
            significance_threshold: DEFAULT_SIGNIFICANCE_THRESHOLD,
            field_weights,
            default_field_weight: 0.1,
            create_significance: 0.7,
            delete_significance: 0.9,
            disabled_significance: DISABLED_SIGNIFICANCE,
        }
    }
}

/// Per-call detection options
#[derive(Debug, Clone)]
pub struct DetectOptions {
    /// Field holding each record's id
    pub id_field: String,
    /// Score changes and apply the significance threshold
    pub calculate_significance: bool,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            calculate_significance: true,
        }
    }
}

impl DetectOptions {
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn without_significance(mut self) -> Self {
        self.calculate_significance = false;
        self
    }
}

/// Outcome of a rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackResult {
    /// Records in the restored snapshot
    pub entities_restored: usize,
    /// Newer snapshots discarded
    pub snapshots_removed: usize,
    /// Timestamp of the restored snapshot
    pub restored_to: DateTime<Utc>,
}

/// Change detector backed by a [`StateStore`]
pub struct ChangeDetector {
    store: Arc<dyn StateStore>,
    config: ChangeDetectionConfig,
}

impl ChangeDetector {
    /// Create a detector with default configuration
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            config: ChangeDetectionConfig::default(),
        }
    }

    /// Create a detector with custom configuration
    pub fn with_config(store: Arc<dyn StateStore>, config: ChangeDetectionConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ChangeDetectionConfig {
        &self.config
    }

    /// Detect changes using the default id field and significance scoring
    pub async fn detect_changes(&self, entity_type: &str, current_records: &[Record]) -> Result<Vec<Change>> {
        self.detect_changes_with(entity_type, current_records, &DetectOptions::default())
            .await
    }

    /// Detect changes with explicit options
    ///
    /// The full `current_records` always become the new snapshot, and every
    /// detected change is journaled, regardless of significance filtering on
    /// the returned list.
    pub async fn detect_changes_with(
        &self,
        entity_type: &str,
        current_records: &[Record],
        options: &DetectOptions,
    ) -> Result<Vec<Change>> {
        let previous_records = self
            .store
            .get_latest_snapshot(entity_type)
            .await?
            .map(|snapshot| snapshot.entities)
            .unwrap_or_default();

        let previous = index_by_id(&previous_records, &options.id_field);
        let current = index_by_id(current_records, &options.id_field);

        let skipped = current_records.len() - current.len();
        if skipped > 0 {
            warn!(
                entity_type = %entity_type,
                id_field = %options.id_field,
                skipped,
                "Records without a usable id were excluded from change detection"
            );
        }

        // Timestamps are assigned once the snapshot is saved
        let placeholder = Utc::now();
        let mut changes = Vec::new();

        for (id, record) in &current {
            match previous.get(id) {
                None => changes.push(Change::create(entity_type, id, (*record).clone(), placeholder)),
                Some(old) => {
                    if record_checksum(old) == record_checksum(record) {
                        continue;
                    }
                    if let Some(change) = Change::update(entity_type, id, old, record, placeholder) {
                        changes.push(change);
                    }
                }
            }
        }

        for (id, record) in &previous {
            if !current.contains_key(id) {
                changes.push(Change::delete(entity_type, id, (*record).clone(), placeholder));
            }
        }

        let snapshot = self
            .store
            .save_snapshot(entity_type, current_records.to_vec())
            .await?;

        let changes: Vec<Change> = changes
            .into_iter()
            .map(|mut change| {
                change.detected_at = snapshot.timestamp;
                let significance = if options.calculate_significance {
                    self.score_change(&change)
                } else {
                    self.config.disabled_significance
                };
                change.with_significance(significance)
            })
            .collect();

        self.store.append_changes(entity_type, &changes).await?;

        let total = changes.len();
        let returned: Vec<Change> = if options.calculate_significance {
            changes
                .into_iter()
                .filter(|c| c.significance >= self.config.significance_threshold)
                .collect()
        } else {
            changes
        };

        info!(
            entity_type = %entity_type,
            records = current_records.len(),
            detected = total,
            returned = returned.len(),
            snapshot_id = %snapshot.id,
            "Changes detected"
        );

        Ok(returned)
    }

    /// Detect changes for several entity types, each against its own snapshot
    pub async fn detect_bulk_changes(
        &self,
        records_by_type: &BTreeMap<String, Vec<Record>>,
    ) -> Result<BTreeMap<String, Vec<Change>>> {
        let mut results = BTreeMap::new();
        for (entity_type, records) in records_by_type {
            let changes = self.detect_changes(entity_type, records).await?;
            results.insert(entity_type.clone(), changes);
        }
        Ok(results)
    }

    /// Journaled changes for one entity, oldest first
    ///
    /// When more than `limit` exist, the most recent `limit` are kept.
    pub async fn get_entity_history(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<Change>> {
        let mut history = self.store.get_changes(entity_type, entity_id).await?;
        history.sort_by_key(|c| c.detected_at);
        if history.len() > limit {
            history.drain(..history.len() - limit);
        }
        Ok(history)
    }

    /// Restore the latest snapshot at or before `target_time`
    ///
    /// Newer snapshots and their journaled changes are discarded, so the
    /// next detection run diffs against the restored state.
    pub async fn rollback_to_snapshot(
        &self,
        entity_type: &str,
        target_time: DateTime<Utc>,
    ) -> Result<RollbackResult> {
        let snapshot = self
            .store
            .get_snapshot_at_or_before(entity_type, target_time)
            .await?
            .ok_or_else(|| Error::SnapshotNotFound {
                entity_type: entity_type.to_string(),
                target: target_time,
            })?;

        let snapshots_removed = self
            .store
            .delete_snapshots_after(entity_type, snapshot.timestamp)
            .await?;
        let changes_removed = self
            .store
            .delete_changes_after(entity_type, snapshot.timestamp)
            .await?;

        info!(
            entity_type = %entity_type,
            restored_to = %snapshot.timestamp,
            snapshots_removed,
            changes_removed,
            "Rolled back to snapshot"
        );

        Ok(RollbackResult {
            entities_restored: snapshot.count,
            snapshots_removed,
            restored_to: snapshot.timestamp,
        })
    }

    /// Business significance of a change
    ///
    /// Updates score the capped sum of their changed fields' weights, so
    /// touching more weighted fields never lowers the score.
    pub fn score_change(&self, change: &Change) -> f64 {
        let score = match change.operation {
            ChangeOperation::Create => self.config.create_significance,
            ChangeOperation::Delete => self.config.delete_significance,
            ChangeOperation::Update => change
                .fields_changed
                .iter()
                .map(|field| {
                    self.config
                        .field_weights
                        .get(field)
                        .copied()
                        .unwrap_or(self.config.default_field_weight)
                        .max(0.0)
                })
                .sum(),
        };
        debug!(entity_id = %change.entity_id, operation = %change.operation, score, "Scored change");
        score.clamp(0.0, 1.0)
    }
}

fn index_by_id<'a>(records: &'a [Record], id_field: &str) -> BTreeMap<String, &'a Record> {
    records
        .iter()
        .filter_map(|record| record_id(record, id_field).map(|id| (id, record)))
        .collect()
}
