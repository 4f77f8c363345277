//! Detected changes

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::snapshot::Record;

/// Kind of change observed between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One change to one entity, produced by a single detection run
///
/// For updates `old_values`/`new_values` hold only the changed fields; a
/// create carries the full new record and a delete the full old record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: ChangeOperation,
    pub old_values: Record,
    pub new_values: Record,
    /// Changed field names, populated for updates only
    pub fields_changed: BTreeSet<String>,
    /// Business significance in 0.0..=1.0
    pub significance: f64,
    pub detected_at: DateTime<Utc>,
}

impl Change {
    pub fn create(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        new_values: Record,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation: ChangeOperation::Create,
            old_values: Record::new(),
            new_values,
            fields_changed: BTreeSet::new(),
            significance: 0.0,
            detected_at,
        }
    }

    pub fn delete(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        old_values: Record,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation: ChangeOperation::Delete,
            old_values,
            new_values: Record::new(),
            fields_changed: BTreeSet::new(),
            significance: 0.0,
            detected_at,
        }
    }

    /// Build an update from the full old and new records
    ///
    /// Returns `None` when the records are identical.
    pub fn update(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        old: &Record,
        new: &Record,
        detected_at: DateTime<Utc>,
    ) -> Option<Self> {
        let mut fields_changed = BTreeSet::new();
        let mut old_values = Record::new();
        let mut new_values = Record::new();

        let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
        for key in keys {
            let before = old.get(key);
            let after = new.get(key);
            if before != after {
                fields_changed.insert(key.clone());
                if let Some(value) = before {
                    old_values.insert(key.clone(), value.clone());
                }
                if let Some(value) = after {
                    new_values.insert(key.clone(), value.clone());
                }
            }
        }

        if fields_changed.is_empty() {
            return None;
        }

        Some(Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation: ChangeOperation::Update,
            old_values,
            new_values,
            fields_changed,
            significance: 0.0,
            detected_at,
        })
    }

    pub fn with_significance(mut self, significance: f64) -> Self {
        self.significance = significance.clamp(0.0, 1.0);
        self
    }
}
