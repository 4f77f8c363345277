//! Entity-collection snapshots
//!
//! A snapshot is the full recorded state of one entity type at a point in
//! time. It is the baseline the next detection run diffs against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A normalized field -> value record as produced by a source connector
pub type Record = serde_json::Map<String, Value>;

/// Recorded state of an entity collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub entity_type: String,
    pub timestamp: DateTime<Utc>,
    /// Every record handed to the detector, including ones without an id
    pub entities: Vec<Record>,
    pub count: usize,
    /// SHA-256 over the canonical JSON of all records
    pub checksum: String,
}

impl Snapshot {
    pub fn new(entity_type: impl Into<String>, entities: Vec<Record>, timestamp: DateTime<Utc>) -> Self {
        let checksum = collection_checksum(&entities);
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            timestamp,
            count: entities.len(),
            entities,
            checksum,
        }
    }

    /// Snapshot of an entity type that has never been recorded
    pub fn empty(entity_type: impl Into<String>) -> Self {
        Self::new(entity_type, Vec::new(), DateTime::<Utc>::MIN_UTC)
    }

    /// Recompute the checksum and compare with the stored one
    pub fn verify(&self) -> bool {
        self.count == self.entities.len() && collection_checksum(&self.entities) == self.checksum
    }
}

/// Checksum of a single record
///
/// `serde_json::Map` keeps keys sorted, so the serialized form is canonical.
pub fn record_checksum(record: &Record) -> String {
    let mut hasher = Sha256::new();
    hasher.update(Value::Object(record.clone()).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn collection_checksum(records: &[Record]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(record_checksum(record).as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Extract a record's id as a string
///
/// String and numeric ids are accepted; anything else (or a missing field)
/// yields `None` and the record is left out of diffing.
pub fn record_id(record: &Record, id_field: &str) -> Option<String> {
    match record.get(id_field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_snapshot_checksum_and_verify() {
        let snapshot = Snapshot::new(
            "Customer",
            vec![record(json!({"id": "1", "name": "Acme"}))],
            Utc::now(),
        );
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.checksum.len(), 64);
        assert!(snapshot.verify());

        let mut tampered = snapshot.clone();
        tampered.entities[0].insert("name".into(), json!("Other"));
        assert!(!tampered.verify());
    }

    #[test]
    fn test_record_checksum_ignores_key_order() {
        let a: Record = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let b: Record = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(record_checksum(&a), record_checksum(&b));
    }

    #[test]
    fn test_record_id_variants() {
        assert_eq!(record_id(&record(json!({"id": "x"})), "id"), Some("x".into()));
        assert_eq!(record_id(&record(json!({"id": 42})), "id"), Some("42".into()));
        assert_eq!(record_id(&record(json!({"id": ""})), "id"), None);
        assert_eq!(record_id(&record(json!({"name": "n"})), "id"), None);
        assert_eq!(record_id(&record(json!({"key": "k"})), "key"), Some("k".into()));
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Snapshot::empty("Customer");
        assert_eq!(snapshot.count, 0);
        assert!(snapshot.verify());
    }
}
