//! Audit events for mining runs
//!
//! Every stage of a mining run records what it did so a caller can explain
//! the final graph: which records were rejected and why, which entities
//! were merged, how many edges each analyser contributed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::EntityType;
use super::patterns::PatternType;
use super::relationship::RelationshipType;

/// Events recorded during a mining run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum MiningEvent {
    /// An entity was excluded before resolution
    EntityRejected {
        entity_id: String,
        entity_type: EntityType,
        reasons: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    /// Change detection ran for one entity type
    ChangesDetected {
        entity_type: String,
        created: usize,
        updated: usize,
        deleted: usize,
        timestamp: DateTime<Utc>,
    },
    /// Several candidates were merged into one canonical entity
    EntitiesMerged {
        canonical_id: String,
        merged_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    /// Base relationships were built
    RelationshipsBuilt {
        count: usize,
        timestamp: DateTime<Utc>,
    },
    /// An analyser contributed relationships of one type
    RelationshipsDiscovered {
        relationship_type: RelationshipType,
        count: usize,
        timestamp: DateTime<Utc>,
    },
    /// Patterns of one type were recognised
    PatternsRecognized {
        pattern_type: PatternType,
        count: usize,
        timestamp: DateTime<Utc>,
    },
    /// The run finished and its output was persisted
    RunCompleted {
        entities: usize,
        relationships: usize,
        patterns: usize,
        timestamp: DateTime<Utc>,
    },
}

impl MiningEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::EntityRejected { timestamp, .. }
            | Self::ChangesDetected { timestamp, .. }
            | Self::EntitiesMerged { timestamp, .. }
            | Self::RelationshipsBuilt { timestamp, .. }
            | Self::RelationshipsDiscovered { timestamp, .. }
            | Self::PatternsRecognized { timestamp, .. }
            | Self::RunCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name
    pub fn event_type_name(&self) -> &'static str {
        match self {
            Self::EntityRejected { .. } => "entity_rejected",
            Self::ChangesDetected { .. } => "changes_detected",
            Self::EntitiesMerged { .. } => "entities_merged",
            Self::RelationshipsBuilt { .. } => "relationships_built",
            Self::RelationshipsDiscovered { .. } => "relationships_discovered",
            Self::PatternsRecognized { .. } => "patterns_recognized",
            Self::RunCompleted { .. } => "run_completed",
        }
    }

    /// Entity the event is about, if it concerns a single one
    pub fn aggregate_id(&self) -> Option<&str> {
        match self {
            Self::EntityRejected { entity_id, .. } => Some(entity_id),
            Self::EntitiesMerged { canonical_id, .. } => Some(canonical_id),
            _ => None,
        }
    }

    pub fn entity_rejected(entity_id: impl Into<String>, entity_type: EntityType, reasons: Vec<String>) -> Self {
        Self::EntityRejected {
            entity_id: entity_id.into(),
            entity_type,
            reasons,
            timestamp: Utc::now(),
        }
    }

    pub fn changes_detected(entity_type: impl Into<String>, created: usize, updated: usize, deleted: usize) -> Self {
        Self::ChangesDetected {
            entity_type: entity_type.into(),
            created,
            updated,
            deleted,
            timestamp: Utc::now(),
        }
    }

    pub fn entities_merged(canonical_id: impl Into<String>, merged_ids: Vec<String>) -> Self {
        Self::EntitiesMerged {
            canonical_id: canonical_id.into(),
            merged_ids,
            timestamp: Utc::now(),
        }
    }

    pub fn relationships_built(count: usize) -> Self {
        Self::RelationshipsBuilt {
            count,
            timestamp: Utc::now(),
        }
    }

    pub fn relationships_discovered(relationship_type: RelationshipType, count: usize) -> Self {
        Self::RelationshipsDiscovered {
            relationship_type,
            count,
            timestamp: Utc::now(),
        }
    }

    pub fn patterns_recognized(pattern_type: PatternType, count: usize) -> Self {
        Self::PatternsRecognized {
            pattern_type,
            count,
            timestamp: Utc::now(),
        }
    }

    pub fn run_completed(entities: usize, relationships: usize, patterns: usize) -> Self {
        Self::RunCompleted {
            entities,
            relationships,
            patterns,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_event() {
        let event = MiningEvent::entity_rejected(
            "cust_9",
            EntityType::Customer,
            vec!["name: required field 'name' is missing".into()],
        );

        assert_eq!(event.event_type_name(), "entity_rejected");
        assert_eq!(event.aggregate_id(), Some("cust_9"));
    }

    #[test]
    fn test_merge_event() {
        let event = MiningEvent::entities_merged("crm_1", vec!["bill_7".into(), "crm_1".into()]);
        assert_eq!(event.aggregate_id(), Some("crm_1"));
        assert!(event.timestamp() <= Utc::now());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = MiningEvent::relationships_discovered(RelationshipType::ConnectedVia, 4);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event_type"], "relationships_discovered");
        assert_eq!(json["relationship_type"], "CONNECTED_VIA");
        assert_eq!(event.aggregate_id(), None);
    }
}
