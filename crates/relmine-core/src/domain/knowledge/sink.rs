//! Persistence seam for mined graphs

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::changes::Change;
use crate::error::Result;

use super::entity::Entity;
use super::event::MiningEvent;
use super::patterns::GraphPattern;
use super::relationship::Relationship;
use super::temporal::TemporalCorrelation;
use super::validator::ValidationResult;

/// Everything one mining run produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiningOutput {
    /// Resolved entities, sorted by id
    pub entities: Vec<Entity>,
    /// Union of built and discovered relationships, sorted by key
    pub relationships: Vec<Relationship>,
    pub patterns: Vec<GraphPattern>,
    pub correlations: Vec<TemporalCorrelation>,
    pub changes: Vec<Change>,
    /// Validation results of entities excluded from the run
    pub rejected: Vec<ValidationResult>,
    pub events: Vec<MiningEvent>,
}

impl MiningOutput {
    /// Relationships touching `entity_id`
    pub fn relationships_for(&self, entity_id: &str) -> Vec<&Relationship> {
        self.relationships
            .iter()
            .filter(|r| r.involves(entity_id))
            .collect()
    }

    pub fn entity(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == entity_id)
    }
}

/// Destination for mined graphs
#[async_trait]
pub trait GraphSink: Send + Sync {
    /// Persist the output of one run
    async fn persist(&self, output: &MiningOutput) -> Result<()>;
}

/// Sink keeping the most recently persisted output in memory
#[derive(Debug, Default)]
pub struct InMemoryGraphSink {
    last: RwLock<Option<MiningOutput>>,
    persisted_runs: RwLock<usize>,
}

impl InMemoryGraphSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last persisted output, if any
    pub fn last_output(&self) -> Option<MiningOutput> {
        self.last.read().clone()
    }

    pub fn persisted_runs(&self) -> usize {
        *self.persisted_runs.read()
    }
}

#[async_trait]
impl GraphSink for InMemoryGraphSink {
    async fn persist(&self, output: &MiningOutput) -> Result<()> {
        *self.last.write() = Some(output.clone());
        *self.persisted_runs.write() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::{EntityType, RelationshipType};

    #[tokio::test]
    async fn test_in_memory_sink_keeps_last_output() {
        let sink = InMemoryGraphSink::new();
        assert!(sink.last_output().is_none());

        let first = MiningOutput {
            entities: vec![Entity::new("cust_1", EntityType::Customer)],
            ..MiningOutput::default()
        };
        let second = MiningOutput {
            entities: vec![
                Entity::new("cust_1", EntityType::Customer),
                Entity::new("sub_1", EntityType::Subscription),
            ],
            relationships: vec![Relationship::new("sub_1", "cust_1", RelationshipType::BelongsTo)],
            ..MiningOutput::default()
        };

        sink.persist(&first).await.unwrap();
        sink.persist(&second).await.unwrap();

        let last = sink.last_output().unwrap();
        assert_eq!(last.entities.len(), 2);
        assert_eq!(last.relationships_for("cust_1").len(), 1);
        assert!(last.entity("sub_1").is_some());
        assert_eq!(sink.persisted_runs(), 2);
    }
}
