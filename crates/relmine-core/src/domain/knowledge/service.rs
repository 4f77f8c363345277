//! Knowledge mining service
//!
//! Runs the whole mining flow for a set of source batches:
//!
//! 1. Records become entities (unknown types and id-less records are skipped)
//! 2. Invalid entities are rejected, warnings are kept
//! 3. Change detection runs per entity type against the state store
//! 4. Candidates from every source are resolved into canonical entities
//! 5. Base relationships are built, then multi-hop, pattern and temporal
//!    analysis run over them
//! 6. The union is handed to the [`GraphSink`]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::RelMineConfig;
use crate::domain::changes::{Change, ChangeDetector, ChangeOperation, Record, StateStore};
use crate::domain::sources::{FetchRequest, SourceConnector};
use crate::error::Result;

use super::builder::RelationshipBuilder;
use super::entity::{Entity, EntityType};
use super::event::MiningEvent;
use super::multihop::MultiHopRelationshipDiscoverer;
use super::patterns::{GraphPattern, GraphPatternRecognizer, PatternType};
use super::relationship::{Relationship, RelationshipType};
use super::resolver::MultiSourceEntityResolver;
use super::sink::{GraphSink, MiningOutput};
use super::temporal::{EntityEvent, TemporalRelationshipAnalyzer};
use super::validator::EntityValidator;

/// Records fetched per connector page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Records of one entity type from one source system
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBatch {
    pub source: String,
    /// Entity type name, parsed with aliases
    pub entity_type: String,
    pub records: Vec<Record>,
    /// Field holding each record's id
    pub id_field: String,
}

impl SourceBatch {
    pub fn new(source: impl Into<String>, entity_type: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            source: source.into(),
            entity_type: entity_type.into(),
            records,
            id_field: "id".to_string(),
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }
}

/// End-to-end relationship mining over multi-source records
pub struct KnowledgeMiningService {
    validator: EntityValidator,
    detector: ChangeDetector,
    resolver: MultiSourceEntityResolver,
    builder: RelationshipBuilder,
    multi_hop: MultiHopRelationshipDiscoverer,
    patterns: GraphPatternRecognizer,
    temporal: TemporalRelationshipAnalyzer,
    sink: Arc<dyn GraphSink>,
    page_size: usize,
    /// Audit trail across runs
    events: RwLock<Vec<MiningEvent>>,
}

impl KnowledgeMiningService {
    /// Create a service with default configuration
    pub fn new(store: Arc<dyn StateStore>, sink: Arc<dyn GraphSink>) -> Result<Self> {
        Self::with_config(store, sink, &RelMineConfig::default())
    }

    /// Create a service from a full configuration
    ///
    /// Fails when a format regex does not compile or the merge strategy is
    /// unknown.
    pub fn with_config(store: Arc<dyn StateStore>, sink: Arc<dyn GraphSink>, config: &RelMineConfig) -> Result<Self> {
        Ok(Self {
            validator: EntityValidator::with_config(config.validation.clone())?,
            detector: ChangeDetector::with_config(store, config.changes.clone()),
            resolver: MultiSourceEntityResolver::with_config(config.resolution.clone())?,
            builder: RelationshipBuilder::with_config(config.relationships.clone()),
            multi_hop: MultiHopRelationshipDiscoverer::with_config(config.multi_hop.clone()),
            patterns: GraphPatternRecognizer::with_config(config.patterns.clone()),
            temporal: TemporalRelationshipAnalyzer::with_config(config.temporal.clone()),
            sink,
            page_size: DEFAULT_PAGE_SIZE,
            events: RwLock::new(Vec::new()),
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The change detector, for history and rollback queries
    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn builder(&self) -> &RelationshipBuilder {
        &self.builder
    }

    pub fn temporal(&self) -> &TemporalRelationshipAnalyzer {
        &self.temporal
    }

    /// Pull every record of `entity_type` from a connector
    pub async fn ingest(
        &self,
        connector: &dyn SourceConnector,
        entity_type: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<SourceBatch> {
        let mut request = FetchRequest::new(self.page_size);
        if let Some(since) = since {
            request = request.since(since);
        }

        let records = connector.fetch_all(entity_type, &request).await?;
        info!(
            source = %connector.source_name(),
            entity_type = %entity_type,
            records = records.len(),
            "Ingested records"
        );

        Ok(SourceBatch::new(connector.source_name(), entity_type, records))
    }

    /// Mine one set of batches and persist the result
    ///
    /// `events` feed temporal analysis; events recorded against an id from
    /// any contributing source are attributed to the resolved entity.
    pub async fn mine(&self, batches: &[SourceBatch], events: &[EntityEvent]) -> Result<MiningOutput> {
        let mut audit = Vec::new();

        let candidates = self.entities_from_batches(batches);

        let results = self.validator.validate_batch(&candidates);
        let mut accepted = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();
        for (entity, result) in candidates.into_iter().zip(results) {
            if result.is_valid {
                accepted.push(entity);
                continue;
            }
            let reasons = result
                .errors
                .iter()
                .map(|issue| format!("{}: {}", issue.field, issue.message))
                .collect();
            debug!(entity_id = %entity.id, errors = result.errors.len(), "Entity rejected");
            audit.push(MiningEvent::entity_rejected(&entity.id, entity.entity_type, reasons));
            rejected.push(result);
        }
        if !rejected.is_empty() {
            warn!(rejected = rejected.len(), "Invalid entities excluded from mining");
        }

        let changes = self.detect_changes(&accepted, &mut audit).await?;

        let report = self.resolver.resolve_with_report(&accepted, true);
        for group in report.groups.iter().filter(|g| g.merged_ids.len() > 1) {
            audit.push(MiningEvent::entities_merged(&group.canonical_id, group.merged_ids.clone()));
        }
        let entities = report.entities;

        let base = self.builder.build_relationships(&entities, None)?;
        audit.push(MiningEvent::relationships_built(base.len()));

        let indirect = self.multi_hop.discover_multi_hop(&entities, &base, None);
        let patterns = self.patterns.recognize_patterns(&entities, &base);
        let temporal = self
            .temporal
            .analyze(&entities, &attribute_events(&entities, events));

        let mut discovered: BTreeMap<RelationshipType, usize> = BTreeMap::new();
        for relationship in indirect.iter().chain(&temporal.relationships) {
            *discovered.entry(relationship.relationship_type).or_default() += 1;
        }
        for (relationship_type, count) in discovered {
            audit.push(MiningEvent::relationships_discovered(relationship_type, count));
        }
        for (pattern_type, count) in count_patterns(&patterns) {
            audit.push(MiningEvent::patterns_recognized(pattern_type, count));
        }

        let relationships = union(base.into_iter().chain(indirect).chain(temporal.relationships));
        audit.push(MiningEvent::run_completed(entities.len(), relationships.len(), patterns.len()));

        let output = MiningOutput {
            entities,
            relationships,
            patterns,
            correlations: temporal.correlations,
            changes,
            rejected,
            events: audit,
        };

        self.sink.persist(&output).await?;
        self.events.write().extend(output.events.iter().cloned());

        info!(
            entities = output.entities.len(),
            relationships = output.relationships.len(),
            patterns = output.patterns.len(),
            correlations = output.correlations.len(),
            changes = output.changes.len(),
            rejected = output.rejected.len(),
            "Mining run completed"
        );

        Ok(output)
    }

    /// Every audit event recorded so far
    pub fn get_events(&self) -> Vec<MiningEvent> {
        self.events.read().clone()
    }

    pub fn clear_events(&self) {
        self.events.write().clear();
    }

    fn entities_from_batches(&self, batches: &[SourceBatch]) -> Vec<Entity> {
        let mut entities = Vec::new();

        for batch in batches {
            let Some(entity_type) = EntityType::parse(&batch.entity_type) else {
                warn!(
                    source = %batch.source,
                    entity_type = %batch.entity_type,
                    records = batch.records.len(),
                    "Skipping batch with unknown entity type"
                );
                continue;
            };

            let before = entities.len();
            entities.extend(
                batch
                    .records
                    .iter()
                    .filter_map(|record| Entity::from_record(batch.source.as_str(), entity_type, record, &batch.id_field)),
            );

            let skipped = batch.records.len() - (entities.len() - before);
            if skipped > 0 {
                warn!(
                    source = %batch.source,
                    entity_type = %entity_type,
                    skipped,
                    "Skipping records without an id"
                );
            }
        }

        entities
    }

    async fn detect_changes(&self, entities: &[Entity], audit: &mut Vec<MiningEvent>) -> Result<Vec<Change>> {
        let mut by_type: BTreeMap<EntityType, Vec<Record>> = BTreeMap::new();
        for entity in entities {
            by_type.entry(entity.entity_type).or_default().push(entity_record(entity));
        }

        let mut all = Vec::new();
        for (entity_type, records) in by_type {
            let changes = self.detector.detect_changes(entity_type.as_str(), &records).await?;
            let count = |operation: ChangeOperation| changes.iter().filter(|c| c.operation == operation).count();
            audit.push(MiningEvent::changes_detected(
                entity_type.as_str(),
                count(ChangeOperation::Create),
                count(ChangeOperation::Update),
                count(ChangeOperation::Delete),
            ));
            all.extend(changes);
        }

        Ok(all)
    }
}

/// Entity flattened back into a record keyed by `id`
fn entity_record(entity: &Entity) -> Record {
    let mut record: Record = entity
        .attributes
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    record.insert("id".to_string(), serde_json::Value::String(entity.id.clone()));
    record
}

/// Re-key events recorded against source ids onto the resolved entity ids
fn attribute_events(entities: &[Entity], events: &[EntityEvent]) -> Vec<EntityEvent> {
    let mut aliases: HashMap<&str, &str> = HashMap::new();
    for entity in entities {
        for source_id in entity.source_ids.values() {
            aliases.entry(source_id.as_str()).or_insert(entity.id.as_str());
        }
    }
    for entity in entities {
        aliases.insert(entity.id.as_str(), entity.id.as_str());
    }

    events
        .iter()
        .map(|event| {
            let mut event = event.clone();
            if let Some(canonical) = aliases.get(event.entity_id.as_str()) {
                event.entity_id = canonical.to_string();
            }
            event
        })
        .collect()
}

fn count_patterns(patterns: &[GraphPattern]) -> BTreeMap<PatternType, usize> {
    let mut counts = BTreeMap::new();
    for pattern in patterns {
        *counts.entry(pattern.pattern_type).or_default() += 1;
    }
    counts
}

/// Deduplicate by relationship id keeping the most confident, sorted by id
fn union(relationships: impl IntoIterator<Item = Relationship>) -> Vec<Relationship> {
    let mut by_id: BTreeMap<String, Relationship> = BTreeMap::new();
    for relationship in relationships {
        match by_id.get(&relationship.id) {
            Some(existing) if existing.confidence >= relationship.confidence => {}
            _ => {
                by_id.insert(relationship.id.clone(), relationship);
            }
        }
    }
    by_id.into_values().collect()
}
