//! Relationship mining over multi-source entity records
//!
//! Records describing the same customers, people, teams and projects arrive
//! from several source systems. This module turns them into one knowledge
//! graph:
//!
//! - **Validation**: schema, format and business-rule checks per entity type
//! - **Resolution**: duplicates across sources merge into canonical entities
//! - **Relationship building**: explicit id references, time ordering and
//!   shared attributes become edges
//! - **Multi-hop discovery**: indirect connections through intermediate
//!   entities, scored and bounded by hop count
//! - **Pattern recognition**: hubs, stars, triangles, chains and communities
//! - **Temporal analysis**: lagged correlation and causality between
//!   entities' event streams
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ SourceConnector → records → EntityValidator → ChangeDetector  │
//! └───────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌───────────────────────────────────────────────────────────────┐
//! │      MultiSourceEntityResolver → RelationshipBuilder          │
//! └───────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌───────────────────────────────────────────────────────────────┐
//! │ MultiHop │ GraphPatternRecognizer │ TemporalRelationshipAnalyzer │
//! └───────────────────────────────────────────────────────────────┘
//!                               ↓
//!                    union → GraphSink::persist
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use relmine_core::domain::changes::InMemoryStateStore;
//! use relmine_core::domain::knowledge::{InMemoryGraphSink, KnowledgeMiningService, SourceBatch};
//!
//! let service = KnowledgeMiningService::new(
//!     Arc::new(InMemoryStateStore::new()),
//!     Arc::new(InMemoryGraphSink::new()),
//! )?;
//!
//! let batch = service.ingest(&crm_connector, "customer", None).await?;
//! let output = service.mine(&[batch], &events).await?;
//! for relationship in output.relationships_for("cust_001") {
//!     println!("{} -[{}]-> {}", relationship.source_id, relationship.relationship_type, relationship.target_id);
//! }
//! ```

mod builder;
mod community;
mod entity;
mod event;
mod graph;
mod multihop;
mod patterns;
mod relationship;
mod resolver;
mod service;
mod sink;
mod temporal;
mod validator;

pub use builder::{
    DiscoveryContext, ExplicitRule, RelationshipBuilder, RelationshipConfig, SemanticRule, TemporalRule,
};
pub use community::{CommunityDetector, modularity};
pub use entity::{Entity, EntityType, parse_timestamp};
pub use event::MiningEvent;
pub use graph::{EntityGraph, GraphEdge};
pub use multihop::{CascadeRule, MultiHopConfig, MultiHopRelationshipDiscoverer, PathAnalysis};
pub use patterns::{
    GraphPattern, GraphPatternRecognizer, ImportanceScoring, PatternConfig, PatternMetadata, PatternType,
};
pub use relationship::{Direction, Relationship, RelationshipType, Strength};
pub use resolver::{
    MatchSignal, MergeGroup, MergeStrategy, MultiSourceEntityResolver, ResolutionConfig, ResolutionReport,
    similarity_ratio,
};
pub use service::{DEFAULT_PAGE_SIZE, KnowledgeMiningService, SourceBatch};
pub use sink::{GraphSink, InMemoryGraphSink, MiningOutput};
pub use temporal::{
    EntityEvent, GapFill, TemporalAnalysis, TemporalCluster, TemporalConfig, TemporalCorrelation,
    TemporalRelationshipAnalyzer,
};
pub use validator::{
    BusinessRule, EntitySchema, EntityValidator, FieldType, FormatKind, IssueKind, NumericRange,
    ValidationConfig, ValidationIssue, ValidationResult, ValidationRules, default_format_patterns,
    default_rules,
};
