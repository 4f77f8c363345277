//! Relmine Core Library
//!
//! Relationship mining for knowledge graphs built from several source
//! systems:
//! - Entity validation against per-type schemas
//! - Snapshot-based change detection with history and rollback
//! - Cross-source entity resolution and merging
//! - Explicit, temporal and semantic relationship building
//! - Multi-hop discovery, graph pattern recognition and temporal correlation
//! - An end-to-end mining service over pluggable sources, state stores and sinks

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;

#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod error_tests;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{AnalysisCache, InMemoryCache, NoopCache};
    pub use crate::config::RelMineConfig;
    pub use crate::domain::changes::{Change, ChangeDetector, ChangeOperation, InMemoryStateStore, Record, StateStore};
    pub use crate::domain::knowledge::{
        Entity, EntityEvent, EntityType, EntityValidator, GraphPattern, GraphPatternRecognizer, GraphSink,
        InMemoryGraphSink, KnowledgeMiningService, MiningOutput, MultiHopRelationshipDiscoverer,
        MultiSourceEntityResolver, Relationship, RelationshipBuilder, RelationshipType, SourceBatch,
        TemporalRelationshipAnalyzer,
    };
    pub use crate::domain::sources::{SourceConnector, StaticSourceConnector};
    pub use crate::error::{Error, Result};
}
