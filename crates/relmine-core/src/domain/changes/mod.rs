//! Change detection over entity-collection snapshots
//!
//! The detector diffs the current records of an entity type against the
//! latest [`Snapshot`] held by a [`StateStore`], scores each [`Change`] for
//! business significance, persists the new snapshot and journals the
//! changes so per-entity history and rollback work across runs.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use relmine_core::domain::changes::{ChangeDetector, InMemoryStateStore};
//!
//! let detector = ChangeDetector::new(Arc::new(InMemoryStateStore::new()));
//! let changes = detector.detect_changes("Customer", &records).await?;
//! let history = detector.get_entity_history("Customer", "cust_001", 10).await?;
//! ```

mod change;
mod detector;
mod snapshot;
mod store;

pub use change::{Change, ChangeOperation};
pub use detector::{ChangeDetectionConfig, ChangeDetector, DetectOptions, RollbackResult};
pub use snapshot::{Record, Snapshot, record_checksum, record_id};
pub use store::{InMemoryStateStore, StateStore};
