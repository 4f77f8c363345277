//! Error types for Relmine

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::sources::ConnectorError;

/// Result type alias using Relmine's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Relmine error types with helpful messages and suggestions
///
/// Bad input data is never reported through this type: records with missing
/// ids, unknown entity types and dangling references are skipped by the
/// component that sees them. Only configuration mistakes and collaborator
/// failures surface here.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (E001-E099)
    #[error("Unknown merge strategy '{0}'. Use one of: most_complete, most_recent, weighted.")]
    UnknownMergeStrategy(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid pattern for '{field}': {reason}")]
    InvalidPattern { field: String, reason: String },

    // State store errors (E100-E199)
    #[error("No snapshot of '{entity_type}' exists at or before {target}")]
    SnapshotNotFound {
        entity_type: String,
        target: DateTime<Utc>,
    },

    #[error("State store error: {0}")]
    StateStore(String),

    // Collaborator errors (E200-E299)
    #[error("Graph sink error: {0}")]
    GraphSink(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownMergeStrategy(_) => "E001",
            Self::InvalidFilter(_) => "E002",
            Self::InvalidPattern { .. } => "E004",
            Self::SnapshotNotFound { .. } => "E100",
            Self::StateStore(_) => "E101",
            Self::GraphSink(_) => "E200",
            Self::Connector(inner) => inner.code(),
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::UnknownMergeStrategy(_) => {
                Some("set resolution.merge_strategy to most_complete, most_recent or weighted".to_string())
            }
            Self::InvalidFilter(_) => Some("min_confidence must lie within 0.0..=1.0".to_string()),
            Self::InvalidPattern { field, .. } => {
                Some(format!("check the regex configured for validation.format_patterns.{}", field))
            }
            Self::SnapshotNotFound { entity_type, .. } => Some(format!(
                "run change detection for '{}' before rolling back",
                entity_type
            )),
            Self::Connector(ConnectorError::RateLimited { retry_after_secs }) => {
                Some(format!("retry after {} seconds", retry_after_secs))
            }
            Self::Connector(ConnectorError::AuthenticationFailed(_)) => {
                Some("refresh the source connector credentials".to_string())
            }
            _ => None,
        }
    }

    /// Whether this error is a configuration problem rather than a runtime failure
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownMergeStrategy(_)
                | Self::InvalidFilter(_)
                | Self::InvalidPattern { .. }
        )
    }
}
