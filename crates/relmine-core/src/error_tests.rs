//! Error module tests

use chrono::Utc;

use crate::domain::sources::ConnectorError;
use crate::error::{Error, Result};

#[test]
fn test_unknown_merge_strategy_error() {
    let error = Error::UnknownMergeStrategy("newest".to_string());
    assert_eq!(error.code(), "E001");
    assert!(error.to_string().contains("newest"));
    assert!(error.suggestion().unwrap().contains("most_complete"));
    assert!(error.is_config_error());
}

#[test]
fn test_invalid_filter_error() {
    let error = Error::InvalidFilter("min_confidence 1.5".to_string());
    assert_eq!(error.code(), "E002");
    assert!(error.is_config_error());
    assert!(error.suggestion().is_some());
}

#[test]
fn test_invalid_pattern_error() {
    let error = Error::InvalidPattern {
        field: "email".to_string(),
        reason: "unclosed group".to_string(),
    };
    assert_eq!(error.code(), "E004");
    assert!(error.to_string().contains("email"));
    assert!(error.suggestion().unwrap().contains("validation.format_patterns.email"));
}

#[test]
fn test_snapshot_not_found_error() {
    let error = Error::SnapshotNotFound {
        entity_type: "Customer".to_string(),
        target: Utc::now(),
    };
    assert_eq!(error.code(), "E100");
    assert!(!error.is_config_error());
    assert!(error.suggestion().unwrap().contains("Customer"));
}

#[test]
fn test_state_store_error() {
    let error = Error::StateStore("connection refused".to_string());
    assert_eq!(error.code(), "E101");
    assert_eq!(error.suggestion(), None);
}

#[test]
fn test_connector_errors_keep_their_codes() {
    let error: Error = ConnectorError::RateLimited {
        retry_after_secs: 30,
    }
    .into();
    assert_eq!(error.code(), "E302");
    assert_eq!(error.suggestion(), Some("retry after 30 seconds".to_string()));

    let error: Error = ConnectorError::AuthenticationFailed("token expired".into()).into();
    assert_eq!(error.code(), "E301");
    assert!(error.to_string().contains("token expired"));

    let error: Error = ConnectorError::UnknownEntityType("Widget".into()).into();
    assert_eq!(error.code(), "E300");
}

#[test]
fn test_result_alias() {
    fn fails() -> Result<()> {
        Err(Error::GraphSink("disk full".to_string()))
    }

    let error = fails().unwrap_err();
    assert_eq!(error.code(), "E200");
    assert_eq!(error.to_string(), "Graph sink error: disk full");
}
