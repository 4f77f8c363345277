//! Source connector interface
//!
//! Connectors yield normalized field -> value records for one entity type,
//! possibly paginated, optionally filtered by a `since` timestamp or by
//! equality filters. Real connectors (CRM, billing, ticketing) live outside
//! this crate; [`StaticSourceConnector`] serves in-memory records for tests
//! and embedding.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

use crate::domain::changes::Record;

/// Failures a source connector can signal
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Source does not provide entity type '{0}'")]
    UnknownEntityType(String),

    #[error("Source authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Source rate limited the request, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

impl ConnectorError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownEntityType(_) => "E300",
            Self::AuthenticationFailed(_) => "E301",
            Self::RateLimited { .. } => "E302",
            Self::Unavailable(_) => "E303",
        }
    }
}

/// Parameters for one page request
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    /// Only return records modified at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Equality filters on record fields
    pub filters: BTreeMap<String, Value>,
    /// Opaque continuation cursor returned by the previous page
    pub cursor: Option<String>,
    /// Maximum records per page
    pub page_size: usize,
}

impl FetchRequest {
    /// Create a request with the given page size
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            ..Self::default()
        }
    }

    /// Restrict to records changed since the given instant
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Add an equality filter
    pub fn with_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.insert(field.into(), value);
        self
    }
}

/// One page of records returned by a connector
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub records: Vec<Record>,
    /// Cursor for the next page, `None` when exhausted
    pub next_cursor: Option<String>,
}

/// A source system that produces records for entity types
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Name of the source system, used as the key in `Entity::source_ids`
    fn source_name(&self) -> &str;

    /// Fetch one page of records
    async fn fetch_page(
        &self,
        entity_type: &str,
        request: &FetchRequest,
    ) -> Result<SourcePage, ConnectorError>;

    /// Fetch every page, following cursors until exhausted
    async fn fetch_all(
        &self,
        entity_type: &str,
        request: &FetchRequest,
    ) -> Result<Vec<Record>, ConnectorError> {
        let mut records = Vec::new();
        let mut request = request.clone();

        loop {
            let page = self.fetch_page(entity_type, &request).await?;
            records.extend(page.records);
            match page.next_cursor {
                Some(cursor) => request.cursor = Some(cursor),
                None => break,
            }
        }

        Ok(records)
    }
}

/// Connector serving records held in memory
#[derive(Debug, Default)]
pub struct StaticSourceConnector {
    name: String,
    records: RwLock<BTreeMap<String, Vec<Record>>>,
    updated_field: String,
}

impl StaticSourceConnector {
    /// Create an empty connector for the named source
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(BTreeMap::new()),
            updated_field: "updated_at".to_string(),
        }
    }

    /// Replace the records served for an entity type
    pub fn with_records(self, entity_type: impl Into<String>, records: Vec<Record>) -> Self {
        self.records.write().insert(entity_type.into(), records);
        self
    }

    /// Field holding the RFC 3339 modification time used by `since`
    pub fn with_updated_field(mut self, field: impl Into<String>) -> Self {
        self.updated_field = field.into();
        self
    }

    fn matches(&self, record: &Record, request: &FetchRequest) -> bool {
        if let Some(since) = request.since {
            let updated = record
                .get(&self.updated_field)
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            match updated {
                Some(ts) if ts >= since => {}
                _ => return false,
            }
        }

        request
            .filters
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
    }
}

#[async_trait]
impl SourceConnector for StaticSourceConnector {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(
        &self,
        entity_type: &str,
        request: &FetchRequest,
    ) -> Result<SourcePage, ConnectorError> {
        let records = self.records.read();
        let all = records
            .get(entity_type)
            .ok_or_else(|| ConnectorError::UnknownEntityType(entity_type.to_string()))?;

        let matching: Vec<&Record> = all.iter().filter(|r| self.matches(r, request)).collect();
        let offset = request
            .cursor
            .as_deref()
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let page_size = request.page_size.max(1);
        let end = (offset + page_size).min(matching.len());

        let page_records = matching
            .get(offset..end)
            .map(|slice| slice.iter().map(|r| (*r).clone()).collect())
            .unwrap_or_default();
        let next_cursor = (end < matching.len()).then(|| end.to_string());

        Ok(SourcePage {
            records: page_records,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn connector() -> StaticSourceConnector {
        StaticSourceConnector::new("crm").with_records(
            "Customer",
            vec![
                record(json!({"id": "1", "status": "active", "updated_at": "2024-01-01T00:00:00Z"})),
                record(json!({"id": "2", "status": "churned", "updated_at": "2024-02-01T00:00:00Z"})),
                record(json!({"id": "3", "status": "active", "updated_at": "2024-03-01T00:00:00Z"})),
            ],
        )
    }

    #[tokio::test]
    async fn test_fetch_all_follows_cursors() {
        let records = connector()
            .fetch_all("Customer", &FetchRequest::new(2))
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_since_and_filters() {
        let since = DateTime::parse_from_rfc3339("2024-01-15T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let request = FetchRequest::new(10)
            .since(since)
            .with_filter("status", json!("active"));

        let records = connector().fetch_all("Customer", &request).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], json!("3"));
    }

    #[tokio::test]
    async fn test_unknown_entity_type() {
        let err = connector()
            .fetch_page("Widget", &FetchRequest::new(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::UnknownEntityType(t) if t == "Widget"));
    }
}
