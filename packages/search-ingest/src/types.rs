use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::fetcher::HttpMethod;

/// Unique identifier for a search run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchRunId(pub Uuid);

impl SearchRunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SearchRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SearchRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a search run.
///
/// Transitions are one-way: `Running -> Completed` or `Running -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// One durable run per distinct (source, endpoint, filter fingerprint).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRun {
    pub id: SearchRunId,
    pub source: String,
    pub endpoint: String,
    pub filters: Value,
    pub filter_hash: String,
    pub status: RunStatus,
    /// Upstream-reported total, capped at the run's max-records ceiling.
    pub total: i64,
    pub fetched_count: i64,
    pub block_keys: Vec<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SearchRun {
    pub fn new(
        source: String,
        endpoint: String,
        filters: Value,
        filter_hash: String,
        metadata: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SearchRunId::new(),
            source,
            endpoint,
            filters,
            filter_hash,
            status: RunStatus::Running,
            total: 0,
            fetched_count: 0,
            block_keys: Vec::new(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One durable row per flushed block of a run. Append-only; never mutated
/// after the checksum is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBlock {
    pub search_id: SearchRunId,
    /// 1-based, strictly increasing, no gaps within a run.
    pub block_index: i32,
    pub key: String,
    pub record_count: i64,
    pub checksum: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Best-effort property extraction from an upstream record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFields {
    pub external_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

/// Best-effort owner/contact extraction from an upstream record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactFields {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Canonical triple produced by the normalizer. Only ever persisted inside a
/// block payload; `raw` keeps the untouched upstream record for reprocessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub property: PropertyFields,
    pub contact: ContactFields,
    pub raw: Value,
}

/// Caller-facing request for one paginated search. Unset fields fall back to
/// the pipeline's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub endpoint: String,
    #[serde(default)]
    pub method: Option<HttpMethod>,
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default)]
    pub page_param: Option<String>,
    #[serde(default)]
    pub limit_param: Option<String>,
    #[serde(default)]
    pub max_records: Option<i64>,
    #[serde(default)]
    pub block_size: Option<usize>,
    #[serde(default)]
    pub page_size: Option<i64>,
}

impl SearchRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: None,
            filters: None,
            page_param: None,
            limit_param: None,
            max_records: None,
            block_size: None,
            page_size: None,
        }
    }

    pub fn with_filters(mut self, filters: Value) -> Self {
        self.filters = Some(filters);
        self
    }
}

/// Summary of one flushed block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub key: String,
    pub checksum: String,
    pub record_count: i64,
}

/// What the pipeline returns to callers, for fresh and cached runs alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub search_id: SearchRunId,
    pub total: i64,
    pub fetched: i64,
    pub block_keys: Vec<String>,
    pub blocks: Vec<BlockSummary>,
    pub status: RunStatus,
}
