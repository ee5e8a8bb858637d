//! Store Capability
//!
//! The gateway core never talks to a concrete backend directly; it
//! consumes this capability trait. The production binding lives in
//! `layer2_external_services::redis_store_island`; an in-process
//! implementation in [`memory`] serves as reference semantics and the
//! test harness.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::service_islands::layer5_business_logic::shared::error::GatewayResult;

pub mod memory;

/// One operation inside a pipelined call
#[derive(Debug, Clone)]
pub enum StoreOp {
    Get {
        key: String,
    },
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Del {
        keys: Vec<String>,
    },
    HGet {
        hash: String,
        field: String,
    },
    HSet {
        hash: String,
        field: String,
        value: String,
    },
    JsonGet {
        key: String,
        path: String,
    },
    JsonSet {
        key: String,
        path: String,
        value: serde_json::Value,
    },
}

impl StoreOp {
    /// Operation kind label used for grouping and logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Get { .. } => "GET",
            Self::Set { .. } => "SET",
            Self::Del { .. } => "DEL",
            Self::HGet { .. } => "HGET",
            Self::HSet { .. } => "HSET",
            Self::JsonGet { .. } => "JSON.GET",
            Self::JsonSet { .. } => "JSON.SET",
        }
    }
}

/// Per-operation result of a pipelined call
///
/// A failed operation becomes `Error` without poisoning its neighbors.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreReply {
    Nil,
    Ok,
    Text(String),
    Int(i64),
    Json(serde_json::Value),
    Error(String),
}

impl StoreReply {
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Field definitions for a search index
#[derive(Debug, Clone)]
pub enum FieldSchema {
    Tag { name: String },
    Text { name: String },
    Numeric { name: String },
    Vector { name: String, dimension: usize },
}

/// Search index schema; vector fields use cosine distance
#[derive(Debug, Clone)]
pub struct IndexSchema {
    /// Key prefix the index covers
    pub prefix: String,
    pub fields: Vec<FieldSchema>,
}

/// KNN clause of a vector search
#[derive(Debug, Clone)]
pub struct KnnSpec {
    /// Vector field to search
    pub field: String,
    pub k: usize,
    pub vector: Vec<f32>,
    /// Search-list size override for approximate KNN graphs
    pub ef_runtime: Option<usize>,
    /// Result field that receives the cosine distance
    pub score_alias: String,
}

/// Sort clause for search results
#[derive(Debug, Clone)]
pub struct SortBy {
    pub field: String,
    pub ascending: bool,
}

/// Typed search options; the backend renders these into its own syntax
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub knn: Option<KnnSpec>,
    /// Fields to return; empty means all stored fields
    pub return_fields: Vec<String>,
    pub sort_by: Option<SortBy>,
    pub offset: usize,
    pub limit: usize,
}

/// One matched document
#[derive(Debug, Clone)]
pub struct SearchDoc {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl SearchDoc {
    /// Parse a field as f64, if present
    #[must_use]
    pub fn field_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(|v| v.parse().ok())
    }
}

/// Search reply: total matched plus the returned page
#[derive(Debug, Clone, Default)]
pub struct SearchReply {
    pub total: u64,
    pub docs: Vec<SearchDoc>,
}

/// Timeseries creation options
#[derive(Debug, Clone)]
pub struct TimeseriesOptions {
    pub retention_ms: u64,
    /// Duplicate policy; metric series use last-writer-wins
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    Last,
    First,
    Max,
    Min,
}

impl DuplicatePolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Last => "LAST",
            Self::First => "FIRST",
            Self::Max => "MAX",
            Self::Min => "MIN",
        }
    }
}

/// Vector-capable key-value store capability
///
/// Every method is safe to call concurrently. Implementations surface
/// failures as `GatewayError::Store`.
#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> GatewayResult<()>;

    async fn get(&self, key: &str) -> GatewayResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> GatewayResult<()>;

    /// Returns the number of keys removed
    async fn del(&self, keys: &[String]) -> GatewayResult<u64>;

    async fn hget(&self, hash: &str, field: &str) -> GatewayResult<Option<String>>;

    async fn hset(&self, hash: &str, field: &str, value: &str) -> GatewayResult<()>;

    async fn hgetall(&self, hash: &str) -> GatewayResult<HashMap<String, String>>;

    /// Glob-style key listing; `*` matches any run of characters
    async fn keys_by_pattern(&self, pattern: &str) -> GatewayResult<Vec<String>>;

    /// Approximate memory footprint of a key in bytes
    async fn memory_usage(&self, key: &str) -> GatewayResult<u64>;

    async fn json_get(&self, key: &str, path: &str) -> GatewayResult<Option<serde_json::Value>>;

    async fn json_set(
        &self,
        key: &str,
        path: &str,
        value: &serde_json::Value,
    ) -> GatewayResult<()>;

    async fn json_num_incr_by(&self, key: &str, path: &str, by: f64) -> GatewayResult<f64>;

    /// Execute operations as one round trip; replies are positional
    async fn pipeline(&self, ops: Vec<StoreOp>) -> GatewayResult<Vec<StoreReply>>;

    /// Create a search index; succeeds silently when it already exists
    async fn ft_create(&self, index: &str, schema: &IndexSchema) -> GatewayResult<()>;

    /// Run a search. `query` carries the filter expression (`*`, or tag
    /// filters like `@contentType:{image}`); the KNN clause and paging
    /// come from `opts`.
    async fn ft_search(
        &self,
        index: &str,
        query: &str,
        opts: &SearchOptions,
    ) -> GatewayResult<SearchReply>;

    async fn ts_create(&self, key: &str, opts: &TimeseriesOptions) -> GatewayResult<()>;

    async fn ts_add(&self, key: &str, ts_ms: i64, value: f64) -> GatewayResult<()>;

    async fn ts_range(&self, key: &str, from_ms: i64, to_ms: i64)
        -> GatewayResult<Vec<(i64, f64)>>;
}

/// Produces fresh store sessions for the connection pool
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> GatewayResult<Arc<dyn Store>>;
}
