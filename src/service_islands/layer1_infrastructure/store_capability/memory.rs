//! In-Process Store
//!
//! Reference implementation of the [`Store`] capability backed by
//! process memory. Semantics mirror the production Redis binding:
//! TTL expiry on read, glob key listing, JSON documents with `$` and
//! `$.field` paths, and brute-force cosine KNN over indexed prefixes.
//!
//! Cloned handles share the same backing data, the same way multiple
//! connections address one server. Call counters and a fault switch
//! make it usable as a test harness for the data-plane islands.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{
    ConnectionFactory, DuplicatePolicy, IndexSchema, SearchDoc, SearchOptions, SearchReply,
    Store, StoreOp, StoreReply, TimeseriesOptions,
};
use crate::service_islands::layer5_business_logic::shared::error::{
    GatewayError, GatewayResult,
};

/// Stored value variants
#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Hash(HashMap<String, String>),
    Json(serde_json::Value),
    Series {
        points: Vec<(i64, f64)>,
        retention_ms: u64,
        duplicate_policy: DuplicatePolicy,
    },
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
struct MemoryShared {
    data: DashMap<String, StoredEntry>,
    indices: DashMap<String, IndexSchema>,
    fail_mode: AtomicBool,
    get_calls: AtomicU64,
    pipeline_calls: AtomicU64,
    search_calls: AtomicU64,
}

/// In-memory [`Store`] implementation
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<MemoryShared>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force every subsequent call to fail with a store error
    pub fn set_fail_mode(&self, fail: bool) {
        self.shared.fail_mode.store(fail, Ordering::SeqCst);
    }

    /// Number of single-key GETs served
    #[must_use]
    pub fn get_calls(&self) -> u64 {
        self.shared.get_calls.load(Ordering::SeqCst)
    }

    /// Number of pipelined round trips served
    #[must_use]
    pub fn pipeline_calls(&self) -> u64 {
        self.shared.pipeline_calls.load(Ordering::SeqCst)
    }

    /// Number of FT searches served
    #[must_use]
    pub fn search_calls(&self) -> u64 {
        self.shared.search_calls.load(Ordering::SeqCst)
    }

    fn check_fail(&self) -> GatewayResult<()> {
        if self.shared.fail_mode.load(Ordering::SeqCst) {
            return Err(GatewayError::Store("injected store failure".to_string()));
        }
        Ok(())
    }

    /// Fetch a live (unexpired) entry, dropping it when expired
    fn live_entry(&self, key: &str) -> Option<StoredValue> {
        let expired = match self.shared.data.get(key) {
            Some(entry) if entry.expired() => true,
            Some(entry) => return Some(entry.value.clone()),
            None => return None,
        };
        if expired {
            self.shared.data.remove(key);
        }
        None
    }

    fn glob_match(pattern: &str, key: &str) -> bool {
        match pattern.find('*') {
            None => pattern == key,
            Some(pos) => {
                let (prefix, rest) = pattern.split_at(pos);
                let suffix = &rest[1..];
                key.len() >= prefix.len() + suffix.len()
                    && key.starts_with(prefix)
                    && key.ends_with(suffix)
            }
        }
    }

    /// Apply a tag-filter expression to a JSON document.
    ///
    /// Supports `*` and whitespace-separated `@field:{value}` clauses,
    /// which is the subset the gateway emits.
    fn matches_filter(doc: &serde_json::Value, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() || query == "*" {
            return true;
        }
        query.split_whitespace().all(|clause| {
            let Some(stripped) = clause.strip_prefix('@') else {
                return true;
            };
            let Some((field, rest)) = stripped.split_once(":{") else {
                return true;
            };
            let Some(expected) = rest.strip_suffix('}') else {
                return true;
            };
            doc.get(field)
                .map(|v| match v {
                    serde_json::Value::String(s) => s == expected,
                    other => other.to_string() == expected,
                })
                .unwrap_or(false)
        })
    }

    fn json_at_path(doc: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
        if path == "$" || path.is_empty() {
            return Some(doc.clone());
        }
        let field = path.strip_prefix("$.")?;
        let mut cursor = doc;
        for part in field.split('.') {
            cursor = cursor.get(part)?;
        }
        Some(cursor.clone())
    }

    fn json_set_path(
        doc: &mut serde_json::Value,
        path: &str,
        value: serde_json::Value,
    ) -> GatewayResult<()> {
        if path == "$" || path.is_empty() {
            *doc = value;
            return Ok(());
        }
        let Some(field) = path.strip_prefix("$.") else {
            return Err(GatewayError::Store(format!("unsupported JSON path: {path}")));
        };
        let mut cursor = doc;
        let parts: Vec<&str> = field.split('.').collect();
        for (i, part) in parts.iter().enumerate() {
            if !cursor.is_object() {
                *cursor = serde_json::json!({});
            }
            let map = cursor
                .as_object_mut()
                .ok_or_else(|| GatewayError::Store("not a JSON object".to_string()))?;
            if i == parts.len() - 1 {
                map.insert((*part).to_string(), value);
                return Ok(());
            }
            cursor = map
                .entry((*part).to_string())
                .or_insert_with(|| serde_json::json!({}));
        }
        Ok(())
    }

    fn execute_op(&self, op: StoreOp) -> StoreReply {
        let result: GatewayResult<StoreReply> = match op {
            StoreOp::Get { key } => Ok(match self.live_entry(&key) {
                Some(StoredValue::Text(s)) => StoreReply::Text(s),
                _ => StoreReply::Nil,
            }),
            StoreOp::Set { key, value, ttl } => {
                self.store_text(&key, &value, ttl);
                Ok(StoreReply::Ok)
            }
            StoreOp::Del { keys } => {
                let mut removed = 0;
                for key in &keys {
                    if self.shared.data.remove(key).is_some() {
                        removed += 1;
                    }
                }
                Ok(StoreReply::Int(removed))
            }
            StoreOp::HGet { hash, field } => Ok(match self.live_entry(&hash) {
                Some(StoredValue::Hash(map)) => map
                    .get(&field)
                    .map_or(StoreReply::Nil, |v| StoreReply::Text(v.clone())),
                _ => StoreReply::Nil,
            }),
            StoreOp::HSet { hash, field, value } => {
                self.store_hash_field(&hash, &field, &value);
                Ok(StoreReply::Ok)
            }
            StoreOp::JsonGet { key, path } => Ok(match self.live_entry(&key) {
                Some(StoredValue::Json(doc)) => Self::json_at_path(&doc, &path)
                    .map_or(StoreReply::Nil, StoreReply::Json),
                _ => StoreReply::Nil,
            }),
            StoreOp::JsonSet { key, path, value } => {
                self.store_json_path(&key, &path, value).map(|()| StoreReply::Ok)
            }
        };
        result.unwrap_or_else(|e| StoreReply::Error(e.to_string()))
    }

    fn store_text(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.shared.data.insert(
            key.to_string(),
            StoredEntry {
                value: StoredValue::Text(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
    }

    fn store_hash_field(&self, hash: &str, field: &str, value: &str) {
        let mut entry = self
            .shared
            .data
            .entry(hash.to_string())
            .or_insert_with(|| StoredEntry {
                value: StoredValue::Hash(HashMap::new()),
                expires_at: None,
            });
        if let StoredValue::Hash(map) = &mut entry.value {
            map.insert(field.to_string(), value.to_string());
        } else {
            entry.value = StoredValue::Hash(HashMap::from([(
                field.to_string(),
                value.to_string(),
            )]));
        }
    }

    fn store_json_path(
        &self,
        key: &str,
        path: &str,
        value: serde_json::Value,
    ) -> GatewayResult<()> {
        let mut entry = self
            .shared
            .data
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry {
                value: StoredValue::Json(serde_json::json!({})),
                expires_at: None,
            });
        match &mut entry.value {
            StoredValue::Json(doc) => Self::json_set_path(doc, path, value),
            _ => {
                let mut doc = serde_json::json!({});
                Self::json_set_path(&mut doc, path, value)?;
                entry.value = StoredValue::Json(doc);
                Ok(())
            }
        }
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn vector_from_json(value: &serde_json::Value) -> Option<Vec<f32>> {
    value.as_array().map(|arr| {
        arr.iter()
            .filter_map(serde_json::Value::as_f64)
            .map(|v| v as f32)
            .collect()
    })
}

fn field_as_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> GatewayResult<()> {
        self.check_fail()
    }

    async fn get(&self, key: &str) -> GatewayResult<Option<String>> {
        self.check_fail()?;
        self.shared.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(match self.live_entry(key) {
            Some(StoredValue::Text(s)) => Some(s),
            _ => None,
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> GatewayResult<()> {
        self.check_fail()?;
        self.store_text(key, value, ttl);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> GatewayResult<u64> {
        self.check_fail()?;
        let mut removed = 0;
        for key in keys {
            if self.shared.data.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn hget(&self, hash: &str, field: &str) -> GatewayResult<Option<String>> {
        self.check_fail()?;
        Ok(match self.live_entry(hash) {
            Some(StoredValue::Hash(map)) => map.get(field).cloned(),
            _ => None,
        })
    }

    async fn hset(&self, hash: &str, field: &str, value: &str) -> GatewayResult<()> {
        self.check_fail()?;
        self.store_hash_field(hash, field, value);
        Ok(())
    }

    async fn hgetall(&self, hash: &str) -> GatewayResult<HashMap<String, String>> {
        self.check_fail()?;
        Ok(match self.live_entry(hash) {
            Some(StoredValue::Hash(map)) => map,
            _ => HashMap::new(),
        })
    }

    async fn keys_by_pattern(&self, pattern: &str) -> GatewayResult<Vec<String>> {
        self.check_fail()?;
        let mut keys: Vec<String> = self
            .shared
            .data
            .iter()
            .filter(|entry| !entry.value().expired())
            .filter(|entry| Self::glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn memory_usage(&self, key: &str) -> GatewayResult<u64> {
        self.check_fail()?;
        Ok(self
            .shared
            .data
            .get(key)
            .map(|entry| {
                let value_len = match &entry.value {
                    StoredValue::Text(s) => s.len(),
                    StoredValue::Hash(map) => {
                        map.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>()
                    }
                    StoredValue::Json(doc) => doc.to_string().len(),
                    StoredValue::Series { points, .. } => points.len() * 16,
                };
                (key.len() + value_len) as u64
            })
            .unwrap_or(0))
    }

    async fn json_get(&self, key: &str, path: &str) -> GatewayResult<Option<serde_json::Value>> {
        self.check_fail()?;
        Ok(match self.live_entry(key) {
            Some(StoredValue::Json(doc)) => Self::json_at_path(&doc, path),
            _ => None,
        })
    }

    async fn json_set(
        &self,
        key: &str,
        path: &str,
        value: &serde_json::Value,
    ) -> GatewayResult<()> {
        self.check_fail()?;
        self.store_json_path(key, path, value.clone())
    }

    async fn json_num_incr_by(&self, key: &str, path: &str, by: f64) -> GatewayResult<f64> {
        self.check_fail()?;
        let mut entry = self
            .shared
            .data
            .get_mut(key)
            .ok_or_else(|| GatewayError::Store(format!("no such key: {key}")))?;
        let StoredValue::Json(doc) = &mut entry.value else {
            return Err(GatewayError::Store(format!("{key} is not a JSON document")));
        };
        let current = Self::json_at_path(doc, path)
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let updated = current + by;
        Self::json_set_path(doc, path, serde_json::json!(updated))?;
        Ok(updated)
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> GatewayResult<Vec<StoreReply>> {
        self.check_fail()?;
        self.shared.pipeline_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ops.into_iter().map(|op| self.execute_op(op)).collect())
    }

    async fn ft_create(&self, index: &str, schema: &IndexSchema) -> GatewayResult<()> {
        self.check_fail()?;
        self.shared
            .indices
            .entry(index.to_string())
            .or_insert_with(|| schema.clone());
        Ok(())
    }

    async fn ft_search(
        &self,
        index: &str,
        query: &str,
        opts: &SearchOptions,
    ) -> GatewayResult<SearchReply> {
        self.check_fail()?;
        self.shared.search_calls.fetch_add(1, Ordering::SeqCst);
        let schema = self
            .shared
            .indices
            .get(index)
            .ok_or_else(|| GatewayError::Store(format!("no such index: {index}")))?
            .clone();

        let mut matched: Vec<(String, serde_json::Value)> = self
            .shared
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(&schema.prefix))
            .filter(|entry| !entry.value().expired())
            .filter_map(|entry| match &entry.value().value {
                StoredValue::Json(doc) if Self::matches_filter(doc, query) => {
                    Some((entry.key().clone(), doc.clone()))
                }
                _ => None,
            })
            .collect();

        let mut scored: Vec<(String, serde_json::Value, Option<f64>)> =
            if let Some(knn) = &opts.knn {
                let mut with_distance: Vec<(String, serde_json::Value, Option<f64>)> = matched
                    .drain(..)
                    .filter_map(|(key, doc)| {
                        let vector = doc.get(&knn.field).and_then(vector_from_json)?;
                        let distance = cosine_distance(&vector, &knn.vector);
                        Some((key, doc, Some(distance)))
                    })
                    .collect();
                with_distance.sort_by(|a, b| {
                    a.2.unwrap_or(1.0)
                        .partial_cmp(&b.2.unwrap_or(1.0))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                with_distance.truncate(knn.k);
                with_distance
            } else {
                matched
                    .drain(..)
                    .map(|(key, doc)| (key, doc, None))
                    .collect()
            };

        if let Some(sort) = &opts.sort_by {
            scored.sort_by(|a, b| {
                let va = a.1.get(&sort.field).and_then(serde_json::Value::as_f64);
                let vb = b.1.get(&sort.field).and_then(serde_json::Value::as_f64);
                let ordering = va
                    .partial_cmp(&vb)
                    .unwrap_or(std::cmp::Ordering::Equal);
                if sort.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }

        let total = scored.len() as u64;
        let limit = if opts.limit == 0 { scored.len() } else { opts.limit };
        let page = scored
            .into_iter()
            .skip(opts.offset)
            .take(limit)
            .map(|(id, doc, distance)| {
                let mut fields = HashMap::new();
                if let Some(obj) = doc.as_object() {
                    for (name, value) in obj {
                        let wanted = opts.return_fields.is_empty()
                            || opts.return_fields.iter().any(|f| f == name);
                        if wanted {
                            fields.insert(name.clone(), field_as_string(value));
                        }
                    }
                }
                if let (Some(knn), Some(distance)) = (&opts.knn, distance) {
                    fields.insert(knn.score_alias.clone(), distance.to_string());
                }
                SearchDoc { id, fields }
            })
            .collect();

        Ok(SearchReply { total, docs: page })
    }

    async fn ts_create(&self, key: &str, opts: &TimeseriesOptions) -> GatewayResult<()> {
        self.check_fail()?;
        self.shared
            .data
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry {
                value: StoredValue::Series {
                    points: Vec::new(),
                    retention_ms: opts.retention_ms,
                    duplicate_policy: opts.duplicate_policy,
                },
                expires_at: None,
            });
        Ok(())
    }

    async fn ts_add(&self, key: &str, ts_ms: i64, value: f64) -> GatewayResult<()> {
        self.check_fail()?;
        let mut entry = self
            .shared
            .data
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry {
                value: StoredValue::Series {
                    points: Vec::new(),
                    retention_ms: 0,
                    duplicate_policy: DuplicatePolicy::Last,
                },
                expires_at: None,
            });
        let StoredValue::Series {
            points,
            retention_ms,
            duplicate_policy,
        } = &mut entry.value
        else {
            return Err(GatewayError::Store(format!("{key} is not a timeseries")));
        };
        match points.iter_mut().find(|(ts, _)| *ts == ts_ms) {
            Some(existing) => {
                if *duplicate_policy == DuplicatePolicy::Last {
                    existing.1 = value;
                }
            }
            None => {
                points.push((ts_ms, value));
                points.sort_by_key(|(ts, _)| *ts);
            }
        }
        if *retention_ms > 0 {
            let cutoff = ts_ms - *retention_ms as i64;
            points.retain(|(ts, _)| *ts >= cutoff);
        }
        Ok(())
    }

    async fn ts_range(
        &self,
        key: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> GatewayResult<Vec<(i64, f64)>> {
        self.check_fail()?;
        Ok(match self.live_entry(key) {
            Some(StoredValue::Series { points, .. }) => points
                .into_iter()
                .filter(|(ts, _)| *ts >= from_ms && *ts <= to_ms)
                .collect(),
            _ => Vec::new(),
        })
    }
}

/// Connection factory over a shared [`MemoryStore`]
///
/// Each `connect` hands out a handle onto the same backing data and
/// counts the session, so pool tests can assert creation behavior.
pub struct MemoryConnectionFactory {
    store: MemoryStore,
    connects: AtomicU64,
    fail_connects: AtomicBool,
}

impl MemoryConnectionFactory {
    #[must_use]
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            connects: AtomicU64::new(0),
            fail_connects: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn set_fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn connect(&self) -> GatewayResult<Arc<dyn Store>> {
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(GatewayError::Store("injected connect failure".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.store.clone()))
    }
}
