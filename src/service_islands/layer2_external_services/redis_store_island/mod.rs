//! Redis Store Island
//!
//! Production binding of the [`Store`] capability over Redis with the
//! JSON, Search and TimeSeries modules. Typed search options are
//! rendered into RediSearch syntax and the positional FT.SEARCH reply
//! is parsed back into the typed form the gateway consumes.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::service_islands::layer1_infrastructure::store_capability::{
    ConnectionFactory, FieldSchema, IndexSchema, SearchDoc, SearchOptions, SearchReply, Store,
    StoreOp, StoreReply, TimeseriesOptions,
};
use crate::service_islands::layer5_business_logic::shared::error::{
    GatewayError, GatewayResult,
};

/// Redis-backed [`Store`]
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at the given URL
    ///
    /// # Errors
    ///
    /// Returns `Store` when the connection cannot be established.
    pub async fn connect(url: &str) -> GatewayResult<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(url, "🔴 Connected to Redis");
        Ok(Self { conn })
    }

    /// Connect using `REDIS_URL`, defaulting to localhost
    ///
    /// # Errors
    ///
    /// Returns `Store` when the connection cannot be established.
    pub async fn connect_from_env() -> GatewayResult<Self> {
        let url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        Self::connect(&url).await
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Little-endian f32 blob for vector query params
    fn vector_blob(vector: &[f32]) -> Vec<u8> {
        let mut blob = Vec::with_capacity(vector.len() * 4);
        for component in vector {
            blob.extend_from_slice(&component.to_le_bytes());
        }
        blob
    }

    /// Render the RediSearch query string for typed options
    fn render_query(query: &str, opts: &SearchOptions) -> String {
        let base = if query.trim().is_empty() { "*" } else { query };
        match &opts.knn {
            Some(knn) => {
                let ef = knn
                    .ef_runtime
                    .map(|ef| format!(" EF_RUNTIME {ef}"))
                    .unwrap_or_default();
                format!(
                    "({base})=>[KNN {} @{} $vec{ef} AS {}]",
                    knn.k, knn.field, knn.score_alias
                )
            }
            None => base.to_string(),
        }
    }

    /// Parse the positional FT.SEARCH reply:
    /// `[total, id, [k, v, ...], id, [k, v, ...], ...]`
    fn parse_search_reply(value: &redis::Value) -> GatewayResult<SearchReply> {
        let redis::Value::Array(items) = value else {
            return Err(GatewayError::Store(format!(
                "unexpected FT.SEARCH reply shape: {value:?}"
            )));
        };
        let mut iter = items.iter();
        let total = match iter.next() {
            Some(redis::Value::Int(n)) => *n as u64,
            other => {
                return Err(GatewayError::Store(format!(
                    "FT.SEARCH reply missing total: {other:?}"
                )))
            }
        };

        let mut docs = Vec::new();
        while let Some(id_value) = iter.next() {
            let id = Self::value_to_string(id_value)?;
            let Some(redis::Value::Array(pairs)) = iter.next() else {
                return Err(GatewayError::Store(
                    "FT.SEARCH document missing field array".to_string(),
                ));
            };
            let mut fields = HashMap::new();
            let mut pair_iter = pairs.iter();
            while let (Some(name), Some(field_value)) = (pair_iter.next(), pair_iter.next()) {
                fields.insert(
                    Self::value_to_string(name)?,
                    Self::value_to_string(field_value)?,
                );
            }
            docs.push(SearchDoc { id, fields });
        }
        Ok(SearchReply { total, docs })
    }

    fn value_to_string(value: &redis::Value) -> GatewayResult<String> {
        match value {
            redis::Value::BulkString(bytes) => Ok(String::from_utf8_lossy(bytes).to_string()),
            redis::Value::SimpleString(s) => Ok(s.clone()),
            redis::Value::Int(n) => Ok(n.to_string()),
            redis::Value::Double(d) => Ok(d.to_string()),
            other => Err(GatewayError::Store(format!(
                "unexpected reply element: {other:?}"
            ))),
        }
    }

    fn value_to_reply(value: redis::Value) -> StoreReply {
        match value {
            redis::Value::Nil => StoreReply::Nil,
            redis::Value::Okay => StoreReply::Ok,
            redis::Value::Int(n) => StoreReply::Int(n),
            redis::Value::BulkString(bytes) => {
                let text = String::from_utf8_lossy(&bytes).to_string();
                match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(json) if json.is_object() || json.is_array() => StoreReply::Json(json),
                    _ => StoreReply::Text(text),
                }
            }
            redis::Value::SimpleString(s) => {
                if s == "OK" {
                    StoreReply::Ok
                } else {
                    StoreReply::Text(s)
                }
            }
            other => StoreReply::Error(format!("unhandled reply: {other:?}")),
        }
    }

    /// Strip the array wrapper RedisJSON puts around `$`-path results
    fn unwrap_json_path(value: serde_json::Value, path: &str) -> Option<serde_json::Value> {
        if path.starts_with('$') {
            match value {
                serde_json::Value::Array(mut items) if !items.is_empty() => {
                    Some(items.swap_remove(0))
                }
                serde_json::Value::Array(_) => None,
                other => Some(other),
            }
        } else {
            Some(value)
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> GatewayResult<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> GatewayResult<Option<String>> {
        let mut conn = self.conn();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> GatewayResult<()> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> GatewayResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let removed: u64 = conn.del(keys.to_vec()).await?;
        Ok(removed)
    }

    async fn hget(&self, hash: &str, field: &str) -> GatewayResult<Option<String>> {
        let mut conn = self.conn();
        Ok(conn.hget(hash, field).await?)
    }

    async fn hset(&self, hash: &str, field: &str, value: &str) -> GatewayResult<()> {
        let mut conn = self.conn();
        let _: () = conn.hset(hash, field, value).await?;
        Ok(())
    }

    async fn hgetall(&self, hash: &str) -> GatewayResult<HashMap<String, String>> {
        let mut conn = self.conn();
        Ok(conn.hgetall(hash).await?)
    }

    async fn keys_by_pattern(&self, pattern: &str) -> GatewayResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(conn.keys(pattern).await?)
    }

    async fn memory_usage(&self, key: &str) -> GatewayResult<u64> {
        let mut conn = self.conn();
        let usage: Option<u64> = redis::cmd("MEMORY")
            .arg("USAGE")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(usage.unwrap_or(0))
    }

    async fn json_get(&self, key: &str, path: &str) -> GatewayResult<Option<serde_json::Value>> {
        let mut conn = self.conn();
        let raw: Option<String> = redis::cmd("JSON.GET")
            .arg(key)
            .arg(path)
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(text) => {
                let value: serde_json::Value = serde_json::from_str(&text)?;
                Ok(Self::unwrap_json_path(value, path))
            }
            None => Ok(None),
        }
    }

    async fn json_set(
        &self,
        key: &str,
        path: &str,
        value: &serde_json::Value,
    ) -> GatewayResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("JSON.SET")
            .arg(key)
            .arg(path)
            .arg(serde_json::to_string(value)?)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn json_num_incr_by(&self, key: &str, path: &str, by: f64) -> GatewayResult<f64> {
        let mut conn = self.conn();
        let raw: String = redis::cmd("JSON.NUMINCRBY")
            .arg(key)
            .arg(path)
            .arg(by)
            .query_async(&mut conn)
            .await?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        Self::unwrap_json_path(value, path)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| GatewayError::Store(format!("NUMINCRBY returned no number: {raw}")))
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> GatewayResult<Vec<StoreReply>> {
        let mut pipe = redis::pipe();
        for op in &ops {
            match op {
                StoreOp::Get { key } => {
                    pipe.cmd("GET").arg(key);
                }
                StoreOp::Set { key, value, ttl } => match ttl {
                    Some(ttl) => {
                        pipe.cmd("SET")
                            .arg(key)
                            .arg(value)
                            .arg("EX")
                            .arg(ttl.as_secs().max(1));
                    }
                    None => {
                        pipe.cmd("SET").arg(key).arg(value);
                    }
                },
                StoreOp::Del { keys } => {
                    pipe.cmd("DEL").arg(keys);
                }
                StoreOp::HGet { hash, field } => {
                    pipe.cmd("HGET").arg(hash).arg(field);
                }
                StoreOp::HSet { hash, field, value } => {
                    pipe.cmd("HSET").arg(hash).arg(field).arg(value);
                }
                StoreOp::JsonGet { key, path } => {
                    pipe.cmd("JSON.GET").arg(key).arg(path);
                }
                StoreOp::JsonSet { key, path, value } => {
                    pipe.cmd("JSON.SET")
                        .arg(key)
                        .arg(path)
                        .arg(serde_json::to_string(value)?);
                }
            }
        }
        let mut conn = self.conn();
        let replies: Vec<redis::Value> = pipe.query_async(&mut conn).await?;
        Ok(replies.into_iter().map(Self::value_to_reply).collect())
    }

    async fn ft_create(&self, index: &str, schema: &IndexSchema) -> GatewayResult<()> {
        let mut cmd = redis::cmd("FT.CREATE");
        cmd.arg(index)
            .arg("ON")
            .arg("JSON")
            .arg("PREFIX")
            .arg(1)
            .arg(&schema.prefix)
            .arg("SCHEMA");
        for field in &schema.fields {
            match field {
                FieldSchema::Tag { name } => {
                    cmd.arg(format!("$.{name}")).arg("AS").arg(name).arg("TAG");
                }
                FieldSchema::Text { name } => {
                    cmd.arg(format!("$.{name}")).arg("AS").arg(name).arg("TEXT");
                }
                FieldSchema::Numeric { name } => {
                    cmd.arg(format!("$.{name}"))
                        .arg("AS")
                        .arg(name)
                        .arg("NUMERIC");
                }
                FieldSchema::Vector { name, dimension } => {
                    cmd.arg(format!("$.{name}"))
                        .arg("AS")
                        .arg(name)
                        .arg("VECTOR")
                        .arg("HNSW")
                        .arg(6)
                        .arg("TYPE")
                        .arg("FLOAT32")
                        .arg("DIM")
                        .arg(*dimension)
                        .arg("DISTANCE_METRIC")
                        .arg("COSINE");
                }
            }
        }
        let mut conn = self.conn();
        match cmd.query_async::<()>(&mut conn).await {
            Ok(()) => {
                debug!(index, "Search index created");
                Ok(())
            }
            Err(e) if e.to_string().contains("already exists") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ft_search(
        &self,
        index: &str,
        query: &str,
        opts: &SearchOptions,
    ) -> GatewayResult<SearchReply> {
        let rendered = Self::render_query(query, opts);
        let mut cmd = redis::cmd("FT.SEARCH");
        cmd.arg(index).arg(&rendered);
        if let Some(knn) = &opts.knn {
            cmd.arg("PARAMS")
                .arg(2)
                .arg("vec")
                .arg(Self::vector_blob(&knn.vector));
        }
        if !opts.return_fields.is_empty() {
            cmd.arg("RETURN").arg(opts.return_fields.len());
            for field in &opts.return_fields {
                cmd.arg(field);
            }
        }
        match (&opts.sort_by, &opts.knn) {
            (Some(sort), _) => {
                cmd.arg("SORTBY")
                    .arg(&sort.field)
                    .arg(if sort.ascending { "ASC" } else { "DESC" });
            }
            (None, Some(knn)) => {
                // Nearest first
                cmd.arg("SORTBY").arg(&knn.score_alias).arg("ASC");
            }
            (None, None) => {}
        }
        let limit = if opts.limit == 0 { 10 } else { opts.limit };
        cmd.arg("LIMIT").arg(opts.offset).arg(limit);
        cmd.arg("DIALECT").arg(2);

        let mut conn = self.conn();
        let raw: redis::Value = cmd.query_async(&mut conn).await?;
        Self::parse_search_reply(&raw)
    }

    async fn ts_create(&self, key: &str, opts: &TimeseriesOptions) -> GatewayResult<()> {
        let mut conn = self.conn();
        let result = redis::cmd("TS.CREATE")
            .arg(key)
            .arg("RETENTION")
            .arg(opts.retention_ms)
            .arg("DUPLICATE_POLICY")
            .arg(opts.duplicate_policy.as_str())
            .query_async::<()>(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("already exists") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ts_add(&self, key: &str, ts_ms: i64, value: f64) -> GatewayResult<()> {
        let mut conn = self.conn();
        let _: i64 = redis::cmd("TS.ADD")
            .arg(key)
            .arg(ts_ms)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ts_range(
        &self,
        key: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> GatewayResult<Vec<(i64, f64)>> {
        let mut conn = self.conn();
        let raw: Vec<(i64, String)> = redis::cmd("TS.RANGE")
            .arg(key)
            .arg(from_ms)
            .arg(to_ms)
            .query_async(&mut conn)
            .await?;
        Ok(raw
            .into_iter()
            .filter_map(|(ts, value)| value.parse().ok().map(|v| (ts, v)))
            .collect())
    }
}

/// Factory handing out Redis sessions for the connection pool
pub struct RedisConnectionFactory {
    url: String,
}

impl RedisConnectionFactory {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Factory pointing at `REDIS_URL`, defaulting to localhost
    #[must_use]
    pub fn from_env() -> Self {
        let url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        Self::new(url)
    }
}

#[async_trait]
impl ConnectionFactory for RedisConnectionFactory {
    async fn connect(&self) -> GatewayResult<Arc<dyn Store>> {
        Ok(Arc::new(RedisStore::connect(&self.url).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_islands::layer1_infrastructure::store_capability::KnnSpec;

    #[test]
    fn test_render_knn_query() {
        let opts = SearchOptions {
            knn: Some(KnnSpec {
                field: "vector".to_string(),
                k: 5,
                vector: vec![0.0; 4],
                ef_runtime: Some(128),
                score_alias: "vector_score".to_string(),
            }),
            ..SearchOptions::default()
        };
        let rendered = RedisStore::render_query("@contentType:{image}", &opts);
        assert_eq!(
            rendered,
            "(@contentType:{image})=>[KNN 5 @vector $vec EF_RUNTIME 128 AS vector_score]"
        );
        let plain = RedisStore::render_query("", &SearchOptions::default());
        assert_eq!(plain, "*");
    }

    #[test]
    fn test_vector_blob_layout() {
        let blob = RedisStore::vector_blob(&[1.0, -2.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&blob[4..8], &(-2.5f32).to_le_bytes());
    }

    #[test]
    fn test_parse_positional_search_reply() {
        let raw = redis::Value::Array(vec![
            redis::Value::Int(2),
            redis::Value::BulkString(b"doc:1".to_vec()),
            redis::Value::Array(vec![
                redis::Value::BulkString(b"vector_score".to_vec()),
                redis::Value::BulkString(b"0.12".to_vec()),
                redis::Value::BulkString(b"contentType".to_vec()),
                redis::Value::BulkString(b"text".to_vec()),
            ]),
            redis::Value::BulkString(b"doc:2".to_vec()),
            redis::Value::Array(vec![
                redis::Value::BulkString(b"vector_score".to_vec()),
                redis::Value::BulkString(b"0.34".to_vec()),
            ]),
        ]);
        let reply = RedisStore::parse_search_reply(&raw).unwrap();
        assert_eq!(reply.total, 2);
        assert_eq!(reply.docs.len(), 2);
        assert_eq!(reply.docs[0].id, "doc:1");
        assert_eq!(reply.docs[0].fields["contentType"], "text");
        assert!((reply.docs[1].field_f64("vector_score").unwrap() - 0.34).abs() < 1e-9);
    }

    #[test]
    fn test_unwrap_json_path() {
        let wrapped = serde_json::json!([{"a": 1}]);
        let unwrapped = RedisStore::unwrap_json_path(wrapped, "$").unwrap();
        assert_eq!(unwrapped, serde_json::json!({"a": 1}));
        assert_eq!(
            RedisStore::unwrap_json_path(serde_json::json!([]), "$.missing"),
            None
        );
    }
}
