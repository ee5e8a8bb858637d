//! Vector Store Island
//!
//! Typed CRUD and KNN over the store capability. Embeddings live as
//! JSON documents at `{prefix}:embedding:{id}`, indexed by a vector
//! field with cosine distance plus tag fields for content identity.
//! Scores cross this boundary exactly once: the backend's cosine
//! distance becomes a similarity here and stays one everywhere above.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::service_islands::layer1_infrastructure::store_capability::{
    FieldSchema, IndexSchema, KnnSpec, SearchOptions, Store, StoreOp,
};
use crate::service_islands::layer5_business_logic::shared::error::{
    GatewayError, GatewayResult,
};

/// Content modalities the gateway understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Code,
    Image,
    Audio,
    Document,
}

impl ContentType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity references to related embeddings
///
/// Only identities are stored; traversal happens through repeated
/// lookups, never in-memory pointer graphs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Relationships {
    pub similar_ids: Vec<String>,
    pub cross_modal_ids: Vec<String>,
}

/// Persisted embedding document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingDocument {
    pub id: String,
    pub vector: Vec<f32>,
    pub content_id: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub relationships: Relationships,
    pub created_at: i64,
    pub updated_at: i64,
}

impl EmbeddingDocument {
    /// Build a document stamped with the current time
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        vector: Vec<f32>,
        content_id: impl Into<String>,
        content_type: ContentType,
        metadata: serde_json::Value,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: id.into(),
            vector,
            content_id: content_id.into(),
            content_type,
            metadata,
            relationships: Relationships::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Options for a similarity search
#[derive(Debug, Clone)]
pub struct SimilarityOptions {
    pub limit: usize,
    /// Cosine similarity floor; lower hits are dropped client-side
    pub threshold: f64,
    pub include_metadata: bool,
    pub include_vectors: bool,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.0,
            include_metadata: true,
            include_vectors: false,
        }
    }
}

/// One similarity hit
#[derive(Debug, Clone)]
pub struct SimilarityMatch {
    /// Full document key
    pub id: String,
    pub content_id: String,
    pub content_type: Option<ContentType>,
    /// Cosine similarity in [0, 1]
    pub similarity: f64,
    pub metadata: Option<serde_json::Value>,
    pub vector: Option<Vec<f32>>,
}

/// Typed adapter over the store's vector search surface
pub struct VectorStoreAdapter {
    store: Arc<dyn Store>,
    prefix: String,
    index_name: String,
    dimension: usize,
    index_ready: OnceCell<()>,
}

impl VectorStoreAdapter {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, prefix: impl Into<String>, dimension: usize) -> Self {
        let prefix = prefix.into();
        let index_name = format!("{prefix}_embedding_idx");
        Self {
            store,
            prefix,
            index_name,
            dimension,
            index_ready: OnceCell::new(),
        }
    }

    /// Store key for an embedding id
    #[must_use]
    pub fn embedding_key(&self, id: &str) -> String {
        format!("{}:embedding:{id}", self.prefix)
    }

    /// The underlying store handle
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Create the search index once per adapter lifetime
    ///
    /// # Errors
    ///
    /// Returns `Store` when index creation fails.
    pub async fn ensure_index(&self) -> GatewayResult<()> {
        self.index_ready
            .get_or_try_init(|| async {
                let schema = IndexSchema {
                    prefix: format!("{}:embedding:", self.prefix),
                    fields: vec![
                        FieldSchema::Tag {
                            name: "contentType".to_string(),
                        },
                        FieldSchema::Tag {
                            name: "contentId".to_string(),
                        },
                        FieldSchema::Vector {
                            name: "vector".to_string(),
                            dimension: self.dimension,
                        },
                    ],
                };
                self.store.ft_create(&self.index_name, &schema).await?;
                debug!(index = %self.index_name, "Vector index ready");
                Ok(())
            })
            .await
            .copied()
    }

    fn check_dimension(&self, vector: &[f32]) -> GatewayResult<()> {
        if vector.len() != self.dimension {
            return Err(GatewayError::Validation(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    /// Persist one embedding document
    ///
    /// # Errors
    ///
    /// `Validation` on dimension mismatch, `Store` on write failure.
    pub async fn store_embedding(&self, doc: &EmbeddingDocument) -> GatewayResult<()> {
        self.check_dimension(&doc.vector)?;
        self.ensure_index().await?;
        let key = self.embedding_key(&doc.id);
        self.store
            .json_set(&key, "$", &serde_json::to_value(doc)?)
            .await
    }

    /// Persist many documents in a single pipelined transaction
    ///
    /// # Errors
    ///
    /// `Validation` on dimension mismatch, `Store` when the pipeline
    /// fails or any write inside it errs.
    pub async fn store_batch(&self, docs: &[EmbeddingDocument]) -> GatewayResult<()> {
        for doc in docs {
            self.check_dimension(&doc.vector)?;
        }
        self.ensure_index().await?;
        let ops = docs
            .iter()
            .map(|doc| {
                Ok(StoreOp::JsonSet {
                    key: self.embedding_key(&doc.id),
                    path: "$".to_string(),
                    value: serde_json::to_value(doc)?,
                })
            })
            .collect::<GatewayResult<Vec<_>>>()?;
        let replies = self.store.pipeline(ops).await?;
        for reply in replies {
            if let crate::service_islands::layer1_infrastructure::store_capability::StoreReply::Error(e) = reply {
                return Err(GatewayError::Store(format!("batch write failed: {e}")));
            }
        }
        Ok(())
    }

    /// Load one embedding document
    ///
    /// # Errors
    ///
    /// `Store` on read failure or a document that fails to decode.
    pub async fn get_embedding(&self, id: &str) -> GatewayResult<Option<EmbeddingDocument>> {
        let key = self.embedding_key(id);
        match self.store.json_get(&key, "$").await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Delete an embedding document
    ///
    /// # Errors
    ///
    /// `Store` on delete failure.
    pub async fn delete_embedding(&self, id: &str) -> GatewayResult<bool> {
        let removed = self.store.del(&[self.embedding_key(id)]).await?;
        Ok(removed > 0)
    }

    /// KNN over all modalities
    ///
    /// # Errors
    ///
    /// `Validation` on dimension mismatch, `Store` on search failure.
    pub async fn search_similar(
        &self,
        vector: &[f32],
        opts: &SimilarityOptions,
    ) -> GatewayResult<Vec<SimilarityMatch>> {
        self.search_filtered(vector, "*", opts).await
    }

    /// KNN restricted to one content type
    ///
    /// # Errors
    ///
    /// `Validation` on dimension mismatch, `Store` on search failure.
    pub async fn search_by_content_type(
        &self,
        vector: &[f32],
        content_type: ContentType,
        opts: &SimilarityOptions,
    ) -> GatewayResult<Vec<SimilarityMatch>> {
        let filter = format!("@contentType:{{{content_type}}}");
        self.search_filtered(vector, &filter, opts).await
    }

    async fn search_filtered(
        &self,
        vector: &[f32],
        filter: &str,
        opts: &SimilarityOptions,
    ) -> GatewayResult<Vec<SimilarityMatch>> {
        self.check_dimension(vector)?;
        self.ensure_index().await?;

        let mut return_fields = vec!["contentId".to_string(), "contentType".to_string()];
        if opts.include_metadata {
            return_fields.push("metadata".to_string());
        }
        if opts.include_vectors {
            return_fields.push("vector".to_string());
        }
        let search = SearchOptions {
            knn: Some(KnnSpec {
                field: "vector".to_string(),
                k: opts.limit,
                vector: vector.to_vec(),
                ef_runtime: None,
                score_alias: "vector_score".to_string(),
            }),
            return_fields,
            sort_by: None,
            offset: 0,
            limit: opts.limit,
        };
        let reply = self.store.ft_search(&self.index_name, filter, &search).await?;

        Ok(reply
            .docs
            .into_iter()
            .filter_map(|doc| {
                let distance = doc.field_f64("vector_score")?;
                let similarity = (1.0 - distance).clamp(0.0, 1.0);
                if similarity < opts.threshold {
                    return None;
                }
                let content_type = doc
                    .fields
                    .get("contentType")
                    .and_then(|s| serde_json::from_value(serde_json::json!(s)).ok());
                let metadata = doc
                    .fields
                    .get("metadata")
                    .and_then(|s| serde_json::from_str(s).ok());
                let vector = doc
                    .fields
                    .get("vector")
                    .and_then(|s| serde_json::from_str::<Vec<f32>>(s).ok());
                Some(SimilarityMatch {
                    content_id: doc.fields.get("contentId").cloned().unwrap_or_default(),
                    id: doc.id,
                    content_type,
                    similarity,
                    metadata,
                    vector,
                })
            })
            .collect())
    }

    /// All embeddings carrying a content id, loaded in full
    ///
    /// # Errors
    ///
    /// `Store` on search or read failure.
    pub async fn get_by_content_id(
        &self,
        content_id: &str,
    ) -> GatewayResult<Vec<EmbeddingDocument>> {
        self.ensure_index().await?;
        let filter = format!("@contentId:{{{content_id}}}");
        let reply = self
            .store
            .ft_search(
                &self.index_name,
                &filter,
                &SearchOptions {
                    return_fields: vec!["contentId".to_string()],
                    limit: 100,
                    ..SearchOptions::default()
                },
            )
            .await?;
        let mut docs = Vec::with_capacity(reply.docs.len());
        for hit in reply.docs {
            if let Some(value) = self.store.json_get(&hit.id, "$").await? {
                docs.push(serde_json::from_value(value)?);
            }
        }
        Ok(docs)
    }

    /// Replace the relationship references of an embedding
    ///
    /// # Errors
    ///
    /// `Store` when the document does not exist or the write fails.
    pub async fn update_relationships(
        &self,
        id: &str,
        relationships: &Relationships,
    ) -> GatewayResult<()> {
        let key = self.embedding_key(id);
        if self.store.json_get(&key, "$").await?.is_none() {
            return Err(GatewayError::Store(format!("no embedding under id {id}")));
        }
        self.store
            .json_set(&key, "$.relationships", &serde_json::to_value(relationships)?)
            .await?;
        self.store
            .json_set(
                &key,
                "$.updatedAt",
                &serde_json::json!(chrono::Utc::now().timestamp_millis()),
            )
            .await
    }
}
