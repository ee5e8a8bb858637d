//! Embedding Capability
//!
//! The gateway consumes embeddings, it never produces them. Provider
//! implementations (hosted APIs, local models) live outside the crate
//! and plug in through this trait. All embedders in one process must
//! agree on the dimension.

use async_trait::async_trait;

use crate::service_islands::layer5_business_logic::shared::error::GatewayResult;

/// Text-to-vector capability
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Fixed output dimension
    fn dimension(&self) -> usize;

    /// Embed one text; tags may steer domain-tuned providers
    async fn embed(&self, text: &str, tags: Option<&[String]>) -> GatewayResult<Vec<f32>>;

    /// Embed many texts; the default just loops, providers with a
    /// batch endpoint should override.
    async fn batch_embed(&self, texts: &[String]) -> GatewayResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text, None).await?);
        }
        Ok(vectors)
    }
}
