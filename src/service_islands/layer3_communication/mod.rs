//! Layer 3: Communication
//!
//! Typed adapters between the gateway's domain objects and the raw
//! store surface. The vector store island turns embedding documents
//! and KNN searches into store operations.

pub mod vector_store_island;

// Re-export the main island components for easy access
pub use vector_store_island::{
    ContentType, EmbeddingDocument, Relationships, SimilarityMatch, SimilarityOptions,
    VectorStoreAdapter,
};
