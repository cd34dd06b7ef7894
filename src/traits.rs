//! Collaborator contracts consumed by the retrieval engine.
//!
//! All collaborators arrive through constructor injection as trait objects;
//! the engine holds no module-level state. The bundled
//! [`SqliteStore`](crate::store::SqliteStore) implements [`ChunkStore`];
//! embedding, cross-encoding, and metrics delivery are always external.

use async_trait::async_trait;
use thiserror::Error;

use crate::filter::CompiledFilter;
use crate::metrics::SearchMetrics;
use crate::model::{Chunk, Embedding};
use crate::rerank::RerankError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding service error: {0}")]
    Service(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Chunk and embedding storage.
///
/// Both search methods must honor the compiled filter predicate; every id
/// they return is expected to satisfy it. Scores are raw (normalization
/// happens in fusion), except `vector_search`, whose scores are already
/// `1 - cosine_distance` in [0, 1].
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// BM25-style full-text scoring. Returns up to `limit`
    /// `(chunk_id, score)` pairs, best first. Empty query yields an empty
    /// list.
    async fn lexical_search(
        &self,
        query: &str,
        filter: &CompiledFilter,
        limit: usize,
    ) -> Result<Vec<(String, f32)>, StoreError>;

    /// Cosine-similarity scoring against the embedding index. Returns up to
    /// `limit` `(chunk_id, score)` pairs, best first. An empty index yields
    /// an empty list.
    async fn vector_search(
        &self,
        query: &Embedding,
        filter: &CompiledFilter,
        limit: usize,
    ) -> Result<Vec<(String, f32)>, StoreError>;

    /// Batch fetch by chunk id. Unknown ids are silently absent from the
    /// result; order follows the input ids.
    async fn fetch_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, StoreError>;
}

/// Query embedding service.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embedding dimension this provider produces.
    fn dimension(&self) -> usize;

    /// Embed a query string. Errors propagate and degrade the dense stage.
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedError>;
}

/// Optional cross-encoder for second-pass relevance.
///
/// Implementations must be safe under concurrent calls; models that are not
/// internally thread-safe should serialize through their own bounded queue.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Relevance of each text to the query, one score per input text.
    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, RerankError>;
}

/// Optional sink for per-request metrics. Implementations must not block.
pub trait MetricsSink: Send + Sync {
    fn record(&self, metrics: &SearchMetrics);
}
