//! Core data model: chunks, embeddings, and search hits.
//!
//! Chunks, embeddings, and taxonomy classifications are produced by the
//! ingestion pipeline and are read-only here. The retrieval core only ever
//! creates [`SearchHit`] values.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type of an ingested document chunk.
///
/// Closed whitelist; filter validation rejects anything else before a query
/// reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Pdf,
    Markdown,
    Html,
    Plain,
}

impl ContentType {
    /// All recognized content types, in canonical order.
    pub const ALL: [ContentType; 4] = [
        ContentType::Pdf,
        ContentType::Markdown,
        ContentType::Html,
        ContentType::Plain,
    ];

    /// Canonical lowercase name, as stored and as accepted on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Pdf => "pdf",
            ContentType::Markdown => "markdown",
            ContentType::Html => "html",
            ContentType::Plain => "plain",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(ContentType::Pdf),
            "markdown" => Ok(ContentType::Markdown),
            "html" => Ok(ContentType::Html),
            "plain" => Ok(ContentType::Plain),
            other => Err(format!("unknown content type '{}'", other)),
        }
    }
}

/// Unit of retrieval.
///
/// Immutable from the core's viewpoint; ingestion owns the lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable opaque identifier.
    pub id: String,
    /// Owning document identifier.
    pub document_id: String,
    /// Chunk text.
    pub text: String,
    /// Document title, if known.
    pub title: Option<String>,
    /// Web-browsable source URL, if known.
    pub source_url: Option<String>,
    /// Ordered taxonomy labels from root to leaf (e.g. `["AI", "ML", "RAG"]`).
    pub taxonomy_path: Vec<String>,
    /// Content type of the source document.
    pub content_type: ContentType,
    /// When ingestion processed this chunk.
    pub processed_at: DateTime<Utc>,
    /// Application-defined metadata.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Dense embedding vector associated one-to-one with a chunk.
///
/// Produced by the external embedding service; unit-agnostic (the dense
/// retriever computes full cosine similarity rather than assuming
/// normalization).
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Wrap a raw vector.
    pub fn new(data: Vec<f32>) -> Self {
        Self(data)
    }

    /// View as a slice.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Consume and return the inner vector.
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Vector dimension.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the vector has no components.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(data: Vec<f32>) -> Self {
        Self(data)
    }
}

/// A ranked retrieval result.
///
/// Of the four scores only `fused` is guaranteed non-zero; `lexical` and
/// `dense` are zero when the chunk was absent from that candidate list, and
/// `rerank` is non-zero iff reranking ran. All scores lie in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Identifier of the matching chunk.
    pub chunk_id: String,
    /// Chunk text.
    pub text: String,
    /// Document title, if known.
    pub title: Option<String>,
    /// Source URL, if known.
    pub source_url: Option<String>,
    /// Taxonomy labels from root to leaf.
    pub taxonomy_path: Vec<String>,
    /// Normalized lexical (BM25) score.
    pub lexical: f32,
    /// Normalized dense (cosine) score.
    pub dense: f32,
    /// Weighted fusion of `lexical` and `dense`.
    pub fused: f32,
    /// Reranker score; 0.0 when reranking did not run.
    pub rerank: f32,
}
