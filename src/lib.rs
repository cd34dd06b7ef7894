//! # dtrag — taxonomy-scoped hybrid retrieval
//!
//! Retrieval core for a Dynamic Taxonomy RAG service. Given a query and a
//! filter, the engine fuses lexical (BM25) and dense (cosine) retrieval
//! with adaptive weights, optionally reranks the top candidates with a
//! cross-encoder (deterministic heuristic fallback), and caches results in
//! an in-process LRU+TTL cache.
//!
//! The engine is an in-process library with one main entry point
//! ([`RetrievalEngine::search`]) and a small admin surface
//! ([`RetrievalEngine::invalidate_cache`], [`RetrievalEngine::cache_stats`]).
//! Collaborators — chunk store, embedding service, taxonomy reader, and the
//! optional cross-encoder and metrics sink — are injected at construction.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dtrag::{Filter, RetrievalConfig, RetrievalEngine, SearchOptions, SqliteStore};
//! # use dtrag::{Embedding, EmbedError, TaxonomyError, EmbeddingProvider, TaxonomyReader};
//! # use std::collections::HashSet;
//! # struct MyEmbedder; struct MyTaxonomy;
//! # #[async_trait::async_trait]
//! # impl EmbeddingProvider for MyEmbedder {
//! #     fn dimension(&self) -> usize { 768 }
//! #     async fn embed(&self, _: &str) -> Result<Embedding, EmbedError> { unimplemented!() }
//! # }
//! # impl TaxonomyReader for MyTaxonomy {
//! #     fn list_versions(&self) -> Result<HashSet<String>, TaxonomyError> { unimplemented!() }
//! #     fn children(&self, _: &str, _: &str) -> Result<Vec<String>, TaxonomyError> { unimplemented!() }
//! #     fn classify(&self, _: &str, _: &str) -> Result<Vec<(String, f32)>, TaxonomyError> { unimplemented!() }
//! # }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = Arc::new(SqliteStore::open(std::path::Path::new("index.db")).await?);
//! let engine = RetrievalEngine::new(
//!     store,
//!     Arc::new(MyEmbedder),
//!     Arc::new(MyTaxonomy),
//!     RetrievalConfig::default(),
//! );
//!
//! let (hits, metrics) = engine
//!     .search("distributed training", 10, &Filter::default(), &SearchOptions::default())
//!     .await?;
//! println!("{} hits in {}ms", hits.len(), metrics.total_ms);
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod fusion;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod rerank;
pub mod store;
pub mod taxonomy;
pub mod traits;

pub(crate) mod math;

pub use cache::CacheStats;
pub use config::{RetrievalConfig, SearchOptions};
pub use engine::RetrievalEngine;
pub use error::SearchError;
pub use filter::{Filter, Fingerprint, MIN_CONFIDENCE_FLOOR};
pub use metrics::{Degradation, SearchMetrics, StageLatencies};
pub use model::{Chunk, ContentType, Embedding, SearchHit};
pub use normalize::NormalizationPolicy;
pub use rerank::{RerankError, RerankPath};
pub use store::SqliteStore;
pub use taxonomy::{TaxonomyError, TaxonomyReader};
pub use traits::{ChunkStore, CrossEncoder, EmbedError, EmbeddingProvider, MetricsSink, StoreError};
