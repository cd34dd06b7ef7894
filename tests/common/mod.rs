//! Shared in-memory collaborators for integration tests.
//!
//! The mock store scores lexically by query-term frequency and densely by
//! cosine over fixture vectors, applying the compiled filter the same way a
//! real store would. Failure injection flags simulate store outages for the
//! degradation scenarios.

#![allow(dead_code)] // each integration binary uses a subset

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dtrag::filter::CompiledFilter;
use dtrag::metrics::SearchMetrics;
use dtrag::rerank::RerankError;
use dtrag::taxonomy::{TaxonomyError, TaxonomyReader};
use dtrag::traits::{ChunkStore, CrossEncoder, EmbedError, EmbeddingProvider, MetricsSink, StoreError};
use dtrag::{Chunk, ContentType, Embedding};

pub const DIM: usize = 16;

/// Build a fixture chunk. `doc` doubles as the classification key.
pub fn chunk(id: &str, doc: &str, text: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        document_id: doc.to_string(),
        text: text.to_string(),
        title: Some(format!("title {}", id)),
        source_url: Some(format!("https://example.com/{}", doc)),
        taxonomy_path: vec![],
        content_type: ContentType::Markdown,
        processed_at: Utc::now(),
        metadata: serde_json::Map::new(),
    }
}

/// Deterministic bag-of-words embedding: each lowercased alphanumeric token
/// bumps one of `DIM` buckets. Shared vocabulary yields high cosine.
pub fn bow_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let token = token.to_lowercase();
        let bucket = token
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize))
            % DIM;
        v[bucket] += 1.0;
    }
    v
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na * nb)).clamp(-1.0, 1.0)
    }
}

/// In-memory chunk store with filter support and failure injection.
#[derive(Default)]
pub struct MockStore {
    chunks: Vec<(Chunk, Option<Vec<f32>>)>,
    /// document_id -> [(version, node_id, confidence)]
    classifications: HashMap<String, Vec<(String, String, f64)>>,
    pub fail_lexical: AtomicBool,
    pub fail_dense: AtomicBool,
    /// Artificial latency added to both search paths.
    pub stage_delay: Mutex<Duration>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, chunk: Chunk, embedding: Option<Vec<f32>>) {
        self.chunks.push((chunk, embedding));
    }

    pub fn classify(&mut self, doc: &str, version: &str, node: &str, confidence: f64) {
        self.classifications.entry(doc.to_string()).or_default().push((
            version.to_string(),
            node.to_string(),
            confidence,
        ));
    }

    fn matches(&self, filter: &CompiledFilter, chunk: &Chunk) -> bool {
        if !filter.content_types().is_empty()
            && !filter.content_types().contains(&chunk.content_type)
        {
            return false;
        }
        if let Some(from) = filter.date_from() {
            if chunk.processed_at < from {
                return false;
            }
        }
        if let Some(to) = filter.date_to() {
            if chunk.processed_at > to {
                return false;
            }
        }
        if let Some(scope) = filter.scope() {
            let Some(rows) = self.classifications.get(&chunk.document_id) else {
                return false;
            };
            return rows.iter().any(|(version, node, confidence)| {
                *version == scope.version
                    && *confidence >= scope.min_confidence
                    && scope.nodes.contains(node)
            });
        }
        true
    }

    async fn delay(&self) {
        let delay = *self.stage_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ChunkStore for MockStore {
    async fn lexical_search(
        &self,
        query: &str,
        filter: &CompiledFilter,
        limit: usize,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        self.delay().await;
        if self.fail_lexical.load(Ordering::Relaxed) {
            return Err(StoreError::Backend("lexical store down".to_string()));
        }
        let terms: HashSet<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();
        let mut scored: Vec<(String, f32)> = self
            .chunks
            .iter()
            .filter(|(c, _)| self.matches(filter, c))
            .filter_map(|(c, _)| {
                let tf: usize = c
                    .text
                    .split(|ch: char| !ch.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                    .filter(|t| terms.contains(&t.to_lowercase()))
                    .count();
                (tf > 0).then(|| (c.id.clone(), tf as f32))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn vector_search(
        &self,
        query: &Embedding,
        filter: &CompiledFilter,
        limit: usize,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        self.delay().await;
        if self.fail_dense.load(Ordering::Relaxed) {
            return Err(StoreError::Backend("vector index down".to_string()));
        }
        let mut scored: Vec<(String, f32)> = self
            .chunks
            .iter()
            .filter(|(c, _)| self.matches(filter, c))
            .filter_map(|(c, emb)| {
                emb.as_ref().map(|e| {
                    (c.id.clone(), cosine(query.as_slice(), e).clamp(0.0, 1.0))
                })
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn fetch_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, StoreError> {
        let by_id: HashMap<&str, &Chunk> =
            self.chunks.iter().map(|(c, _)| (c.id.as_str(), c)).collect();
        Ok(ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|c| (*c).clone()))
            .collect())
    }
}

/// Embedder producing deterministic bag-of-words vectors.
pub struct MockEmbedder {
    pub fail: AtomicBool,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbedError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(EmbedError::Service("embedding service down".to_string()));
        }
        Ok(Embedding::new(bow_embedding(text)))
    }
}

/// Taxonomy fixture: fixed version set and parent -> children edges.
pub struct MockTaxonomy {
    pub versions: HashSet<String>,
    pub edges: HashMap<String, Vec<String>>,
}

impl MockTaxonomy {
    pub fn single_version(version: &str, edges: &[(&str, &[&str])]) -> Self {
        Self {
            versions: [version.to_string()].into_iter().collect(),
            edges: edges
                .iter()
                .map(|(p, cs)| (p.to_string(), cs.iter().map(|c| c.to_string()).collect()))
                .collect(),
        }
    }
}

impl TaxonomyReader for MockTaxonomy {
    fn list_versions(&self) -> Result<HashSet<String>, TaxonomyError> {
        Ok(self.versions.clone())
    }

    fn children(&self, _version: &str, node_id: &str) -> Result<Vec<String>, TaxonomyError> {
        Ok(self.edges.get(node_id).cloned().unwrap_or_default())
    }

    fn classify(&self, _: &str, _: &str) -> Result<Vec<(String, f32)>, TaxonomyError> {
        Ok(vec![])
    }
}

/// Cross-encoder that always fails, for fallback tests.
pub struct BrokenEncoder;

#[async_trait]
impl CrossEncoder for BrokenEncoder {
    async fn score(&self, _: &str, _: &[&str]) -> Result<Vec<f32>, RerankError> {
        Err(RerankError::Encoder("model crashed".to_string()))
    }
}

/// Metrics sink collecting every record.
#[derive(Default)]
pub struct CollectSink {
    pub records: Mutex<Vec<SearchMetrics>>,
}

impl MetricsSink for CollectSink {
    fn record(&self, metrics: &SearchMetrics) {
        self.records.lock().unwrap().push(metrics.clone());
    }
}
