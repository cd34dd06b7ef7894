//! Retrieval orchestrator.
//!
//! Coordinates the full pipeline for one `search` call: filter compilation,
//! cache lookup, concurrent lexical/dense retrieval under per-stage and
//! total deadlines, fusion, optional reranking, and cache store. The engine
//! is stateless apart from its injected collaborators; configuration is
//! immutable per instance.
//!
//! Failure semantics: a failed retrieval side degrades the request (recorded
//! in metrics, never thrown) as long as the other side produced candidates;
//! both sides failing surfaces `AllRetrievalFailed`. Rerank failures always
//! fall back to the deterministic heuristic. Cancellation aborts at the next
//! join point and never mutates the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use crate::analyzer;
use crate::cache::{self, CacheStats, ResultCache};
use crate::config::{RetrievalConfig, SearchOptions};
use crate::error::SearchError;
use crate::filter::{self, Filter, Fingerprint};
use crate::fusion;
use crate::metrics::{Degradation, SearchMetrics};
use crate::model::{Chunk, SearchHit};
use crate::rerank::{Reranker, RerankPath};
use crate::taxonomy::{ScopeResolver, TaxonomyReader};
use crate::traits::{ChunkStore, CrossEncoder, EmbeddingProvider, MetricsSink};

/// Outcome of one retrieval stage: candidates or a degradation reason.
type StageOutcome = Result<Vec<(String, f32)>, String>;

/// Hybrid retrieval engine. Safe to share across threads; all methods take
/// `&self`.
pub struct RetrievalEngine {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    resolver: ScopeResolver,
    reranker: Reranker,
    cache: ResultCache,
    sink: Option<Arc<dyn MetricsSink>>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    /// Build an engine from its collaborators. Reranking starts on the
    /// heuristic path; attach a cross-encoder with
    /// [`with_cross_encoder`](Self::with_cross_encoder).
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        taxonomy: Arc<dyn TaxonomyReader>,
        config: RetrievalConfig,
    ) -> Self {
        let cache = ResultCache::new(config.cache_capacity, config.cache_ttl());
        Self {
            store,
            embedder,
            resolver: ScopeResolver::new(taxonomy),
            reranker: Reranker::heuristic(),
            cache,
            sink: None,
            config,
        }
    }

    /// Use a cross-encoder for reranking, with the heuristic as fallback.
    pub fn with_cross_encoder(mut self, encoder: Arc<dyn CrossEncoder>) -> Self {
        self.reranker = Reranker::with_encoder(encoder, self.config.rerank_timeout());
        self
    }

    /// Deliver per-request metrics to `sink`.
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Search for the top `k` chunks matching `query` under `filter`.
    ///
    /// Returns the ranked hits (at most `k`) and the request metrics. See
    /// the module docs for failure semantics.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &Filter,
        options: &SearchOptions,
    ) -> Result<(Vec<SearchHit>, SearchMetrics), SearchError> {
        let span = tracing::info_span!(
            "search",
            k,
            correlation_id = options.correlation_id.as_deref().unwrap_or(""),
        );
        self.search_inner(query, k, filter, options).instrument(span).await
    }

    /// Drop cached results: all of them, or only entries built under the
    /// filter identified by `fingerprint`. Returns the number removed.
    pub fn invalidate_cache(&self, fingerprint: Option<Fingerprint>) -> usize {
        match fingerprint {
            Some(fp) => self.cache.invalidate_prefix(fp),
            None => self.cache.clear(),
        }
    }

    /// React to a taxonomy deployment: drop the resolver's memoized DAGs
    /// and clear the result cache. Returns the number of cache entries
    /// removed.
    pub fn refresh_taxonomy(&self) -> usize {
        self.resolver.invalidate();
        self.cache.clear()
    }

    /// Current cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    async fn search_inner(
        &self,
        query: &str,
        k: usize,
        filter: &Filter,
        options: &SearchOptions,
    ) -> Result<(Vec<SearchHit>, SearchMetrics), SearchError> {
        let started = Instant::now();
        let mut metrics = SearchMetrics::new(options.correlation_id.clone());

        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(SearchError::InvalidQuery(
                "query is empty after trimming".to_string(),
            ));
        }
        if k > self.config.max_k {
            return Err(SearchError::InvalidQuery(format!(
                "k {} exceeds the cap of {}",
                k, self.config.max_k
            )));
        }

        let compiled = filter::compile(filter, &self.resolver)?;

        if options.cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        if k == 0 {
            metrics.total_ms = elapsed_ms(started);
            self.record(&metrics);
            return Ok((Vec::new(), metrics));
        }

        let key = cache::key_for(trimmed, &compiled, k);
        if !options.bypass_cache {
            if let Some(hits) = self.cache.get(&key) {
                tracing::debug!(returned = hits.len(), "cache hit");
                metrics.cache_hit = true;
                metrics.returned = hits.len();
                metrics.total_ms = elapsed_ms(started);
                self.record(&metrics);
                return Ok((hits, metrics));
            }
        }

        let n_lexical = options.n_lexical.unwrap_or(self.config.n_lexical);
        let n_vector = options.n_vector.unwrap_or(self.config.n_vector);
        let policy = options.normalization.unwrap_or(self.config.normalization);

        // Lexical retrieval and (embedding -> dense retrieval) run
        // concurrently; the join point is fusion. Each leg carries its own
        // deadline and reports its latency.
        let lexical_task = async {
            let t = Instant::now();
            let outcome: StageOutcome = match tokio::time::timeout(
                self.config.lexical_timeout(),
                self.store.lexical_search(trimmed, &compiled, n_lexical),
            )
            .await
            {
                Ok(Ok(candidates)) => Ok(candidates),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("lexical deadline exceeded".to_string()),
            };
            (outcome, elapsed_ms(t))
        };

        let dense_task = async {
            let embed_started = Instant::now();
            let embedded = tokio::time::timeout(
                self.config.embed_timeout(),
                self.embedder.embed(trimmed),
            )
            .await;
            let embedding_ms = elapsed_ms(embed_started);
            match embedded {
                Ok(Ok(embedding)) => {
                    let t = Instant::now();
                    let outcome: StageOutcome = match tokio::time::timeout(
                        self.config.dense_timeout(),
                        self.store.vector_search(&embedding, &compiled, n_vector),
                    )
                    .await
                    {
                        Ok(Ok(candidates)) => Ok(candidates),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err("dense deadline exceeded".to_string()),
                    };
                    (outcome, embedding_ms, Some(elapsed_ms(t)))
                }
                Ok(Err(e)) => (
                    Err(format!("query embedding failed: {}", e)),
                    embedding_ms,
                    None,
                ),
                Err(_) => (
                    Err("embedding deadline exceeded".to_string()),
                    embedding_ms,
                    None,
                ),
            }
        };

        let joined = tokio::select! {
            () = options.cancel.cancelled() => return Err(SearchError::Cancelled),
            joined = tokio::time::timeout(
                self.config.total_timeout(),
                async { tokio::join!(lexical_task, dense_task) },
            ) => joined,
        };
        let ((lexical_outcome, lexical_ms), (dense_outcome, embedding_ms, dense_ms)) = match joined
        {
            Ok(results) => results,
            Err(_) => {
                let reason = "total deadline exceeded".to_string();
                metrics.degradations.push(Degradation::Lexical);
                metrics.degradations.push(Degradation::Dense);
                metrics.total_ms = elapsed_ms(started);
                self.record(&metrics);
                return Err(SearchError::AllRetrievalFailed {
                    lexical: reason.clone(),
                    dense: reason,
                });
            }
        };
        metrics.stages.lexical_ms = Some(lexical_ms);
        metrics.stages.embedding_ms = Some(embedding_ms);
        metrics.stages.dense_ms = dense_ms;

        let mut lexical_reason = None;
        let lexical = match lexical_outcome {
            Ok(candidates) => {
                metrics.lexical_candidates = candidates.len();
                Some(candidates)
            }
            Err(reason) => {
                tracing::warn!(%reason, "lexical stage degraded");
                metrics.degradations.push(Degradation::Lexical);
                lexical_reason = Some(reason);
                None
            }
        };
        let mut dense_reason = None;
        let dense = match dense_outcome {
            Ok(candidates) => {
                metrics.dense_candidates = candidates.len();
                Some(candidates)
            }
            Err(reason) => {
                tracing::warn!(%reason, "dense stage degraded");
                metrics.degradations.push(Degradation::Dense);
                dense_reason = Some(reason);
                None
            }
        };

        if lexical.is_none() && dense.is_none() {
            metrics.total_ms = elapsed_ms(started);
            self.record(&metrics);
            return Err(SearchError::AllRetrievalFailed {
                lexical: lexical_reason.unwrap_or_default(),
                dense: dense_reason.unwrap_or_default(),
            });
        }

        let fusion_started = Instant::now();
        let features = analyzer::analyze(trimmed);
        let outcome = fusion::fuse(
            lexical.as_deref(),
            dense.as_deref(),
            &features,
            policy,
            n_lexical.max(n_vector),
        );
        metrics.stages.fusion_ms = Some(elapsed_ms(fusion_started));
        metrics.w_lexical = outcome.w_lexical;
        metrics.w_dense = outcome.w_dense;
        metrics.fused_candidates = outcome.candidates.len();

        if outcome.candidates.is_empty() {
            metrics.total_ms = elapsed_ms(started);
            self.record(&metrics);
            return Ok((Vec::new(), metrics));
        }

        // Rerank over min(2k, fused) candidates, otherwise hydrate only k.
        let pool_size = if options.enable_rerank {
            (2 * k).min(outcome.candidates.len())
        } else {
            k.min(outcome.candidates.len())
        };
        let top = &outcome.candidates[..pool_size];
        let ids: Vec<String> = top.iter().map(|c| c.chunk_id.clone()).collect();
        let chunks = self.store.fetch_chunks(&ids).await.map_err(|e| {
            let reason = format!("result hydration failed: {}", e);
            SearchError::AllRetrievalFailed {
                lexical: reason.clone(),
                dense: reason,
            }
        })?;
        let by_id: HashMap<&str, &Chunk> = chunks.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut hits: Vec<SearchHit> = top
            .iter()
            .filter_map(|candidate| {
                by_id.get(candidate.chunk_id.as_str()).map(|chunk| SearchHit {
                    chunk_id: candidate.chunk_id.clone(),
                    text: chunk.text.clone(),
                    title: chunk.title.clone(),
                    source_url: chunk.source_url.clone(),
                    taxonomy_path: chunk.taxonomy_path.clone(),
                    lexical: candidate.lexical,
                    dense: candidate.dense,
                    fused: candidate.fused,
                    rerank: 0.0,
                })
            })
            .collect();

        if options.enable_rerank && !hits.is_empty() {
            let t = Instant::now();
            let path = self.reranker.rerank(trimmed, &mut hits, k).await;
            metrics.stages.rerank_ms = Some(elapsed_ms(t));
            metrics.rerank_path = path;
            if path == RerankPath::Heuristic && self.reranker.has_encoder() {
                metrics.degradations.push(Degradation::Rerank);
            }
        }

        hits.truncate(k);
        metrics.returned = hits.len();
        metrics.total_ms = elapsed_ms(started);

        // Aborted work must not mutate the cache.
        if options.cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        if !options.bypass_cache && !hits.is_empty() && metrics.degradations.is_empty() {
            self.cache.put(key, compiled.fingerprint(), hits.clone());
        }
        self.record(&metrics);
        Ok((hits, metrics))
    }

    fn record(&self, metrics: &SearchMetrics) {
        if let Some(ref sink) = self.sink {
            sink.record(metrics);
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
