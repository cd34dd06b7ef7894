//! Per-request observability.
//!
//! Every search produces a [`SearchMetrics`] record: stage latencies,
//! candidate counts, fusion weights, which rerank path ran, and any soft
//! degradations. Degraded results are never returned silently; the marker
//! always rides along here.

use serde::Serialize;
use std::fmt;

use crate::rerank::RerankPath;

/// A stage that failed softly; the request still produced usable results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Degradation {
    /// Lexical retrieval failed or timed out; results are dense-only.
    Lexical,
    /// Dense retrieval (or query embedding) failed or timed out; results
    /// are lexical-only.
    Dense,
    /// Cross-encoder failed; the heuristic fallback ordered the results.
    Rerank,
    /// Cache read/write failed; the request proceeded uncached.
    Cache,
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Degradation::Lexical => "lexical",
            Degradation::Dense => "dense",
            Degradation::Rerank => "rerank",
            Degradation::Cache => "cache",
        };
        f.write_str(s)
    }
}

/// Wall-clock latency per pipeline stage, in milliseconds.
///
/// Stages that did not run are `None` (e.g. everything but `total` on a
/// cache hit).
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageLatencies {
    pub embedding_ms: Option<u64>,
    pub lexical_ms: Option<u64>,
    pub dense_ms: Option<u64>,
    pub fusion_ms: Option<u64>,
    pub rerank_ms: Option<u64>,
}

/// Observable record of a single `search` call.
#[derive(Debug, Clone, Serialize)]
pub struct SearchMetrics {
    /// Caller-supplied correlation id, echoed back verbatim.
    pub correlation_id: Option<String>,
    /// End-to-end latency in milliseconds.
    pub total_ms: u64,
    /// Per-stage latencies.
    pub stages: StageLatencies,
    /// Raw candidate count from the lexical retriever.
    pub lexical_candidates: usize,
    /// Raw candidate count from the dense retriever.
    pub dense_candidates: usize,
    /// Candidate count after fusion.
    pub fused_candidates: usize,
    /// Number of hits returned to the caller.
    pub returned: usize,
    /// True when the result came from the cache.
    pub cache_hit: bool,
    /// Lexical fusion weight actually used.
    pub w_lexical: f32,
    /// Dense fusion weight actually used.
    pub w_dense: f32,
    /// Which rerank path ran.
    pub rerank_path: RerankPath,
    /// Soft failures absorbed by this request.
    pub degradations: Vec<Degradation>,
}

impl SearchMetrics {
    /// Fresh record with nothing measured yet.
    pub fn new(correlation_id: Option<String>) -> Self {
        Self {
            correlation_id,
            total_ms: 0,
            stages: StageLatencies::default(),
            lexical_candidates: 0,
            dense_candidates: 0,
            fused_candidates: 0,
            returned: 0,
            cache_hit: false,
            w_lexical: 0.0,
            w_dense: 0.0,
            rerank_path: RerankPath::None,
            degradations: Vec::new(),
        }
    }

    /// True if any stage degraded.
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}
