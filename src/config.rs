//! Engine configuration and per-request options.
//!
//! [`RetrievalConfig`] is immutable per engine instance; changing it means
//! constructing a new engine. [`SearchOptions`] is the closed per-request
//! record — every field has a documented default, there are no open-ended
//! extras.

use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::normalize::NormalizationPolicy;

/// Engine-wide tuning. Deserializable so hosts can embed it in their own
/// config files; every field falls back to the documented default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Lexical candidate count per request.
    pub n_lexical: usize,
    /// Dense candidate count per request.
    pub n_vector: usize,
    /// Hard cap on the caller's `k`.
    pub max_k: usize,
    /// Score normalization policy used by fusion.
    pub normalization: NormalizationPolicy,
    /// Result cache capacity in entries.
    pub cache_capacity: usize,
    /// Result cache TTL in seconds.
    pub cache_ttl_secs: u64,
    /// Query embedding deadline in milliseconds.
    pub embed_timeout_ms: u64,
    /// Lexical retrieval deadline in milliseconds.
    pub lexical_timeout_ms: u64,
    /// Dense retrieval deadline in milliseconds (excludes embedding).
    pub dense_timeout_ms: u64,
    /// Cross-encoder deadline in milliseconds.
    pub rerank_timeout_ms: u64,
    /// Outer bound on the whole request in milliseconds; may trigger before
    /// per-stage deadlines.
    pub total_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            n_lexical: 50,
            n_vector: 50,
            max_k: 200,
            normalization: NormalizationPolicy::MinMax,
            cache_capacity: 1000,
            cache_ttl_secs: 3600,
            embed_timeout_ms: 300,
            lexical_timeout_ms: 500,
            dense_timeout_ms: 800,
            rerank_timeout_ms: 500,
            total_timeout_ms: 1500,
        }
    }
}

impl RetrievalConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }

    pub fn lexical_timeout(&self) -> Duration {
        Duration::from_millis(self.lexical_timeout_ms)
    }

    pub fn dense_timeout(&self) -> Duration {
        Duration::from_millis(self.dense_timeout_ms)
    }

    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Override the configured lexical candidate count.
    pub n_lexical: Option<usize>,
    /// Override the configured dense candidate count.
    pub n_vector: Option<usize>,
    /// Run the rerank stage (default true).
    pub enable_rerank: bool,
    /// Override the configured normalization policy.
    pub normalization: Option<NormalizationPolicy>,
    /// Skip both cache lookup and cache store (default false).
    pub bypass_cache: bool,
    /// Correlation id echoed into metrics and spans.
    pub correlation_id: Option<String>,
    /// Caller-supplied cancellation signal; aborts in-flight work at the
    /// next join point. Defaults to a token that never fires.
    pub cancel: CancellationToken,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            n_lexical: None,
            n_vector: None,
            enable_rerank: true,
            normalization: None,
            bypass_cache: false,
            correlation_id: None,
            cancel: CancellationToken::new(),
        }
    }
}
