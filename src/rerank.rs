//! Second-pass reranking of fused candidates.
//!
//! Scores (query, chunk_text) pairs with a cross-encoder when one is
//! configured, re-sorts descending, and truncates. When the encoder is
//! absent, times out, or fails, a deterministic heuristic takes over:
//! rerank never fails a request, it only degrades.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::model::SearchHit;
use crate::normalize::{normalize, NormalizationPolicy};
use crate::traits::CrossEncoder;

#[derive(Debug, Error)]
pub enum RerankError {
    #[error("cross-encoder error: {0}")]
    Encoder(String),
    #[error("cross-encoder returned {actual} scores for {expected} candidates")]
    ScoreCount { expected: usize, actual: usize },
}

/// Which rerank path produced the final ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RerankPath {
    /// Reranking did not run (disabled or nothing to rank).
    None,
    /// Cross-encoder scores were used.
    CrossEncoder,
    /// Deterministic heuristic fallback was used.
    Heuristic,
}

/// Reranker with explicit variant dispatch: cross-encoder when configured,
/// heuristic otherwise (and as the fallback on any encoder failure).
pub struct Reranker {
    encoder: Option<Arc<dyn CrossEncoder>>,
    timeout: Duration,
}

impl Reranker {
    /// Heuristic-only reranker.
    pub fn heuristic() -> Self {
        Self {
            encoder: None,
            timeout: Duration::ZERO,
        }
    }

    /// Cross-encoder reranker with the heuristic as fallback.
    pub fn with_encoder(encoder: Arc<dyn CrossEncoder>, timeout: Duration) -> Self {
        Self {
            encoder: Some(encoder),
            timeout,
        }
    }

    /// True if a cross-encoder is configured.
    pub fn has_encoder(&self) -> bool {
        self.encoder.is_some()
    }

    /// Rerank `hits` in place and truncate to `top_k`.
    ///
    /// Returns the path that ran so the caller can record degradations.
    /// Assigns `rerank` scores in [0, 1]; ordering is descending by
    /// `rerank`, ties broken by `fused` then chunk id.
    pub async fn rerank(&self, query: &str, hits: &mut Vec<SearchHit>, top_k: usize) -> RerankPath {
        if hits.is_empty() {
            return RerankPath::None;
        }
        tracing::debug!(count = hits.len(), top_k, "reranking candidates");

        if let Some(ref encoder) = self.encoder {
            match self.encode_scores(encoder.as_ref(), query, hits).await {
                Ok(scores) => {
                    apply_scores(hits, &scores, top_k);
                    return RerankPath::CrossEncoder;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cross-encoder failed, using heuristic fallback");
                }
            }
        }

        heuristic_rerank(query, hits, top_k);
        RerankPath::Heuristic
    }

    async fn encode_scores(
        &self,
        encoder: &dyn CrossEncoder,
        query: &str,
        hits: &[SearchHit],
    ) -> Result<Vec<f32>, RerankError> {
        let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        let scores = tokio::time::timeout(self.timeout, encoder.score(query, &texts))
            .await
            .map_err(|_| RerankError::Encoder("deadline exceeded".to_string()))??;
        if scores.len() != hits.len() {
            return Err(RerankError::ScoreCount {
                expected: hits.len(),
                actual: scores.len(),
            });
        }
        Ok(scores)
    }
}

/// Assign normalized cross-encoder scores and re-sort.
fn apply_scores(hits: &mut Vec<SearchHit>, raw: &[f32], top_k: usize) {
    let norm = normalize(raw, NormalizationPolicy::MinMax);
    for (hit, score) in hits.iter_mut().zip(&norm) {
        hit.rerank = score.clamp(0.0, 1.0);
    }
    sort_and_truncate(hits, top_k);
}

/// Deterministic heuristic rescoring.
///
/// `quality = 1.0 + 0.2 * term_overlap + 0.1 * length_penalty
///          + 0.1 * diversity_bonus`, applied multiplicatively to the fused
/// score and clamped into [0, 1]. The diversity bonus is a property of the
/// whole candidate set, so every hit receives the same value.
fn heuristic_rerank(query: &str, hits: &mut Vec<SearchHit>, top_k: usize) {
    let q_terms = terms(query);
    let diversity = diversity_bonus(hits);

    for hit in hits.iter_mut() {
        let t_terms = terms(&hit.text);
        let overlap = if q_terms.is_empty() {
            0.0
        } else {
            q_terms.intersection(&t_terms).count() as f32 / q_terms.len() as f32
        };
        let quality =
            1.0 + 0.2 * overlap + 0.1 * length_penalty(hit.text.chars().count()) + 0.1 * diversity;
        hit.rerank = (hit.fused * quality).clamp(0.0, 1.0);
    }
    sort_and_truncate(hits, top_k);
}

/// Penalty favoring mid-length chunks over fragments and walls of text.
fn length_penalty(chars: usize) -> f32 {
    match chars {
        0..=49 => 0.7,
        50..=99 => 0.9,
        100..=500 => 1.0,
        501..=1000 => 0.95,
        _ => 0.8,
    }
}

/// Diversity of the candidate set: distinct sources plus distinct top-level
/// taxonomy labels, scaled into [0, 1].
fn diversity_bonus(hits: &[SearchHit]) -> f32 {
    let sources: HashSet<&str> = hits
        .iter()
        .filter_map(|h| h.source_url.as_deref())
        .collect();
    let prefixes: HashSet<&str> = hits
        .iter()
        .filter_map(|h| h.taxonomy_path.first().map(String::as_str))
        .collect();
    (((sources.len() + prefixes.len()) as f32) / 10.0).min(1.0)
}

/// Lowercased alphanumeric term set.
fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn sort_and_truncate(hits: &mut Vec<SearchHit>, top_k: usize) {
    hits.sort_by(|a, b| {
        b.rerank
            .total_cmp(&a.rerank)
            .then_with(|| b.fused.total_cmp(&a.fused))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(top_k);
}
