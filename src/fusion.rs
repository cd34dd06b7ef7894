//! Hybrid score fusion with adaptive weighting.
//!
//! Combines lexical and dense candidate lists into a single ranking:
//!
//! 1. Union chunk ids across both lists; a chunk missing from one side
//!    scores 0 there.
//! 2. Normalize each side independently (see [`crate::normalize`]).
//! 3. Pick weights from the query features: short exact-term queries lean
//!    lexical, high-complexity queries lean dense, a failed side forfeits
//!    its weight entirely.
//! 4. `fused = w_lex * lexical + w_dense * dense`, sorted descending with
//!    chunk id as the stable tie-breaker.

use std::collections::HashMap;

use crate::analyzer::QueryFeatures;
use crate::normalize::{normalize, NormalizationPolicy};

/// Default weight of each retriever before adaptation.
pub const BASE_WEIGHT: f32 = 0.5;
/// How far a query-feature signal shifts the weights.
pub const WEIGHT_SHIFT: f32 = 0.2;
/// Neither weight may exceed this cap while both sides are healthy.
pub const WEIGHT_CAP: f32 = 0.8;
/// Complexity above which a query is considered semantically heavy.
pub const COMPLEXITY_THRESHOLD: f32 = 0.7;

/// A chunk with its normalized per-retriever scores and fused score.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub chunk_id: String,
    /// Normalized lexical score; 0.0 if absent from the lexical list.
    pub lexical: f32,
    /// Normalized dense score; 0.0 if absent from the dense list.
    pub dense: f32,
    /// Weighted combination, in [0, 1].
    pub fused: f32,
}

/// Fusion result: ranked candidates plus the weights that produced them.
#[derive(Debug, Clone)]
pub struct FusionOutcome {
    pub candidates: Vec<FusedCandidate>,
    pub w_lexical: f32,
    pub w_dense: f32,
}

/// Pick fusion weights for two healthy sides from the query features.
///
/// Short exact-term queries take precedence over the complexity signal when
/// both fire. Weights always sum to 1.0.
fn adaptive_weights(features: &QueryFeatures) -> (f32, f32) {
    if features.is_short_exact() {
        let w_lex = (BASE_WEIGHT + WEIGHT_SHIFT).min(WEIGHT_CAP);
        (w_lex, 1.0 - w_lex)
    } else if features.complexity > COMPLEXITY_THRESHOLD {
        let w_dense = (BASE_WEIGHT + WEIGHT_SHIFT).min(WEIGHT_CAP);
        (1.0 - w_dense, w_dense)
    } else {
        (BASE_WEIGHT, BASE_WEIGHT)
    }
}

/// Fuse lexical and dense candidates into one ranking of at most `n_fuse`.
///
/// `None` marks a side that *failed* (degraded); `Some(&[])` is a healthy
/// side that found nothing. A failed side forfeits its weight to the other,
/// and the caller records the degradation. Both sides empty produces an
/// empty outcome.
pub fn fuse(
    lexical: Option<&[(String, f32)]>,
    dense: Option<&[(String, f32)]>,
    features: &QueryFeatures,
    policy: NormalizationPolicy,
    n_fuse: usize,
) -> FusionOutcome {
    let (w_lexical, w_dense) = match (lexical, dense) {
        (Some(_), Some(_)) => adaptive_weights(features),
        (Some(_), None) => (1.0, 0.0),
        (None, Some(_)) => (0.0, 1.0),
        (None, None) => (0.0, 0.0),
    };

    let lex = lexical.unwrap_or(&[]);
    let den = dense.unwrap_or(&[]);

    let norm_lex = normalize(&lex.iter().map(|(_, s)| *s).collect::<Vec<_>>(), policy);
    let norm_den = normalize(&den.iter().map(|(_, s)| *s).collect::<Vec<_>>(), policy);

    let mut candidates: Vec<FusedCandidate> = Vec::with_capacity(lex.len() + den.len());
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(lex.len() + den.len());

    for (i, (id, _)) in lex.iter().enumerate() {
        if index.contains_key(id.as_str()) {
            continue; // duplicate id within one list keeps its best rank
        }
        index.insert(id.as_str(), candidates.len());
        candidates.push(FusedCandidate {
            chunk_id: id.clone(),
            lexical: norm_lex[i].clamp(0.0, 1.0),
            dense: 0.0,
            fused: 0.0,
        });
    }
    for (i, (id, _)) in den.iter().enumerate() {
        let score = norm_den[i].clamp(0.0, 1.0);
        match index.get(id.as_str()) {
            Some(&pos) => {
                if candidates[pos].dense == 0.0 {
                    candidates[pos].dense = score;
                }
            }
            None => {
                index.insert(id.as_str(), candidates.len());
                candidates.push(FusedCandidate {
                    chunk_id: id.clone(),
                    lexical: 0.0,
                    dense: score,
                    fused: 0.0,
                });
            }
        }
    }

    for c in &mut candidates {
        c.fused = (w_lexical * c.lexical + w_dense * c.dense).clamp(0.0, 1.0);
    }

    candidates.sort_by(|a, b| {
        b.fused
            .total_cmp(&a.fused)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(n_fuse);

    FusionOutcome {
        candidates,
        w_lexical,
        w_dense,
    }
}
