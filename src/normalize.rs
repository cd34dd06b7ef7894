//! Score normalization policies.
//!
//! Maps a sequence of raw retrieval scores into [0, 1], preserving index
//! alignment with the candidate list that produced them. Normalization is
//! fail-open: if the input contains non-finite values (or a policy produces
//! them), the original scores are returned unchanged and the caller treats
//! the output as a soft signal rather than a guaranteed unit interval.

use serde::{Deserialize, Serialize};

/// Rank constant for reciprocal-rank normalization.
///
/// Standard value from the original RRF paper; higher values flatten the
/// contribution of top ranks relative to lower ones.
pub const RRF_K: f32 = 60.0;

/// Normalization policy applied independently to each retriever's scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormalizationPolicy {
    /// `(x - min) / (max - min)`; degenerate input (all equal) maps to 1.0.
    #[default]
    MinMax,
    /// `(x - mean) / stddev`, squashed through a sigmoid into (0, 1).
    /// Zero variance maps to all 0.0.
    ZScore,
    /// Scores replaced by `1 / (rank + 60)` over the descending order, then
    /// min-max scaled.
    ReciprocalRank,
}

/// Logistic squash: monotone map from the real line into (0, 1).
///
/// Monotonicity means z-score normalization preserves the ordering of the
/// raw scores by construction.
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Normalize `scores` under `policy`.
///
/// Output is index-aligned with the input. Empty input produces empty
/// output.
pub fn normalize(scores: &[f32], policy: NormalizationPolicy) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    if scores.iter().any(|s| !s.is_finite()) {
        tracing::warn!(policy = ?policy, "non-finite scores, returning input unnormalized");
        return scores.to_vec();
    }

    let out = match policy {
        NormalizationPolicy::MinMax => min_max(scores),
        NormalizationPolicy::ZScore => z_score(scores),
        NormalizationPolicy::ReciprocalRank => reciprocal_rank(scores),
    };

    if out.iter().any(|s| !s.is_finite()) {
        tracing::warn!(policy = ?policy, "normalization produced non-finite output, failing open");
        return scores.to_vec();
    }
    out
}

fn min_max(scores: &[f32]) -> Vec<f32> {
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max > min {
        scores.iter().map(|s| (s - min) / (max - min)).collect()
    } else {
        vec![1.0; scores.len()]
    }
}

fn z_score(scores: &[f32]) -> Vec<f32> {
    let n = scores.len() as f32;
    let mean = scores.iter().sum::<f32>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
    let stddev = variance.sqrt();
    if stddev == 0.0 {
        return vec![0.0; scores.len()];
    }
    scores.iter().map(|s| sigmoid((s - mean) / stddev)).collect()
}

fn reciprocal_rank(scores: &[f32]) -> Vec<f32> {
    // Stable sort of indices by descending score: equal scores keep their
    // first-appearance order, so ranks are deterministic.
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut rr = vec![0.0f32; scores.len()];
    for (rank0, &idx) in order.iter().enumerate() {
        rr[idx] = 1.0 / (rank0 as f32 + 1.0 + RRF_K);
    }
    min_max(&rr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_input() {
        for policy in [
            NormalizationPolicy::MinMax,
            NormalizationPolicy::ZScore,
            NormalizationPolicy::ReciprocalRank,
        ] {
            assert!(normalize(&[], policy).is_empty());
        }
    }

    #[test]
    fn test_min_max_range() {
        let out = normalize(&[10.0, 5.0, 0.0], NormalizationPolicy::MinMax);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[2] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_min_max_all_equal() {
        let out = normalize(&[3.0, 3.0, 3.0], NormalizationPolicy::MinMax);
        assert_eq!(out, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_z_score_zero_variance() {
        let out = normalize(&[2.0, 2.0], NormalizationPolicy::ZScore);
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn test_z_score_preserves_ordering() {
        let raw = [3.0, -1.0, 7.0, 0.5];
        let out = normalize(&raw, NormalizationPolicy::ZScore);
        // raw ordering: 7.0 > 3.0 > 0.5 > -1.0
        assert!(out[2] > out[0]);
        assert!(out[0] > out[3]);
        assert!(out[3] > out[1]);
        for s in &out {
            assert!((0.0..=1.0).contains(s));
        }
    }

    #[test]
    fn test_reciprocal_rank_ordering() {
        let out = normalize(&[0.2, 0.9, 0.5], NormalizationPolicy::ReciprocalRank);
        // Best raw score gets 1.0 after min-max, worst gets 0.0
        assert!((out[1] - 1.0).abs() < 1e-6);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!(out[2] > out[0] && out[2] < out[1]);
    }

    #[test]
    fn test_reciprocal_rank_single() {
        let out = normalize(&[42.0], NormalizationPolicy::ReciprocalRank);
        assert_eq!(out, vec![1.0]);
    }

    #[test]
    fn test_fail_open_on_nan() {
        let raw = [1.0, f32::NAN, 3.0];
        let out = normalize(&raw, NormalizationPolicy::MinMax);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], 1.0);
        assert!(out[1].is_nan());
        assert_eq!(out[2], 3.0);
    }

    #[test]
    fn test_fail_open_on_infinity() {
        let raw = [f32::INFINITY, 1.0];
        let out = normalize(&raw, NormalizationPolicy::ZScore);
        assert_eq!(out[0], f32::INFINITY);
        assert_eq!(out[1], 1.0);
    }

    proptest! {
        #[test]
        fn prop_outputs_in_unit_interval(scores in prop::collection::vec(-1e6f32..1e6, 0..64)) {
            for policy in [
                NormalizationPolicy::MinMax,
                NormalizationPolicy::ZScore,
                NormalizationPolicy::ReciprocalRank,
            ] {
                let out = normalize(&scores, policy);
                prop_assert_eq!(out.len(), scores.len());
                for s in &out {
                    prop_assert!((0.0..=1.0).contains(s), "out of range: {} ({:?})", s, policy);
                }
            }
        }

        #[test]
        fn prop_min_max_idempotent(scores in prop::collection::vec(0.0f32..=1.0, 2..32)) {
            let once = normalize(&scores, NormalizationPolicy::MinMax);
            let twice = normalize(&once, NormalizationPolicy::MinMax);
            for (a, b) in once.iter().zip(&twice) {
                prop_assert!((a - b).abs() < 1e-5);
            }
        }

        #[test]
        fn prop_min_max_preserves_ordering(scores in prop::collection::vec(-1e3f32..1e3, 2..32)) {
            let out = normalize(&scores, NormalizationPolicy::MinMax);
            for i in 0..scores.len() {
                for j in 0..scores.len() {
                    if scores[i] > scores[j] {
                        prop_assert!(out[i] >= out[j]);
                    }
                }
            }
        }
    }
}
