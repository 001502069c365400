//! Score normalization and Reciprocal Rank Fusion
//!
//! Merges the two backends' already-filtered result lists into one ordered,
//! deduplicated list. Rank contributions are `1/(k + position)` with 0-based
//! positions; an item missing from a backend contributes 0 for it, not a
//! rank-based penalty.

use crate::retrieval::Candidate;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid fusion weight: alpha must be within [0, 1], got {0}")]
    InvalidAlpha(f32),

    #[error("Invalid RRF constant: k must be positive, got {0}")]
    InvalidK(f32),
}

/// Configuration for fusion
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Weight of the vector contribution; keyword gets `1 - alpha`
    pub alpha: f32,

    /// RRF smoothing constant, damps the advantage of rank-1 positions
    pub rrf_k: f32,
}

impl FusionConfig {
    pub fn new(alpha: f32, rrf_k: f32) -> Result<Self, FusionError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(FusionError::InvalidAlpha(alpha));
        }
        if rrf_k <= 0.0 {
            return Err(FusionError::InvalidK(rrf_k));
        }

        Ok(Self { alpha, rrf_k })
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            rrf_k: 60.0,
        }
    }
}

/// Min-max scale a backend list's scores to [0, 1] in place.
///
/// A zero score range normalizes every member to 1.0; an empty list is a
/// no-op. The normalized value is only a fallback display score: fusion
/// overwrites it and never reads it.
pub fn normalize_scores(results: &mut [Candidate]) {
    if results.is_empty() {
        return;
    }

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for r in results.iter() {
        min = min.min(r.score);
        max = max.max(r.score);
    }

    let range = max - min;
    for r in results.iter_mut() {
        r.score = if range > 0.0 {
            (r.score - min) / range
        } else {
            1.0
        };
    }
}

/// Merge key identifying one passage across backends.
///
/// Both backends populate `chunk_index`, so the text-prefix fallback only
/// triggers for records that lost it; the 50-character prefix is a heuristic
/// that can mismerge distinct chunks sharing a prefix.
#[derive(Debug, Hash, PartialEq, Eq)]
enum MergeKey {
    Indexed(String, u64),
    TextPrefix(String, String),
}

fn merge_key(candidate: &Candidate) -> MergeKey {
    match candidate.chunk_index {
        Some(index) => MergeKey::Indexed(candidate.doc_id.clone(), index),
        None => MergeKey::TextPrefix(
            candidate.doc_id.clone(),
            candidate.text.chars().take(50).collect(),
        ),
    }
}

/// Fuse two ranked candidate lists with Reciprocal Rank Fusion.
///
/// Each backend list assigns its members `1/(k + position)` (0-based
/// position); candidates present in both lists merge into one record carrying
/// both contributions. Final score: `alpha * vec + (1 - alpha) * keyword`,
/// sorted descending, ties broken by first-seen order (vector members are
/// processed before keyword members).
pub fn reciprocal_rank_fusion(
    vec_results: Vec<Candidate>,
    keyword_results: Vec<Candidate>,
    config: &FusionConfig,
) -> Vec<Candidate> {
    let mut fused: Vec<Candidate> = Vec::new();
    let mut by_key: HashMap<MergeKey, usize> = HashMap::new();

    for (rank, mut candidate) in vec_results.into_iter().enumerate() {
        let contribution = 1.0 / (config.rrf_k + rank as f32);
        match by_key.entry(merge_key(&candidate)) {
            Entry::Occupied(slot) => {
                fused[*slot.get()].vec_rrf = contribution;
            }
            Entry::Vacant(slot) => {
                candidate.vec_rrf = contribution;
                candidate.keyword_rrf = 0.0;
                slot.insert(fused.len());
                fused.push(candidate);
            }
        }
    }

    for (rank, mut candidate) in keyword_results.into_iter().enumerate() {
        let contribution = 1.0 / (config.rrf_k + rank as f32);
        match by_key.entry(merge_key(&candidate)) {
            Entry::Occupied(slot) => {
                fused[*slot.get()].keyword_rrf = contribution;
            }
            Entry::Vacant(slot) => {
                candidate.vec_rrf = 0.0;
                candidate.keyword_rrf = contribution;
                slot.insert(fused.len());
                fused.push(candidate);
            }
        }
    }

    for candidate in &mut fused {
        candidate.score =
            config.alpha * candidate.vec_rrf + (1.0 - config.alpha) * candidate.keyword_rrf;
    }

    // Stable sort keeps first-seen order for equal scores
    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{Classification, RetrievalSource};

    fn candidate(
        doc_id: &str,
        chunk_index: Option<u64>,
        text: &str,
        source: RetrievalSource,
        score: f32,
    ) -> Candidate {
        Candidate::new(
            text,
            doc_id,
            "title",
            "HR",
            Classification::Public,
            chunk_index,
            source,
            score,
        )
    }

    #[test]
    fn normalize_scales_to_unit_interval() {
        let mut results = vec![
            candidate("a", Some(0), "x", RetrievalSource::Vector, 2.0),
            candidate("a", Some(1), "y", RetrievalSource::Vector, 6.0),
            candidate("a", Some(2), "z", RetrievalSource::Vector, 4.0),
        ];

        normalize_scores(&mut results);

        assert_eq!(results[0].score, 0.0);
        assert_eq!(results[1].score, 1.0);
        assert_eq!(results[2].score, 0.5);
    }

    #[test]
    fn normalize_zero_range_yields_ones() {
        let mut results = vec![
            candidate("a", Some(0), "x", RetrievalSource::Vector, 3.3),
            candidate("a", Some(1), "y", RetrievalSource::Vector, 3.3),
        ];

        normalize_scores(&mut results);
        assert!(results.iter().all(|r| r.score == 1.0));
    }

    #[test]
    fn normalize_empty_is_noop() {
        let mut results: Vec<Candidate> = Vec::new();
        normalize_scores(&mut results);
        assert!(results.is_empty());
    }

    #[test]
    fn fusion_arithmetic_both_backends() {
        // vector-rank 0 and keyword-rank 2: 0.7/60 + 0.3/62
        let vec_results = vec![candidate("d", Some(0), "x", RetrievalSource::Vector, 0.9)];
        let keyword_results = vec![
            candidate("o1", Some(0), "a", RetrievalSource::Keyword, 9.0),
            candidate("o2", Some(0), "b", RetrievalSource::Keyword, 8.0),
            candidate("d", Some(0), "x", RetrievalSource::Keyword, 7.0),
        ];

        let fused = reciprocal_rank_fusion(vec_results, keyword_results, &FusionConfig::default());

        let merged = fused.iter().find(|c| c.doc_id == "d").unwrap();
        let expected = 0.7 / 60.0 + 0.3 / 62.0;
        assert!((merged.score - expected).abs() < 1e-6);
        assert!((merged.score - 0.016_505).abs() < 1e-5);
    }

    #[test]
    fn fusion_arithmetic_single_backend() {
        // present only at vector-rank 4: 0.7/64, keyword contributes 0
        let vec_results: Vec<Candidate> = (0..5)
            .map(|i| {
                candidate(
                    &format!("d{i}"),
                    Some(0),
                    "x",
                    RetrievalSource::Vector,
                    1.0 - i as f32 * 0.1,
                )
            })
            .collect();

        let fused = reciprocal_rank_fusion(vec_results, Vec::new(), &FusionConfig::default());

        let last = fused.iter().find(|c| c.doc_id == "d4").unwrap();
        assert!((last.score - 0.7 / 64.0).abs() < 1e-7);
        assert!((last.score - 0.010_938).abs() < 1e-6);
        assert_eq!(last.keyword_rrf, 0.0);
    }

    #[test]
    fn duplicates_merge_never_double_count() {
        let vec_results = vec![candidate("d", Some(3), "x", RetrievalSource::Vector, 0.9)];
        let keyword_results = vec![candidate("d", Some(3), "x", RetrievalSource::Keyword, 5.0)];

        let fused = reciprocal_rank_fusion(vec_results, keyword_results, &FusionConfig::default());

        assert_eq!(fused.len(), 1);
        assert!(fused[0].vec_rrf > 0.0);
        assert!(fused[0].keyword_rrf > 0.0);
    }

    #[test]
    fn missing_chunk_index_falls_back_to_text_prefix() {
        let shared_text = "identical leading fifty characters for both hits!! tail differs";
        let vec_results = vec![candidate("d", None, shared_text, RetrievalSource::Vector, 0.9)];
        let keyword_results =
            vec![candidate("d", None, shared_text, RetrievalSource::Keyword, 4.0)];

        let fused = reciprocal_rank_fusion(vec_results, keyword_results, &FusionConfig::default());
        assert_eq!(fused.len(), 1);

        // Different prefixes stay distinct
        let vec_results = vec![candidate("d", None, "first passage", RetrievalSource::Vector, 0.9)];
        let keyword_results =
            vec![candidate("d", None, "second passage", RetrievalSource::Keyword, 4.0)];

        let fused = reciprocal_rank_fusion(vec_results, keyword_results, &FusionConfig::default());
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn fusion_is_deterministic() {
        let make_inputs = || {
            let vec_results = vec![
                candidate("a", Some(0), "x", RetrievalSource::Vector, 0.9),
                candidate("b", Some(0), "y", RetrievalSource::Vector, 0.8),
                candidate("c", Some(0), "z", RetrievalSource::Vector, 0.7),
            ];
            let keyword_results = vec![
                candidate("b", Some(0), "y", RetrievalSource::Keyword, 12.0),
                candidate("d", Some(0), "w", RetrievalSource::Keyword, 11.0),
            ];
            (vec_results, keyword_results)
        };

        let config = FusionConfig::default();
        let (v1, k1) = make_inputs();
        let first = reciprocal_rank_fusion(v1, k1, &config);
        let (v2, k2) = make_inputs();
        let second = reciprocal_rank_fusion(v2, k2, &config);

        let order1: Vec<&str> = first.iter().map(|c| c.doc_id.as_str()).collect();
        let order2: Vec<&str> = second.iter().map(|c| c.doc_id.as_str()).collect();
        assert_eq!(order1, order2);

        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.score.to_bits(), b.score.to_bits());
        }
    }

    #[test]
    fn ties_keep_first_seen_order() {
        // Same rank in disjoint backends with alpha 0.5 produces equal scores;
        // the vector-list member was processed first and must stay first
        let config = FusionConfig::new(0.5, 60.0).unwrap();
        let vec_results = vec![candidate("v", Some(0), "x", RetrievalSource::Vector, 0.9)];
        let keyword_results = vec![candidate("k", Some(0), "y", RetrievalSource::Keyword, 3.0)];

        let fused = reciprocal_rank_fusion(vec_results, keyword_results, &config);

        assert_eq!(fused[0].doc_id, "v");
        assert_eq!(fused[1].doc_id, "k");
        assert_eq!(fused[0].score.to_bits(), fused[1].score.to_bits());
    }

    #[test]
    fn normalized_score_is_overwritten_by_fusion() {
        // Stage-1 normalization feeds nothing into fusion; the fused score
        // depends only on rank positions
        let mut vec_results = vec![candidate("a", Some(0), "x", RetrievalSource::Vector, 123.0)];
        normalize_scores(&mut vec_results);
        assert_eq!(vec_results[0].score, 1.0);

        let fused = reciprocal_rank_fusion(vec_results, Vec::new(), &FusionConfig::default());
        assert!((fused[0].score - 0.7 / 60.0).abs() < 1e-7);
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(FusionConfig::new(1.5, 60.0).is_err());
        assert!(FusionConfig::new(0.7, 0.0).is_err());
        assert!(FusionConfig::new(0.0, 60.0).is_ok());
    }
}
