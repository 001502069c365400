//! Cross-encoder reranking for final precision ordering
//!
//! The model scores every (query, passage) pair in one batched call; the
//! model itself is a black box behind the `CrossEncoder` trait.

use crate::retrieval::Candidate;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitializationError(String),

    #[error("Reranking failed: {0}")]
    RerankingError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Joint relevance scoring of (query, passage) pairs in one batched call
pub trait CrossEncoder: Send + Sync {
    /// Score every passage against the query; returns one score per passage,
    /// in input order
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, RerankError>;

    fn model_name(&self) -> &str;
}

/// FastEmbed cross-encoder implementation
pub struct FastEmbedCrossEncoder {
    model: Arc<TextRerank>,
    model_name: String,
}

impl FastEmbedCrossEncoder {
    pub fn new(model_name: &str) -> Result<Self, RerankError> {
        let reranker_model = match model_name {
            "bge-reranker-base" => RerankerModel::BGERerankerBase,
            other => {
                return Err(RerankError::InitializationError(format!(
                    "Unsupported reranker model: {}. Supported: bge-reranker-base",
                    other
                )));
            }
        };

        tracing::info!("Initializing reranker model: {}", model_name);

        let init_options =
            RerankInitOptions::new(reranker_model).with_show_download_progress(true);

        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
        })
    }
}

impl CrossEncoder for FastEmbedCrossEncoder {
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, RerankError> {
        if query.is_empty() {
            return Err(RerankError::InvalidInput("Query cannot be empty".to_string()));
        }

        let documents: Vec<&str> = passages.iter().map(|s| s.as_str()).collect();

        let results = self
            .model
            .rerank(query, documents, false, None)
            .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        // The backend returns results sorted by relevance; map back to input order
        let mut scores = vec![0.0_f32; passages.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }

        Ok(scores)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Reranker stage: re-scores the top fused candidates and keeps `top_n`
pub struct Reranker {
    encoder: Arc<dyn CrossEncoder>,
}

impl Reranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>) -> Self {
        Self { encoder }
    }

    /// Rerank candidates by cross-encoder relevance, descending.
    ///
    /// Empty input short-circuits without invoking the model. Each surviving
    /// candidate carries its `rerank_score`; the list is truncated to `top_n`.
    pub fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<Candidate>,
        top_n: usize,
    ) -> Result<Vec<Candidate>, RerankError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let passages: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        let scores = self.encoder.score(query, &passages)?;

        if scores.len() != candidates.len() {
            return Err(RerankError::RerankingError(format!(
                "Scorer returned {} scores for {} passages",
                scores.len(),
                candidates.len()
            )));
        }

        for (candidate, score) in candidates.iter_mut().zip(scores) {
            candidate.rerank_score = Some(score);
        }

        candidates.sort_by(|a, b| {
            b.rerank_score
                .partial_cmp(&a.rerank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(top_n);

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{Classification, RetrievalSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores passages by how many query words they contain; counts calls so
    /// tests can assert the short-circuit
    struct WordOverlapScorer {
        calls: AtomicUsize,
    }

    impl WordOverlapScorer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl CrossEncoder for WordOverlapScorer {
        fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, RerankError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let words: Vec<&str> = query.split_whitespace().collect();
            Ok(passages
                .iter()
                .map(|p| words.iter().filter(|w| p.contains(**w)).count() as f32)
                .collect())
        }

        fn model_name(&self) -> &str {
            "word-overlap"
        }
    }

    fn candidate(text: &str) -> Candidate {
        Candidate::new(
            text,
            "doc",
            "title",
            "HR",
            Classification::Public,
            Some(0),
            RetrievalSource::Vector,
            0.5,
        )
    }

    #[test]
    fn reorders_by_score_and_truncates() {
        let scorer = Arc::new(WordOverlapScorer::new());
        let reranker = Reranker::new(scorer);

        let candidates = vec![
            candidate("nothing relevant here"),
            candidate("parental leave policy details"),
            candidate("leave requests"),
        ];

        let reranked = reranker
            .rerank("parental leave policy", candidates, 2)
            .unwrap();

        assert_eq!(reranked.len(), 2);
        assert_eq!(reranked[0].text, "parental leave policy details");
        assert_eq!(reranked[0].rerank_score, Some(3.0));
        assert_eq!(reranked[1].text, "leave requests");
    }

    #[test]
    fn empty_candidates_skip_the_model() {
        let scorer = Arc::new(WordOverlapScorer::new());
        let reranker = Reranker::new(scorer.clone());

        let reranked = reranker.rerank("anything", Vec::new(), 8).unwrap();

        assert!(reranked.is_empty());
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn single_batched_call_per_rerank() {
        let scorer = Arc::new(WordOverlapScorer::new());
        let reranker = Reranker::new(scorer.clone());

        let candidates = (0..10).map(|i| candidate(&format!("passage {i}"))).collect();
        reranker.rerank("passage", candidates, 8).unwrap();

        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
    }
}
