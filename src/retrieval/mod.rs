//! Permission-aware hybrid retrieval and ranking
//!
//! Vector and keyword backends run independently under their own access
//! filters, Reciprocal Rank Fusion merges the two lists, and a cross-encoder
//! reorders the top of the fused list.

mod fusion;
mod hybrid;
mod permissions;
mod reranker;

pub use fusion::{normalize_scores, reciprocal_rank_fusion, FusionConfig, FusionError};
pub use hybrid::{HybridSearcher, SearchError};
pub use permissions::{
    access_roles_for, build_vector_filter, department_to_role, filter_keyword_hits, ADMIN_ROLE,
    ALL_ROLES,
};
pub use reranker::{CrossEncoder, FastEmbedCrossEncoder, RerankError, Reranker};

use serde::{Deserialize, Serialize};

/// Document sensitivity tag controlling whether department-role membership is
/// required for visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Public,
    Restricted,
}

impl Classification {
    /// Parse a stored tag; anything unrecognized is treated as public
    pub fn parse(value: &str) -> Self {
        match value {
            "restricted" => Classification::Restricted,
            _ => Classification::Public,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Public => "public",
            Classification::Restricted => "restricted",
        }
    }
}

/// Which retrieval backend produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalSource {
    Vector,
    Keyword,
}

/// A retrieved passage plus everything the pipeline stages attach to it.
///
/// One explicit record type populated incrementally: the raw backend score in
/// `score` is overwritten first by min-max normalization and then by the fused
/// score; `rerank_score` stays `None` until the reranker runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,
    pub doc_id: String,
    pub doc_title: String,
    pub department: String,
    pub classification: Classification,
    /// Position within the source document; both backends populate this, the
    /// fuser falls back to a text-prefix merge key when it is missing
    pub chunk_index: Option<u64>,
    pub source: RetrievalSource,
    /// Raw, then normalized, then fused score
    pub score: f32,
    /// RRF contribution from the vector list, `alpha`-weighted at fusion
    #[serde(default)]
    pub vec_rrf: f32,
    /// RRF contribution from the keyword list
    #[serde(default)]
    pub keyword_rrf: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl Candidate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        text: impl Into<String>,
        doc_id: impl Into<String>,
        doc_title: impl Into<String>,
        department: impl Into<String>,
        classification: Classification,
        chunk_index: Option<u64>,
        source: RetrievalSource,
        score: f32,
    ) -> Self {
        Self {
            text: text.into(),
            doc_id: doc_id.into(),
            doc_title: doc_title.into(),
            department: department.into(),
            classification,
            chunk_index,
            source,
            score,
            vec_rrf: 0.0,
            keyword_rrf: 0.0,
            rerank_score: None,
        }
    }
}
