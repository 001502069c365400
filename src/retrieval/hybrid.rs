//! Hybrid search combining the vector and keyword backends
//!
//! Both backends run concurrently under a bounded deadline. A backend call
//! failure (or deadline expiry) degrades to zero results from that backend;
//! the pipeline proceeds on whatever candidates remain. Access control is
//! applied before fusion: natively for the vector store, post-hoc for
//! keyword hits.

use crate::auth::UserContext;
use crate::config::{IndexingConfig, RetrievalConfig};
use crate::index::{EmbeddingProvider, KeywordIndex, RoleFilter, VectorStore};
use crate::retrieval::{
    build_vector_filter, filter_keyword_hits, normalize_scores, reciprocal_rank_fusion, Candidate,
    FusionConfig,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::timeout;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingError(String),

    #[error("Vector search failed: {0}")]
    VectorSearchError(String),

    #[error("Keyword search failed: {0}")]
    KeywordSearchError(String),

    #[error("Backend call exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

/// Hybrid searcher over both retrieval backends
pub struct HybridSearcher {
    embedder: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<VectorStore>,
    keyword_index: Arc<RwLock<KeywordIndex>>,
    retrieval: RetrievalConfig,
    indexing: IndexingConfig,
}

impl HybridSearcher {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<VectorStore>,
        keyword_index: Arc<RwLock<KeywordIndex>>,
        retrieval: RetrievalConfig,
        indexing: IndexingConfig,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            keyword_index,
            retrieval,
            indexing,
        }
    }

    /// Run the permission-aware hybrid search.
    ///
    /// Returns at most `top_k` fused candidates. Only an empty query is an
    /// error; backend failures degrade to partial results.
    pub async fn search(
        &self,
        query: &str,
        user: &UserContext,
        department_filter: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<Candidate>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }

        let vector_filter = build_vector_filter(user);

        let (vector_results, keyword_results) = tokio::join!(
            self.vector_search(query, vector_filter, top_k),
            self.keyword_search(query, department_filter, top_k)
        );

        let mut vector_results = vector_results.unwrap_or_else(|e| {
            tracing::warn!("Vector backend degraded to empty results: {}", e);
            Vec::new()
        });

        let keyword_results = keyword_results.unwrap_or_else(|e| {
            tracing::warn!("Keyword backend degraded to empty results: {}", e);
            Vec::new()
        });

        // Post-hoc role filter; the keyword backend cannot express it natively
        let mut keyword_results = filter_keyword_hits(keyword_results, user);

        normalize_scores(&mut vector_results);
        normalize_scores(&mut keyword_results);

        let fusion_config = FusionConfig::new(self.retrieval.alpha, self.retrieval.rrf_k)
            .map_err(|e| SearchError::InvalidQuery(e.to_string()))?;

        let mut fused = reciprocal_rank_fusion(vector_results, keyword_results, &fusion_config);

        if let Some(department) = department_filter {
            fused.retain(|c| c.department == department);
        }

        fused.truncate(top_k);

        Ok(fused)
    }

    /// Semantic search: embed the query once, then query the vector store
    /// with the native role filter. Model inference is CPU-bound, so the
    /// whole call runs on the blocking pool under the backend deadline.
    async fn vector_search(
        &self,
        query: &str,
        filter: Option<RoleFilter>,
        limit: usize,
    ) -> Result<Vec<Candidate>, SearchError> {
        let deadline = self.backend_deadline();
        let embedder = Arc::clone(&self.embedder);
        let store = Arc::clone(&self.vector_store);
        let query = query.to_string();
        let ef_search = self.indexing.hnsw_ef_search;

        let task = tokio::task::spawn_blocking(move || {
            let query_embedding = embedder
                .embed(&query)
                .map_err(|e| SearchError::EmbeddingError(e.to_string()))?;

            store
                .search(&query_embedding, filter.as_ref(), limit, ef_search)
                .map_err(|e| SearchError::VectorSearchError(e.to_string()))
        });

        match timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(SearchError::VectorSearchError(join_error.to_string())),
            Err(_) => Err(SearchError::DeadlineExceeded(deadline)),
        }
    }

    /// Keyword search over the tantivy index; the read lock only contends
    /// with ingest commits
    async fn keyword_search(
        &self,
        query: &str,
        department_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Candidate>, SearchError> {
        let deadline = self.backend_deadline();

        let search = async {
            let index = self.keyword_index.read().await;
            index
                .search(query, department_filter, limit)
                .map_err(|e| SearchError::KeywordSearchError(e.to_string()))
        };

        match timeout(deadline, search).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::DeadlineExceeded(deadline)),
        }
    }

    fn backend_deadline(&self) -> Duration {
        Duration::from_millis(self.retrieval.backend_timeout_ms)
    }
}
