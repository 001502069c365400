//! Service registry and the end-to-end search pipeline
//!
//! Every process-wide service is constructed exactly once at startup and
//! shared by reference; nothing is lazily initialized on a request path.
//! `execute_search` runs hybrid retrieval, reranking, answer generation,
//! and the audit write for one authenticated request.

use crate::auth::{Authenticator, UserContext};
use crate::config::Config;
use crate::error::{Result, SibylError};
use crate::generate::{AnswerGenerator, Citation, GeminiClient, LlmClient};
use crate::index::{
    EmbeddingProvider, FastEmbedProvider, KeywordIndex, VectorStore,
};
use crate::retrieval::{Candidate, FastEmbedCrossEncoder, HybridSearcher, Reranker};
use crate::storage::Database;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::timeout;

/// All process-wide services, wired once at startup
pub struct ServiceRegistry {
    pub config: Config,
    pub database: Arc<Database>,
    pub authenticator: Arc<Authenticator>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vector_store: Arc<VectorStore>,
    pub keyword_index: Arc<RwLock<KeywordIndex>>,
    pub searcher: HybridSearcher,
    pub reranker: Option<Arc<Reranker>>,
    pub generator: AnswerGenerator,
}

/// Result of one end-to-end search request
#[derive(Debug)]
pub struct SearchOutcome {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub chunks_found: usize,
    pub latency_ms: u64,
}

impl ServiceRegistry {
    /// Construct every service from configuration.
    ///
    /// A missing LLM API key (with the LLM enabled) fails here, at startup,
    /// rather than surfacing mid-request.
    pub fn initialize(config: Config) -> Result<Self> {
        let data_dir = expand_path(&config.storage.data_dir)?;

        let database = Arc::new(Database::new(&data_dir.join("sibyl.db"))?);

        let authenticator = Arc::new(Authenticator::from_config(&config.auth));

        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(FastEmbedProvider::new(&config.embedding.model).map_err(|e| {
                SibylError::Config(format!("Embedding model initialization failed: {}", e))
            })?);

        if embedder.dimension() != config.indexing.vector_dim {
            return Err(SibylError::Config(format!(
                "Embedding model produces {}-dim vectors but indexing.vector_dim is {}",
                embedder.dimension(),
                config.indexing.vector_dim
            )));
        }

        let vector_store = Arc::new(VectorStore::new(
            config.indexing.vector_dim,
            config.indexing.hnsw_ef_construction,
            config.indexing.hnsw_m,
        ));

        let keyword_index = Arc::new(RwLock::new(
            KeywordIndex::new(data_dir.join("keyword-index")).map_err(|e| {
                SibylError::Config(format!("Keyword index initialization failed: {}", e))
            })?,
        ));

        let reranker = if config.retrieval.enable_reranking {
            let encoder =
                FastEmbedCrossEncoder::new(&config.retrieval.reranker_model).map_err(|e| {
                    SibylError::Config(format!("Reranker initialization failed: {}", e))
                })?;
            Some(Arc::new(Reranker::new(Arc::new(encoder))))
        } else {
            None
        };

        let llm: Option<Arc<dyn LlmClient>> = if config.llm.enabled {
            Some(Arc::new(GeminiClient::new(&config.llm)?))
        } else {
            None
        };
        let generator = AnswerGenerator::new(llm, Duration::from_millis(config.llm.timeout_ms));

        let searcher = HybridSearcher::new(
            Arc::clone(&embedder),
            Arc::clone(&vector_store),
            Arc::clone(&keyword_index),
            config.retrieval.clone(),
            config.indexing.clone(),
        );

        Ok(Self {
            config,
            database,
            authenticator,
            embedder,
            vector_store,
            keyword_index,
            searcher,
            reranker,
            generator,
        })
    }

    /// Wire a registry from pre-built components (test seam)
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        config: Config,
        database: Arc<Database>,
        authenticator: Arc<Authenticator>,
        embedder: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<VectorStore>,
        keyword_index: Arc<RwLock<KeywordIndex>>,
        reranker: Option<Arc<Reranker>>,
        generator: AnswerGenerator,
    ) -> Self {
        let searcher = HybridSearcher::new(
            Arc::clone(&embedder),
            Arc::clone(&vector_store),
            Arc::clone(&keyword_index),
            config.retrieval.clone(),
            config.indexing.clone(),
        );

        Self {
            config,
            database,
            authenticator,
            embedder,
            vector_store,
            keyword_index,
            searcher,
            reranker,
            generator,
        }
    }

    /// Run one search request end to end: hybrid retrieval, rerank, answer
    /// generation, audit write
    pub async fn execute_search(
        &self,
        user: &UserContext,
        query: &str,
        department_filter: Option<&str>,
    ) -> Result<SearchOutcome> {
        let start = Instant::now();

        let candidates = self
            .searcher
            .search(query, user, department_filter, self.config.retrieval.top_k)
            .await
            .map_err(|e| SibylError::InvalidRequest(e.to_string()))?;

        let chunks_found = candidates.len();

        let ranked = self.rerank_candidates(query, candidates).await;

        let generated = self.generator.generate(query, &ranked).await;

        let doc_ids: Vec<String> = ranked
            .iter()
            .map(|c| c.doc_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if let Err(e) = self
            .database
            .log_search(&user.user_id, query, &doc_ids, true)
        {
            tracing::warn!("Audit log write failed: {}", e);
        }

        Ok(SearchOutcome {
            answer: generated.answer,
            citations: generated.citations,
            chunks_found,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Cross-encoder rerank under the backend deadline; any failure passes
    /// the fused ordering through truncated to `rerank_top_n`
    async fn rerank_candidates(&self, query: &str, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let top_n = self.config.retrieval.rerank_top_n;

        let Some(reranker) = &self.reranker else {
            let mut passthrough = candidates;
            passthrough.truncate(top_n);
            return passthrough;
        };

        if candidates.len() <= 1 {
            let mut passthrough = candidates;
            passthrough.truncate(top_n);
            return passthrough;
        }

        let deadline = Duration::from_millis(self.config.retrieval.backend_timeout_ms);
        let reranker = Arc::clone(reranker);
        let query = query.to_string();
        let input = candidates.clone();

        let task = tokio::task::spawn_blocking(move || reranker.rerank(&query, input, top_n));

        match timeout(deadline, task).await {
            Ok(Ok(Ok(reranked))) => reranked,
            Ok(Ok(Err(e))) => {
                tracing::warn!("Reranker failed, keeping fused order: {}", e);
                let mut passthrough = candidates;
                passthrough.truncate(top_n);
                passthrough
            }
            Ok(Err(join_error)) => {
                tracing::warn!("Reranker task failed, keeping fused order: {}", join_error);
                let mut passthrough = candidates;
                passthrough.truncate(top_n);
                passthrough
            }
            Err(_) => {
                tracing::warn!("Reranker exceeded {:?}, keeping fused order", deadline);
                let mut passthrough = candidates;
                passthrough.truncate(top_n);
                passthrough
            }
        }
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &std::path::Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| SibylError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| SibylError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
