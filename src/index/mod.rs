//! Retrieval backends and the embedding provider
//!
//! Two heterogeneous stores feed the hybrid pipeline: an in-process HNSW
//! vector store that applies a native role filter at query time, and a
//! tantivy BM25 index that cannot, and therefore over-fetches for post-hoc
//! filtering.

mod embedder;
mod keyword_index;
mod vector_store;

pub use embedder::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use keyword_index::{KeywordIndex, KeywordIndexError};
pub use vector_store::{ChunkPayload, RoleFilter, VectorPoint, VectorStore, VectorStoreError};
