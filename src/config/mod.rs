//! Configuration management for Sibyl
//!
//! Loads a TOML configuration file into typed sections, applies
//! `SIBYL_SECTION__KEY` environment overrides, and validates the result
//! before any service is constructed.

use crate::error::{Result, SibylError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub chunking: ChunkingConfig,
    pub llm: LlmConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root data directory; the SQLite database and both indexes live here
    pub data_dir: PathBuf,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the JWT signing secret
    pub secret_env: String,
    /// Token lifetime in hours
    pub token_ttl_hours: i64,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
}

/// Index configuration for both retrieval backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub vector_dim: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_search: usize,
}

/// Retrieval and ranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Weight of the vector backend in score fusion; keyword gets 1 - alpha
    pub alpha: f32,
    /// RRF smoothing constant
    pub rrf_k: f32,
    /// Candidates returned by the fused hybrid search
    pub top_k: usize,
    /// Candidates surviving the reranker into answer generation
    pub rerank_top_n: usize,
    pub enable_reranking: bool,
    pub reranker_model: String,
    /// Deadline applied to each backend call (vector, keyword, rerank)
    pub backend_timeout_ms: u64,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_words: usize,
    pub overlap_words: usize,
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub model: String,
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SibylError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| SibylError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| SibylError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: SIBYL_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("SIBYL_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "SERVER__BIND_ADDR" => {
                self.server.bind_addr = value.to_string();
            }
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "LLM__ENABLED" => {
                self.llm.enabled = value.parse().map_err(|_| SibylError::InvalidConfigValue {
                    path: path.to_string(),
                    message: format!("Cannot parse '{}' as boolean", value),
                })?;
            }
            "LLM__MODEL" => {
                self.llm.model = value.to_string();
            }
            "LLM__BASE_URL" => {
                self.llm.base_url = value.to_string();
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "RETRIEVAL__ALPHA" => {
                self.retrieval.alpha =
                    value.parse().map_err(|_| SibylError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as float", value),
                    })?;
            }
            "RETRIEVAL__TOP_K" => {
                self.retrieval.top_k =
                    value.parse().map_err(|_| SibylError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SibylError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("sibyl").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.sibyl"),
            },
            server: ServerConfig {
                bind_addr: "127.0.0.1:8000".to_string(),
            },
            auth: AuthConfig {
                secret_env: "SIBYL_JWT_SECRET".to_string(),
                token_ttl_hours: 24,
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 64,
            },
            indexing: IndexingConfig {
                vector_dim: 384,
                hnsw_ef_construction: 200,
                hnsw_m: 16,
                hnsw_ef_search: 100,
            },
            retrieval: RetrievalConfig {
                alpha: 0.7,
                rrf_k: 60.0,
                top_k: 20,
                rerank_top_n: 8,
                enable_reranking: true,
                reranker_model: "bge-reranker-base".to_string(),
                backend_timeout_ms: 10_000,
            },
            chunking: ChunkingConfig {
                max_words: 400,
                overlap_words: 80,
            },
            llm: LlmConfig {
                enabled: true,
                provider: "gemini".to_string(),
                api_key_env: "GEMINI_API_KEY".to_string(),
                model: "gemini-2.5-flash".to_string(),
                base_url: "https://generativelanguage.googleapis.com".to_string(),
                timeout_ms: 30_000,
            },
        }
    }
}
