use crate::config::Config;
use crate::error::{Result, SibylError, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, accumulating all failures
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_server(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_llm(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SibylError::ConfigValidation { errors })
        }
    }

    fn validate_server(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "server.bind_addr",
                format!("Not a valid socket address: {}", config.server.bind_addr),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name must not be empty",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.vector_dim == 0 {
            errors.push(ValidationError::new(
                "indexing.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }

        if config.indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M parameter must be greater than 0",
            ));
        }

        if config.indexing.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let alpha = config.retrieval.alpha;
        if !(0.0..=1.0).contains(&alpha) {
            errors.push(ValidationError::new(
                "retrieval.alpha",
                format!("Alpha must be within [0, 1], got {}", alpha),
            ));
        }

        if config.retrieval.rrf_k <= 0.0 {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                "RRF k constant must be positive",
            ));
        }

        if config.retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        if config.retrieval.rerank_top_n == 0 {
            errors.push(ValidationError::new(
                "retrieval.rerank_top_n",
                "rerank_top_n must be greater than 0",
            ));
        }

        if config.retrieval.backend_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "retrieval.backend_timeout_ms",
                "Backend timeout must be greater than 0",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.chunking.max_words == 0 {
            errors.push(ValidationError::new(
                "chunking.max_words",
                "max_words must be greater than 0",
            ));
        }

        if config.chunking.overlap_words >= config.chunking.max_words {
            errors.push(ValidationError::new(
                "chunking.overlap_words",
                "Overlap must be smaller than max_words",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        if !config.llm.enabled {
            return;
        }

        if config.llm.provider != "gemini" {
            errors.push(ValidationError::new(
                "llm.provider",
                format!("Unsupported provider: {}", config.llm.provider),
            ));
        }

        if config.llm.api_key_env.is_empty() {
            errors.push(ValidationError::new(
                "llm.api_key_env",
                "API key environment variable name must not be empty",
            ));
        }

        if config.llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "Model must not be empty"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_alpha_out_of_range() {
        let mut config = Config::default();
        config.retrieval.alpha = 1.5;

        let err = ConfigValidator::validate(&config).unwrap_err();
        match err {
            SibylError::ConfigValidation { errors } => {
                assert!(errors.iter().any(|e| e.path == "retrieval.alpha"));
            }
            other => panic!("Unexpected error: {other:?}"),
        }
    }

    #[test]
    fn accumulates_multiple_failures() {
        let mut config = Config::default();
        config.retrieval.alpha = -0.1;
        config.embedding.batch_size = 0;
        config.chunking.overlap_words = config.chunking.max_words;

        let err = ConfigValidator::validate(&config).unwrap_err();
        match err {
            SibylError::ConfigValidation { errors } => assert!(errors.len() >= 3),
            other => panic!("Unexpected error: {other:?}"),
        }
    }

    #[test]
    fn llm_checks_skipped_when_disabled() {
        let mut config = Config::default();
        config.llm.enabled = false;
        config.llm.model = String::new();

        assert!(ConfigValidator::validate(&config).is_ok());
    }
}
