//! Graph configuration
//!
//! Built once by the process entry point and threaded through constructors.
//! Nothing in this crate reads the process environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for a knowledge graph instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Storage configuration
    pub storage: StorageConfig,

    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// Extraction (LLM) configuration
    pub extraction: ExtractionConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// RocksDB directory
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".kgraph/db"),
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// API key for the OpenAI-compatible endpoint; offline hashing is used when absent
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API
    pub base_url: String,

    /// Embedding model name
    pub model: String,

    /// Vector dimensionality
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
        }
    }
}

impl EmbeddingConfig {
    /// True when a remote provider can be used
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Chat model used for entity/relationship extraction
    pub llm_model: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            llm_model: "gpt-5-nano".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.embedding.dimension, 1536);
        assert_eq!(config.extraction.llm_model, "gpt-5-nano");
        assert!(!config.embedding.has_api_key());
    }

    #[test]
    fn test_blank_api_key_is_absent() {
        let embedding = EmbeddingConfig {
            api_key: Some("  ".to_string()),
            ..EmbeddingConfig::default()
        };
        assert!(!embedding.has_api_key());
    }

    #[test]
    fn test_api_key_not_serialized() {
        let embedding = EmbeddingConfig {
            api_key: Some("sk-secret".to_string()),
            ..EmbeddingConfig::default()
        };
        let json = serde_json::to_string(&embedding).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
