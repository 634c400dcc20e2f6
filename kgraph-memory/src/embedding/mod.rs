//! Embedding and extraction providers
//!
//! Two collaborators sit behind this module:
//! - an [`EmbeddingProvider`] turning text into a fixed-size vector
//! - an [`Extractor`] turning raw text into candidate entities/relationships
//!
//! [`OpenAiClient`] implements both against any OpenAI-compatible API.
//! [`HashingEmbedder`] is an offline provider used when no API key is set.

mod engine;
mod extraction;
mod hashing;
mod openai;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::GraphConfig;
use crate::error::Result;

pub use engine::VectorEngine;
pub use extraction::{
    parse_extraction, CandidateEntity, CandidateRelationship, Extraction, Extractor,
    UnconfiguredExtractor, EXTRACTION_PROMPT,
};
pub use hashing::HashingEmbedder;
pub use openai::OpenAiClient;

/// Text embedding collaborator
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Dimensionality of produced vectors
    fn dimension(&self) -> usize;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Build the embedding engine and extractor described by `config`.
///
/// With an API key both are served by one [`OpenAiClient`]. Without one,
/// embeddings fall back to [`HashingEmbedder`] and extraction fails with an
/// `ExtractionError` on use.
pub fn providers_from_config(config: &GraphConfig) -> Result<(Arc<VectorEngine>, Arc<dyn Extractor>)> {
    if config.embedding.has_api_key() {
        let client = Arc::new(OpenAiClient::new(&config.embedding, &config.extraction)?);
        let engine = VectorEngine::new(client.clone());
        log::info!(
            "Using OpenAI-compatible provider at {} ({} / {})",
            config.embedding.base_url,
            config.embedding.model,
            config.extraction.llm_model
        );
        Ok((Arc::new(engine), client))
    } else {
        log::warn!("No API key configured; using offline hashing embeddings, extraction disabled");
        let embedder = Arc::new(HashingEmbedder::new(config.embedding.dimension));
        Ok((
            Arc::new(VectorEngine::new(embedder)),
            Arc::new(UnconfiguredExtractor),
        ))
    }
}
