//! Vector embedding engine
//!
//! High-level API for generating and caching embeddings.

use super::EmbeddingProvider;
use crate::error::{GraphError, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Embeddings kept in memory before the least recently used is evicted
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Vector embedding engine with caching
///
/// Wraps an [`EmbeddingProvider`] with a bounded LRU cache keyed by input
/// text, so recently embedded entity texts skip the provider call.
pub struct VectorEngine {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl VectorEngine {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_capacity(provider, DEFAULT_CACHE_CAPACITY)
    }

    /// Create an engine whose cache holds at most `capacity` embeddings
    pub fn with_capacity(provider: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        log::info!(
            "VectorEngine ready ({}, {}d, cache {})",
            provider.name(),
            provider.dimension(),
            capacity
        );
        Self {
            provider,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Text embedded for an entity: name and summary, trimmed and space-joined
    pub fn entity_text(name: &str, summary: Option<&str>) -> String {
        let mut parts = vec![name.trim()];
        if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
            parts.push(summary);
        }
        parts.join(" ")
    }

    /// Generate embedding with caching
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(GraphError::embedding("text must be a non-empty string"));
        }

        let cached = self
            .cache
            .lock()
            .ok()
            .and_then(|mut guard| guard.get(text).cloned());
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let embedding = self.provider.embed(text).await?;
        if let Ok(mut guard) = self.cache.lock() {
            guard.put(text.to_string(), embedding.clone());
        }
        Ok(embedding)
    }

    /// Embed an entity's name and summary
    pub async fn embed_entity(&self, name: &str, summary: Option<&str>) -> Result<Vec<f32>> {
        self.embed(&Self::entity_text(name, summary)).await
    }

    /// Get embedding dimension
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Get cache size
    pub fn cache_size(&self) -> usize {
        self.cache.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Clear the cache
    pub fn clear_cache(&self) {
        if let Ok(mut guard) = self.cache.lock() {
            guard.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    #[test]
    fn test_entity_text() {
        assert_eq!(VectorEngine::entity_text(" Auth ", None), "Auth");
        assert_eq!(
            VectorEngine::entity_text("Auth", Some("  login flow ")),
            "Auth login flow"
        );
        assert_eq!(VectorEngine::entity_text("Auth", Some("   ")), "Auth");
    }

    #[tokio::test]
    async fn test_embed_is_cached() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let engine = VectorEngine::new(provider.clone());

        let a = engine.embed("hello").await.unwrap();
        let b = engine.embed("  hello ").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.cache_size(), 1);

        engine.clear_cache();
        engine.embed("hello").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_evicts_least_recently_used() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let engine = VectorEngine::with_capacity(provider.clone(), 2);

        engine.embed("a").await.unwrap();
        engine.embed("bb").await.unwrap();
        engine.embed("a").await.unwrap();
        engine.embed("ccc").await.unwrap();
        assert_eq!(engine.cache_size(), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        engine.embed("a").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        engine.embed("bb").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        assert_eq!(engine.cache_size(), 2);
    }

    #[tokio::test]
    async fn test_embed_rejects_blank() {
        let engine = VectorEngine::new(Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        }));
        let err = engine.embed("  ").await.unwrap_err();
        assert_eq!(err.error_type(), "EmbeddingError");
    }
}
