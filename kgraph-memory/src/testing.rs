//! Shared test doubles and fixtures

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::embedding::{EmbeddingProvider, Extraction, Extractor, HashingEmbedder, VectorEngine};
use crate::entity::EntityStore;
use crate::error::{GraphError, Result};
use crate::relationship::RelationshipStore;
use crate::store::GraphStore;

/// Hashing embedder that counts calls and can be told to fail
pub struct CountingEmbedder {
    inner: HashingEmbedder,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl CountingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: HashingEmbedder::new(dimension),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn name(&self) -> &str {
        "counting"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(GraphError::embedding("provider unavailable"));
        }
        self.inner.embed(text).await
    }
}

/// Extractor replaying queued results in order
#[derive(Default)]
pub struct ScriptedExtractor {
    script: Mutex<VecDeque<Result<Extraction>>>,
    pub calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn push(&self, result: Result<Extraction>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(result);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, _text: &str) -> Result<Extraction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| Ok(Extraction::default()))
    }
}

pub struct Fixture {
    pub store: GraphStore,
    pub engine: Arc<VectorEngine>,
    pub embedder: Arc<CountingEmbedder>,
    pub entities: EntityStore,
    pub relationships: RelationshipStore,
    // Dropped last so the database directory outlives the handles above
    pub dir: TempDir,
}

pub fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = GraphStore::open(dir.path().join("db")).unwrap();
    let embedder = Arc::new(CountingEmbedder::new(64));
    let engine = Arc::new(VectorEngine::new(embedder.clone()));
    let entities = EntityStore::new(store.clone(), engine.clone());
    let relationships = RelationshipStore::new(store.clone(), entities.clone());
    Fixture {
        store,
        engine,
        embedder,
        entities,
        relationships,
        dir,
    }
}
