//! KGraph Memory
//!
//! Multi-tenant knowledge graph of typed entities and relationships, kept in
//! step with unstructured text "memories" that are periodically re-extracted.
//!
//! ## Features
//!
//! - **Lifecycle** - create, soft-delete, restore and hard-delete (with cascade) for entities and relationships
//! - **Tenancy** - every record is scoped by a normalised group id
//! - **Incremental sync** - content-hash short-circuit and snapshot diffing between extraction runs
//! - **Semantic search** - cosine ranking over stored entity embeddings
//! - **RocksDB persistence** - pessimistic transactions per record
//!
//! ## Example
//!
//! ```ignore
//! use kgraph_memory::{GraphConfig, KnowledgeGraph, NewEntity};
//!
//! let graph = KnowledgeGraph::open(&GraphConfig::default())?;
//! graph
//!     .entities()
//!     .create(Some("team_a"), NewEntity::new("user:1", "User", "Ann"))
//!     .await?;
//! ```

pub mod config;
pub mod embedding;
pub mod entity;
pub mod error;
pub mod memory;
pub mod relationship;
pub mod search;
pub mod store;
pub mod temporal;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

// Re-exports for convenience
pub use config::{EmbeddingConfig, ExtractionConfig, GraphConfig, StorageConfig};
pub use embedding::{
    CandidateEntity, CandidateRelationship, EmbeddingProvider, Extraction, Extractor,
    HashingEmbedder, OpenAiClient, VectorEngine,
};
pub use entity::{Entity, EntityStore, EntityUpdate, NewEntity, Patch};
pub use error::{GraphError, Result};
pub use memory::{
    AddMemory, AddMemoryResult, MemorySync, Source, UpdateMemory, UpdateMemoryResult,
    UpdateStrategy,
};
pub use relationship::{
    Direction, NewRelationship, Relationship, RelationshipQuery, RelationshipStore,
};
pub use search::{cosine_similarity, EntitySearch, SearchResult};
pub use store::GraphStore;
pub use temporal::{Lifecycle, SoftDeleteOutcome, ValidityWindow};
pub use validation::{Properties, DEFAULT_GROUP_ID};

/// All graph services over one store
pub struct KnowledgeGraph {
    store: GraphStore,
    entities: EntityStore,
    relationships: RelationshipStore,
    search: EntitySearch,
    memory: MemorySync,
}

impl KnowledgeGraph {
    /// Open the store and build providers from `config`
    pub fn open(config: &GraphConfig) -> Result<Self> {
        let store = GraphStore::open(&config.storage.db_path)?;
        let (engine, extractor) = embedding::providers_from_config(config)?;
        Ok(Self::with_providers(store, engine, extractor))
    }

    /// Wire services over an open store with explicit providers
    pub fn with_providers(
        store: GraphStore,
        engine: Arc<VectorEngine>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        let entities = EntityStore::new(store.clone(), engine.clone());
        let relationships = RelationshipStore::new(store.clone(), entities.clone());
        let search = EntitySearch::new(entities.clone(), engine);
        let memory = MemorySync::new(entities.clone(), relationships.clone(), extractor);
        Self {
            store,
            entities,
            relationships,
            search,
            memory,
        }
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn relationships(&self) -> &RelationshipStore {
        &self.relationships
    }

    pub fn search(&self) -> &EntitySearch {
        &self.search
    }

    pub fn memory(&self) -> &MemorySync {
        &self.memory
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_without_api_key_uses_offline_providers() {
        let dir = TempDir::new().unwrap();
        let mut config = GraphConfig::default();
        config.storage.db_path = dir.path().join("db");
        config.embedding.dimension = 32;

        let graph = KnowledgeGraph::open(&config).unwrap();
        let entity = graph
            .entities()
            .create(None, NewEntity::new("e", "T", "Name"))
            .await
            .unwrap();
        assert_eq!(entity.group_id, DEFAULT_GROUP_ID);
        assert_eq!(entity.embedding.map(|v| v.len()), Some(32));

        let err = graph
            .memory()
            .add_memory(None, AddMemory::new("n", "text"))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "ExtractionError");
        graph.flush().unwrap();
    }
}
