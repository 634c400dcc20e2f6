//! Knowledge graph integration for the MCP server
//!
//! Owns the lazily opened [`KnowledgeGraph`] shared by every tool call.

use std::sync::Arc;
use tokio::sync::RwLock;

pub use kgraph_memory::{GraphConfig, GraphError, KnowledgeGraph};

use crate::error::McpResult;

/// Graph manager for the MCP server
///
/// The store is opened on the first `initialize` request, or on the first
/// tool call from a client that skipped the handshake.
pub struct GraphManager {
    config: GraphConfig,
    graph: RwLock<Option<Arc<KnowledgeGraph>>>,
}

impl GraphManager {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            graph: RwLock::new(None),
        }
    }

    /// Wrap an already open graph
    pub fn with_graph(graph: KnowledgeGraph) -> Self {
        Self {
            config: GraphConfig::default(),
            graph: RwLock::new(Some(Arc::new(graph))),
        }
    }

    /// Open the store if it is not open yet
    pub async fn initialize(&self) -> McpResult<Arc<KnowledgeGraph>> {
        let mut slot = self.graph.write().await;
        if let Some(graph) = slot.as_ref() {
            return Ok(Arc::clone(graph));
        }

        tracing::info!("Opening knowledge graph at {:?}", self.config.storage.db_path);
        let graph = KnowledgeGraph::open(&self.config).map_err(|e| {
            tracing::error!("Failed to open knowledge graph: {}", e);
            e
        })?;

        let graph = Arc::new(graph);
        *slot = Some(Arc::clone(&graph));
        Ok(graph)
    }

    pub async fn is_initialized(&self) -> bool {
        self.graph.read().await.is_some()
    }

    /// The open graph, opening it on first use
    pub async fn get(&self) -> McpResult<Arc<KnowledgeGraph>> {
        if let Some(graph) = self.graph.read().await.as_ref() {
            return Ok(Arc::clone(graph));
        }
        self.initialize().await
    }

    /// Flush the store if it was ever opened
    pub async fn shutdown(&self) -> McpResult<()> {
        if let Some(graph) = self.graph.read().await.as_ref() {
            graph.flush()?;
            tracing::info!("Knowledge graph flushed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> GraphConfig {
        let mut config = GraphConfig::default();
        config.storage.db_path = dir.path().join("db");
        config.embedding.dimension = 16;
        config
    }

    #[tokio::test]
    async fn test_opens_lazily_once() {
        let dir = TempDir::new().unwrap();
        let manager = GraphManager::new(config(&dir));
        assert!(!manager.is_initialized().await);

        let first = manager.get().await.unwrap();
        assert!(manager.is_initialized().await);
        let second = manager.initialize().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        tokio_test::assert_ok!(manager.shutdown().await);
    }

    #[tokio::test]
    async fn test_shutdown_without_open_is_noop() {
        let dir = TempDir::new().unwrap();
        let manager = GraphManager::new(config(&dir));
        tokio_test::assert_ok!(manager.shutdown().await);
        assert!(!manager.is_initialized().await);
    }
}
