//! KGraph MCP Server Library
//!
//! Serves the `kgraph-memory` knowledge graph over the Model Context
//! Protocol: one tool per graph operation, JSON-RPC 2.0 on stdio.

pub mod error;
pub mod graph;
pub mod mcp;

pub use error::{McpError, McpResult};
pub use graph::GraphManager;
pub use mcp::McpServer;
