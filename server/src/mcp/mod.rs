//! MCP (Model Context Protocol) Server Module
//!
//! Exposes the knowledge graph to AI clients as MCP tools.
//!
//! ## Usage
//!
//! ```bash
//! kgraph-mcp --db-path ~/.kgraph/db
//! ```
//!
//! The MCP server communicates via stdio using JSON-RPC 2.0.

pub mod dispatch;
pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;

pub use dispatch::{execute_tool, ToolArgs};
pub use protocol::*;
pub use server::McpServer;
