//! Error types for the KGraph MCP server.

use kgraph_memory::GraphError;
use serde_json::{json, Value};
use thiserror::Error;

/// Errors that can occur while serving tool calls.
#[derive(Debug, Error)]
pub enum McpError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Error name reported to the client
    pub fn error_type(&self) -> &'static str {
        match self {
            McpError::Graph(e) => e.error_type(),
            McpError::UnknownTool(_) => "ValidationError",
            McpError::Io(_) | McpError::Json(_) => "InternalError",
        }
    }

    /// `{"error": {"type", "message"}}` body of a failed tool call
    pub fn to_payload(&self) -> Value {
        json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        })
    }
}

/// Result type alias for MCP operations.
pub type McpResult<T> = Result<T, McpError>;
