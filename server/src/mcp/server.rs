//! MCP Server Implementation
//!
//! Handles MCP protocol requests and routes tool calls to the knowledge graph.

use super::dispatch::execute_tool;
use super::protocol::*;
use super::tools::get_all_tools;
use super::transport::{AsyncStdioTransport, LineTransport};
use crate::graph::GraphManager;
use kgraph_memory::GraphConfig;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "kgraph";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// MCP Server - handles protocol messages
pub struct McpServer {
    graph: GraphManager,
    initialized: bool,
}

impl McpServer {
    pub fn new(config: GraphConfig) -> Self {
        Self::with_manager(GraphManager::new(config))
    }

    pub fn with_manager(graph: GraphManager) -> Self {
        Self {
            graph,
            initialized: false,
        }
    }

    /// True once the client completed `initialize`
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Run the MCP server event loop on stdio
    pub async fn run(&mut self) -> std::io::Result<()> {
        let mut transport = AsyncStdioTransport::stdio();
        self.serve(&mut transport).await
    }

    /// Serve requests until the client closes its end of the stream
    pub async fn serve<R, W>(&mut self, transport: &mut LineTransport<R, W>) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!("MCP server starting...");

        loop {
            match transport.read_request().await {
                Ok(Some(request)) => {
                    // Notifications carry no id and get no response
                    let is_notification = request.id.is_none();
                    let response = self.handle_request(request).await;
                    if !is_notification {
                        transport.write_response(&response).await?;
                    }
                }
                Ok(None) => {
                    tracing::info!("Client disconnected");
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    let response = JsonRpcResponse::error(
                        None,
                        JsonRpcError::parse_error(format!("Parse error: {}", e)),
                    );
                    transport.write_response(&response).await?;
                }
                Err(e) => return Err(e),
            }
        }

        if let Err(e) = self.graph.shutdown().await {
            tracing::warn!("Failed to flush knowledge graph: {}", e);
        }
        Ok(())
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        tracing::debug!("Handling request: {}", request.method);

        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_request(format!(
                    "Unsupported jsonrpc version: {}",
                    request.jsonrpc
                )),
            );
        }

        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id, request.params).await,
            "initialized" | "notifications/initialized" | "notifications/cancelled" => {
                JsonRpcResponse::success(request.id, Value::Null)
            }
            "ping" => JsonRpcResponse::success(request.id, to_json(&PingResult {})),
            "tools/list" => self.handle_tools_list(request.id),
            "tools/call" => self.handle_tools_call(request.id, request.params).await,
            _ => {
                JsonRpcResponse::error(request.id, JsonRpcError::method_not_found(&request.method))
            }
        }
    }

    async fn handle_initialize(&mut self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: InitializeParams = params
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();
        if let Some(client) = &params.client_info {
            tracing::info!("Client: {} {:?}", client.name, client.version);
        }

        if let Err(e) = self.graph.initialize().await {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::internal_error(format!("Failed to open knowledge graph: {}", e)),
            );
        }
        self.initialized = true;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                experimental: None,
                logging: Some(LoggingCapability {}),
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: Some(SERVER_VERSION.to_string()),
            },
        };

        JsonRpcResponse::success(id, to_json(&result))
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        let result = ToolsListResult {
            tools: get_all_tools(),
        };
        JsonRpcResponse::success(id, to_json(&result))
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_params(format!("Invalid params: {}", e)),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(id, JsonRpcError::invalid_params("Missing params"));
            }
        };

        let outcome = match self.graph.get().await {
            Ok(graph) => execute_tool(&graph, &params.name, params.arguments).await,
            Err(e) => Err(e),
        };

        let tool_result = match outcome {
            Ok(result) => ToolCallResult::json(&result, false),
            Err(e) => {
                tracing::warn!("Tool {} failed: {} ({})", params.name, e, e.error_type());
                ToolCallResult::json(&e.to_payload(), true)
            }
        };
        JsonRpcResponse::success(id, to_json(&tool_result))
    }
}
