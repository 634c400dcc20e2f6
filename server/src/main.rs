//! KGraph MCP Server Entry Point
//!
//! Serves the knowledge graph over the Model Context Protocol on stdio.
//! Logs go to stderr; stdout carries the protocol.

use clap::Parser;
use kgraph_memory::{EmbeddingConfig, ExtractionConfig, GraphConfig, StorageConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kgraph-mcp")]
#[command(about = "Multi-tenant knowledge graph served over MCP")]
#[command(version)]
struct Args {
    /// RocksDB directory of the graph
    #[arg(long, env = "KGRAPH_DB_PATH", default_value = ".kgraph/db")]
    db_path: PathBuf,

    /// API key of the OpenAI-compatible endpoint; offline embeddings without it
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    base_url: String,

    /// Embedding model
    #[arg(long, env = "OPENAI_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Embedding dimensionality
    #[arg(long, env = "OPENAI_EMBEDDING_DIMENSION", default_value_t = 1536)]
    embedding_dimension: usize,

    /// Chat model used for entity/relationship extraction
    #[arg(long, env = "OPENAI_LLM_MODEL", default_value = "gpt-5-nano")]
    llm_model: String,
}

impl Args {
    fn into_config(self) -> GraphConfig {
        GraphConfig {
            storage: StorageConfig {
                db_path: self.db_path,
            },
            embedding: EmbeddingConfig {
                api_key: self.api_key,
                base_url: self.base_url,
                model: self.embedding_model,
                dimension: self.embedding_dimension,
            },
            extraction: ExtractionConfig {
                llm_model: self.llm_model,
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kgraph_mcp=info,kgraph_memory=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.into_config();
    tracing::info!("Starting KGraph MCP server");
    tracing::info!("Database: {:?}", config.storage.db_path);
    tracing::info!(
        "Embeddings: {} ({} dims)",
        config.embedding.model,
        config.embedding.dimension
    );

    let mut server = kgraph_mcp::McpServer::new(config);
    server.run().await?;
    Ok(())
}
