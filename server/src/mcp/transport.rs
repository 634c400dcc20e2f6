//! MCP Transport Layer
//!
//! Line-delimited JSON-RPC 2.0 over a byte stream (stdio in production).

use super::protocol::{JsonRpcRequest, JsonRpcResponse};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// One request per line in, one response per line out
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
}

/// Transport over the process stdin/stdout
pub type AsyncStdioTransport = LineTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout>;

impl AsyncStdioTransport {
    pub fn stdio() -> Self {
        LineTransport::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Read the next request, skipping blank lines. `None` on EOF.
    ///
    /// A line that is not a JSON-RPC request is an `InvalidData` error; the
    /// stream stays usable.
    pub async fn read_request(&mut self) -> io::Result<Option<JsonRpcRequest>> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            return match serde_json::from_str(line) {
                Ok(request) => Ok(Some(request)),
                Err(e) => {
                    tracing::error!("Failed to parse JSON-RPC request: {}", e);
                    Err(io::Error::new(io::ErrorKind::InvalidData, e))
                }
            };
        }
    }

    /// Write a JSON-RPC response as one line
    pub async fn write_response(&mut self, response: &JsonRpcResponse) -> io::Result<()> {
        let json = serde_json::to_string(response)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}
