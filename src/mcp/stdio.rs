use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::McpServer;
use crate::Result;

/// Serve MCP over stdin/stdout, one JSON message per line.
///
/// Stdout carries protocol messages only; logs go to stderr.
pub async fn serve(server: McpServer) -> Result<()> {
    tracing::info!("MCP stdio server ready");
    serve_on(server, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve MCP over any line-oriented reader/writer pair until the reader closes
pub async fn serve_on<R, W>(server: McpServer, reader: R, mut writer: W) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(response) = server.handle_message(line).await {
            let mut encoded = serde_json::to_string(&response)?;
            encoded.push('\n');
            writer.write_all(encoded.as_bytes()).await?;
            writer.flush().await?;
        }
    }

    tracing::info!("MCP stdio input closed, shutting down");
    Ok(())
}
