//! Stdio transport for MCP protocol.
//!
//! Newline-delimited JSON-RPC 2.0 over stdin/stdout. The peer is a local
//! process and is trusted; requests run one at a time.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::dispatch::{Action, Credentials, Dispatcher, tool_error_response};
use super::rpc::{self, Incoming, JsonRpcResponse};

/// Handle MCP protocol over the process's stdin/stdout.
///
/// # Errors
///
/// Returns error on I/O failure.
pub async fn run_stdio(dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    tracing::info!("MCP stdio server ready, waiting for requests...");
    serve(&dispatcher, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    tracing::info!("Stdin closed, shutting down");
    Ok(())
}

/// Serve newline-delimited JSON-RPC until `reader` hits EOF.
///
/// # Errors
///
/// Returns error on I/O or response serialization failure.
pub async fn serve<R, W>(dispatcher: &Dispatcher, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let output = match rpc::parse_envelope(trimmed.as_bytes()) {
            Err(response) => Some(serde_json::to_string(&response)?),
            Ok(envelope) => {
                let mut responses = Vec::with_capacity(envelope.messages.len());
                for message in envelope.messages {
                    if let Some(response) = handle_message(dispatcher, message).await {
                        responses.push(response);
                    }
                }
                match (envelope.batch, responses.pop()) {
                    (_, None) => None,
                    (false, Some(single)) => Some(serde_json::to_string(&single)?),
                    (true, Some(last)) => {
                        responses.push(last);
                        Some(serde_json::to_string(&responses)?)
                    }
                }
            }
        };

        if let Some(json) = output {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }

    Ok(())
}

async fn handle_message(dispatcher: &Dispatcher, message: Incoming) -> Option<JsonRpcResponse> {
    let request = match message {
        Incoming::Request(request) => request,
        Incoming::Invalid(response) => return Some(response),
    };

    match dispatcher.plan(request) {
        Action::Reply(response) => response,
        Action::Cancel(id) => {
            tracing::debug!(request_id = %id, "Ignoring cancellation, stdio requests run sequentially");
            None
        }
        Action::CallTool { id, name, arguments } => {
            if let Err(e) = dispatcher.authenticate(&Credentials::Trusted).await {
                return Some(tool_error_response(Some(id), &e));
            }
            Some(dispatcher.call_tool(id, &name, arguments).await)
        }
    }
}
