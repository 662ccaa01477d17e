//! Line-delimited transport for a single local peer.
//!
//! Reads one JSON-RPC envelope per line, dispatches it to completion, and
//! writes exactly one response line before reading the next. Notifications
//! get no line. Blank lines are skipped. Lines that are not UTF-8 or exceed
//! [`MAX_LINE_BYTES`] are answered with `ParseError` and the loop continues.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::RpcError;
use crate::protocol::ResponseEnvelope;

/// Longest accepted request line, newline included.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Serve requests from `reader` until EOF.
///
/// Returns an error only when the stream itself fails; bad requests are
/// answered and the loop continues.
pub async fn serve<R, W>(dispatcher: &Dispatcher, reader: R, writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    serve_with_limit(dispatcher, reader, writer, MAX_LINE_BYTES).await
}

async fn serve_with_limit<R, W>(
    dispatcher: &Dispatcher,
    mut reader: R,
    mut writer: W,
    max_line: usize,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut served: u64 = 0;

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(max_line as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            break;
        }

        let response = if read == max_line && buf.last() != Some(&b'\n') {
            discard_rest_of_line(&mut reader).await?;
            warn!(max_line, "request line too long");
            Some(ResponseEnvelope::failure(
                Value::Null,
                RpcError::parse_error(format!("line exceeds {max_line} bytes")),
            ))
        } else {
            match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => dispatcher.dispatch_str(line.trim()).await,
                Err(e) => {
                    warn!(error = %e, "request line is not valid UTF-8");
                    Some(ResponseEnvelope::failure(Value::Null, RpcError::parse_error(e)))
                }
            }
        };

        if let Some(response) = response {
            write_response(&mut writer, &response).await?;
            served += 1;
        }
    }

    info!(served, "stdin closed");
    Ok(())
}

/// Skip input up to and including the next newline (or EOF).
async fn discard_rest_of_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let (done, used) = {
            let available = reader.fill_buf().await?;
            match available.iter().position(|b| *b == b'\n') {
                Some(pos) => (true, pos + 1),
                None => (available.is_empty(), available.len()),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &ResponseEnvelope,
) -> std::io::Result<()> {
    let mut output = response.to_line();
    debug!(bytes = output.len(), "writing response");
    output.push('\n');
    writer.write_all(output.as_bytes()).await?;
    writer.flush().await
}

/// Serve the process's own stdin/stdout.
pub async fn run(dispatcher: &Dispatcher) -> std::io::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve(dispatcher, stdin, tokio::io::stdout()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::{json, Value};
    use tokio::io::{duplex, AsyncReadExt, BufReader};

    use crate::config::DispatchConfig;
    use crate::tools::fake::{FakeAppliance, Mode};
    use crate::tools::ToolRegistry;

    async fn roundtrip(fake: FakeAppliance, input: &str) -> Vec<Value> {
        roundtrip_bytes(fake, input.as_bytes(), MAX_LINE_BYTES).await
    }

    async fn roundtrip_bytes(fake: FakeAppliance, input: &[u8], max_line: usize) -> Vec<Value> {
        let dispatcher = Dispatcher::new(
            ToolRegistry::builtin().unwrap(),
            Arc::new(fake),
            &DispatchConfig::default(),
        );
        let (mut client, server) = duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);

        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();

        serve_with_limit(&dispatcher, BufReader::new(server_read), server_write, max_line)
            .await
            .unwrap();

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        out.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[tokio::test]
    async fn upstream_timeout_answers_with_same_id() {
        let out = roundtrip(
            FakeAppliance::with_mode(Mode::Timeout),
            concat!(
                "{\"jsonrpc\":\"2.0\",\"id\":\"7\",\"method\":\"tools/call\",",
                "\"params\":{\"name\":\"hosts\"}}\n",
            ),
        )
        .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], json!("7"));
        assert_eq!(out[0]["error"]["code"], -32001);
        assert!(out[0].get("result").is_none());
    }

    #[tokio::test]
    async fn one_line_per_request_in_order() {
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
            "\n",
            "not json\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"nope\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"interface_list\"}\n",
        );
        let out = roundtrip(FakeAppliance::default(), input).await;
        assert_eq!(out.len(), 4);
        assert_eq!(out[0]["id"], 1);
        assert_eq!(out[0]["result"], json!({}));
        assert_eq!(out[1]["id"], Value::Null);
        assert_eq!(out[1]["error"]["code"], -32700);
        assert_eq!(out[2]["error"]["code"], -32601);
        assert_eq!(out[3]["result"]["igb0"], "WAN");
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_end_the_session() {
        let mut input = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n".to_vec();
        input.extend_from_slice(b"\xff\xfe garbage\n");
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n");

        let out = roundtrip_bytes(FakeAppliance::default(), &input, MAX_LINE_BYTES).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0]["id"], 1);
        assert_eq!(out[1]["id"], Value::Null);
        assert_eq!(out[1]["error"]["code"], -32700);
        assert_eq!(out[2]["id"], 2);
        assert_eq!(out[2]["result"], json!({}));
    }

    #[tokio::test]
    async fn oversized_line_is_skipped_with_parse_error() {
        let long_method = "x".repeat(500);
        let mut input = format!("{{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"{long_method}\"}}\n")
            .into_bytes();
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n");

        let out = roundtrip_bytes(FakeAppliance::default(), &input, 128).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["id"], Value::Null);
        assert_eq!(out[0]["error"]["code"], -32700);
        assert_eq!(out[1]["id"], 2);
    }
}
