//! Newline-delimited JSON-RPC over stdio.
//!
//! stdout belongs to the protocol, so all logging goes to stderr.
//! Requests are handled on their own tasks; a writer task serialises
//! responses back onto stdout.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::handlers::{handle_request, HANDLER_PANIC_CODE};
use crate::rpc::{JsonRpcRequest, JsonRpcResponse, INVALID_REQUEST};
use crate::service::ServiceContainer;

/// Run until stdin closes.
pub async fn run(container: Arc<ServiceContainer>) -> std::io::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    tracing::info!("stdio server ready");

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                // The id is unknowable from a broken frame.
                let resp = JsonRpcResponse::error(
                    Value::Null,
                    INVALID_REQUEST,
                    format!("malformed request: {e}"),
                );
                send(&tx, &resp);
                continue;
            }
        };

        let container = container.clone();
        let tx = tx.clone();
        let id = request.id.clone();
        tokio::spawn(async move {
            // A panicking handler must not kill the server; surface
            // it as an internal error instead.
            let handled = tokio::spawn({
                let container = container.clone();
                async move { handle_request(&container, request).await }
            })
            .await;

            match handled {
                Ok(Some(response)) => send(&tx, &response),
                Ok(None) => {}
                Err(join_err) => {
                    tracing::error!(error = %join_err, "handler task failed");
                    let resp = JsonRpcResponse::error(
                        id.unwrap_or(Value::Null),
                        HANDLER_PANIC_CODE,
                        "internal error",
                    );
                    send(&tx, &resp);
                }
            }
        });
    }

    drop(tx);
    let _ = writer.await;
    tracing::info!("stdin closed, shutting down");
    Ok(())
}

fn send(tx: &mpsc::UnboundedSender<String>, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(line) => {
            let _ = tx.send(line);
        }
        Err(e) => tracing::error!(error = %e, "failed to serialise response"),
    }
}
