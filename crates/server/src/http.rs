//! The HTTP POST alternate surface.
//!
//! One JSON-RPC request per `POST /rpc` body; notifications return
//! 204. `GET /healthz` reports liveness without touching the
//! database.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;

use crate::handlers::handle_request;
use crate::rpc::{JsonRpcRequest, JsonRpcResponse, INVALID_REQUEST};
use crate::service::ServiceContainer;

pub fn router(container: Arc<ServiceContainer>) -> Router {
    // Backpressure: bound concurrent requests, everything above
    // queues at the socket.
    Router::new()
        .route("/rpc", post(rpc))
        .route("/healthz", get(healthz))
        .layer(tower::limit::ConcurrencyLimitLayer::new(256))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(container)
}

/// Bind and serve until the process is stopped.
pub async fn serve(container: Arc<ServiceContainer>) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        container.config().server.host,
        container.config().server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "HTTP surface listening");

    axum::serve(listener, router(container)).await?;
    Ok(())
}

async fn rpc(
    State(container): State<Arc<ServiceContainer>>,
    body: Json<Value>,
) -> impl IntoResponse {
    let request: JsonRpcRequest = match serde_json::from_value(body.0) {
        Ok(request) => request,
        Err(e) => {
            let resp = JsonRpcResponse::error(
                Value::Null,
                INVALID_REQUEST,
                format!("malformed request: {e}"),
            );
            return (StatusCode::OK, Json(serde_json::to_value(resp).unwrap_or_default()));
        }
    };

    match handle_request(&container, request).await {
        Some(response) => (
            StatusCode::OK,
            Json(serde_json::to_value(response).unwrap_or_default()),
        ),
        None => (StatusCode::NO_CONTENT, Json(Value::Null)),
    }
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
