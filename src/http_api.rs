use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::server::{ModbusServer, ServerStatsSnapshot};

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    running: bool,
    transports: usize,
}

async fn health_handler(State(server): State<Arc<ModbusServer>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok",
        running: server.is_running(),
        transports: server.transport_count(),
    };
    (StatusCode::OK, Json(response))
}

async fn stats_handler(State(server): State<Arc<ModbusServer>>) -> impl IntoResponse {
    let snapshot: ServerStatsSnapshot = server.stats();
    (StatusCode::OK, Json(snapshot))
}

/// Serves `/health` and `/stats` over the dispatcher's own counters,
/// shutting down gracefully when `shutdown_rx` fires.
pub async fn start_http_server(
    address: String,
    port: u16,
    server: Arc<ModbusServer>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(server);

    let addr = format!("{address}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("HTTP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("HTTP API shutting down");
        })
        .await?;

    Ok(())
}
