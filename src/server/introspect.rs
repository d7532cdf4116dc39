//! Introspection endpoint
//!
//! Enabled by `pprof: true`: a small HTTP surface on a separate local port
//! exposing the server gauges. `GET /` renders them as text, `GET /vars`
//! as JSON, `GET /healthz` answers liveness probes.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::stats::{MetricsSnapshot, ServerMetrics};

pub const INTROSPECT_ADDR: &str = "127.0.0.1:9999";

pub fn router(metrics: Arc<ServerMetrics>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/vars", get(vars))
        .with_state(metrics)
}

async fn index(State(metrics): State<Arc<ServerMetrics>>) -> String {
    metrics.snapshot().to_string()
}

async fn healthz() -> &'static str {
    "ok"
}

async fn vars(State(metrics): State<Arc<ServerMetrics>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

/// Bind and serve in a background task.
pub async fn serve(metrics: Arc<ServerMetrics>) -> Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(INTROSPECT_ADDR).await?;
    tracing::info!("introspection endpoint available on {}", INTROSPECT_ADDR);
    Ok(tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router(metrics)).await {
            tracing::error!(error = %err, "introspection endpoint failed");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_index_renders_gauges() {
        let metrics = Arc::new(ServerMetrics::new());
        metrics.set_gauges(2, 1, 1);
        let body = index(State(metrics)).await;
        assert!(body.contains("clients: 2"));
        assert!(body.contains("publishers: 1"));
    }

    #[tokio::test]
    async fn test_vars_serializes_snapshot() {
        let metrics = Arc::new(ServerMetrics::new());
        metrics.set_gauges(0, 0, 3);
        let Json(snapshot) = vars(State(metrics)).await;
        assert_eq!(snapshot.receivers, 3);
    }
}
