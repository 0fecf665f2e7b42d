//! Metrics exposition server
//!
//! One scrape endpoint returning the full metric snapshot in the
//! Prometheus text format, plus a liveness probe. A request to the
//! metrics path drives a full collection across every provider before
//! the registry is gathered.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::exporter::Exporter;

pub fn router(exporter: Arc<Exporter>, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/healthz", get(health_handler))
        .with_state(exporter)
        .layer(TraceLayer::new_for_http())
}

async fn metrics_handler(
    State(exporter): State<Arc<Exporter>>,
) -> Result<String, (StatusCode, String)> {
    exporter.scrape().await.map_err(|e| {
        error!(error = %e, "failed to render metric snapshot");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

async fn health_handler() -> &'static str {
    "ok"
}
