//! HTTP exposition: GET /metrics and GET /health.
//!
//! The server only reads. It takes the store lock, renders the text format,
//! and releases the lock; it never mutates a metric. Rendering happens under
//! the same lock the reconciler writes under, so a scrape sees whole cycles.

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing::error;

use crate::store::SharedStore;

/// Content type of the Prometheus text exposition format.
const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Builds the exporter's router over a shared metric store.
pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .route("/health", get(handle_health))
        .with_state(store)
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_metrics(State(store): State<SharedStore>) -> Response {
    let encoded = {
        let store = store.lock().unwrap();
        store.encode()
    };
    match encoded {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "encoding error").into_response()
        }
    }
}
