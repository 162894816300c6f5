//! `GET /metrics`: Prometheus text exposition over the runtime's
//! shared registry, which every stage worker and the API middleware register
//! their collectors into.

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, TextEncoder};

use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/metrics", get(handler))
}

async fn handler(State(state): State<AppState>) -> impl IntoResponse {
    let metric_families = state.runtime.metrics_registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    ([(header::CONTENT_TYPE, encoder.format_type().to_owned())], buffer)
}
