//! `GET /health`: a liveness probe, nothing more.

use axum::Json;
use axum::Router;
use axum::routing::get;
use serde_json::json;

use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(handler))
}

async fn handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}
