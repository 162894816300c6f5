//! Read API route modules, one per resource: each exposes a `pub fn
//! router() -> Router<AppState>`, merged in `create_router`.

pub mod alerts;
pub mod channels;
pub mod entities;
pub mod health;
pub mod metrics;
pub mod recordings;
pub mod segments;
pub mod transcripts;
pub mod visual_events;

use axum::Router;
use axum::middleware;

use crate::api::metrics::track_metrics;
use crate::api::server::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(metrics::router())
        .nest("/channels", channels::router())
        .nest("/recordings", recordings::router())
        .nest("/segments", segments::router())
        .nest("/transcripts", transcripts::router())
        .nest("/visual-events", visual_events::router())
        .nest("/screenshots", visual_events::screenshots_router())
        .nest("/entities", entities::router())
        .nest("/alerts", alerts::router())
        .layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .with_state(state)
}

/// Shared pagination query params: `limit≤N, offset`. `cap`
/// clamps `limit` per-endpoint since each endpoint names its own ceiling.
pub fn clamp_limit(limit: Option<i64>, default: i64, cap: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, cap)
}
