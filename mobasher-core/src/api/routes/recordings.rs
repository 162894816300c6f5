//! `/recordings` routes.

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::api::routes::clamp_limit;
use crate::api::server::AppState;
use crate::domain::{Recording, RecordingStatus};
use crate::persistence::Page;
use crate::Result;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    channel_id: Option<String>,
    since: Option<DateTime<Utc>>,
    status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

fn parse_status(raw: &str) -> Option<RecordingStatus> {
    match raw {
        "running" => Some(RecordingStatus::Running),
        "completed" => Some(RecordingStatus::Completed),
        "failed" => Some(RecordingStatus::Failed),
        "stopped" => Some(RecordingStatus::Stopped),
        _ => None,
    }
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<Recording>>> {
    let limit = clamp_limit(params.limit, 100, 500);
    let offset = params.offset.unwrap_or(0);
    let status = params.status.as_deref().and_then(parse_status);
    let page = state
        .runtime
        .repos
        .recordings
        .list_recent_recordings(
            params.channel_id.as_deref(),
            params.since,
            status,
            limit,
            offset,
        )
        .await?;
    Ok(Json(page))
}
