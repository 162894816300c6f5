//! `/segments` routes.

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::api::routes::clamp_limit;
use crate::api::server::AppState;
use crate::domain::{Segment, SegmentStatus};
use crate::persistence::Page;
use crate::Result;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    channel_id: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

fn parse_status(raw: &str) -> Option<SegmentStatus> {
    match raw {
        "created" => Some(SegmentStatus::Created),
        "processing" => Some(SegmentStatus::Processing),
        "completed" => Some(SegmentStatus::Completed),
        "failed" => Some(SegmentStatus::Failed),
        _ => None,
    }
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<Segment>>> {
    let limit = clamp_limit(params.limit, 100, 1000);
    let offset = params.offset.unwrap_or(0);
    let status = params.status.as_deref().and_then(parse_status);
    let page = state
        .runtime
        .repos
        .segments
        .list_segments(
            params.channel_id.as_deref(),
            params.start,
            params.end,
            status,
            limit,
            offset,
        )
        .await?;
    Ok(Json(page))
}
