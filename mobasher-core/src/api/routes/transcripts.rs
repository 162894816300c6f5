//! `/transcripts` routes: paginated `{segment, transcript}` pairs.

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::routes::clamp_limit;
use crate::api::server::AppState;
use crate::domain::{Segment, Transcript};
use crate::persistence::Page;
use crate::Result;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    channel_id: Option<String>,
    since: Option<DateTime<Utc>>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
struct TranscriptItem {
    segment: Segment,
    transcript: Transcript,
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<TranscriptItem>>> {
    let limit = clamp_limit(params.limit, 50, 500);
    let offset = params.offset.unwrap_or(0);
    let page = state
        .runtime
        .repos
        .transcripts
        .list_recent_transcripts(params.channel_id.as_deref(), params.since, limit, offset)
        .await?;

    Ok(Json(
        page.map(|(segment, transcript)| TranscriptItem { segment, transcript }),
    ))
}
