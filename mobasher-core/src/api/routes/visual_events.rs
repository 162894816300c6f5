//! `/visual-events` and `/screenshots` routes.

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::api::routes::clamp_limit;
use crate::api::server::AppState;
use crate::domain::{VisualEvent, VisualEventType};
use crate::persistence::{Page, VisualEventFilter};
use crate::Result;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list))
}

pub fn screenshots_router() -> Router<AppState> {
    Router::new().route("/", get(list_screenshots))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    channel_id: Option<String>,
    event_type: Option<String>,
    region: Option<String>,
    q: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    min_conf: Option<f32>,
    limit: Option<i64>,
    offset: Option<i64>,
}

fn parse_event_type(raw: &str) -> Option<VisualEventType> {
    match raw {
        "object" => Some(VisualEventType::Object),
        "face" => Some(VisualEventType::Face),
        "ocr" => Some(VisualEventType::Ocr),
        "logo" => Some(VisualEventType::Logo),
        "scene_change" => Some(VisualEventType::SceneChange),
        _ => None,
    }
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<VisualEvent>>> {
    let limit = clamp_limit(params.limit, 100, 500);
    let offset = params.offset.unwrap_or(0);
    let filter = VisualEventFilter {
        channel_id: params.channel_id.as_deref(),
        event_type: params.event_type.as_deref().and_then(parse_event_type),
        region: params.region.as_deref(),
        q: params.q.as_deref(),
        since: params.since,
        until: params.until,
        min_confidence: params.min_conf,
    };
    let page = state
        .runtime
        .repos
        .visual_events
        .list_visual_events(filter, limit, offset)
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
struct ScreenshotParams {
    channel_id: Option<String>,
    since: Option<DateTime<Utc>>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_screenshots(
    State(state): State<AppState>,
    Query(params): Query<ScreenshotParams>,
) -> Result<Json<Page<VisualEvent>>> {
    let limit = clamp_limit(params.limit, 50, 200);
    let offset = params.offset.unwrap_or(0);
    let page = state
        .runtime
        .repos
        .visual_events
        .list_screenshots(params.channel_id.as_deref(), params.since, limit, offset)
        .await?;
    Ok(Json(page))
}
