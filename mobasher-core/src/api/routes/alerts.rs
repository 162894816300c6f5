//! `/alerts` routes: the NLP alerts stage has no other read surface, so it
//! gets one route per persisted resource like everything else.

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::api::routes::clamp_limit;
use crate::api::server::AppState;
use crate::domain::Alert;
use crate::persistence::Page;
use crate::Result;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    channel_id: Option<String>,
    category: Option<String>,
    since: Option<DateTime<Utc>>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<Alert>>> {
    let limit = clamp_limit(params.limit, 100, 500);
    let offset = params.offset.unwrap_or(0);
    let page = state
        .runtime
        .repos
        .alerts
        .list_recent_alerts(
            params.channel_id.as_deref(),
            params.category.as_deref(),
            params.since,
            limit,
            offset,
        )
        .await?;
    Ok(Json(page))
}
