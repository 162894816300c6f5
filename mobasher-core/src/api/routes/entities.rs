//! `/entities` routes: the NLP entities stage has no other read surface,
//! so it gets one route per persisted resource like everything else.

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::routing::get;
use serde::Deserialize;

use crate::api::routes::clamp_limit;
use crate::api::server::AppState;
use crate::domain::Entity;
use crate::persistence::Page;
use crate::Result;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    channel_id: Option<String>,
    label: Option<String>,
    category: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<Entity>>> {
    let limit = clamp_limit(params.limit, 100, 500);
    let offset = params.offset.unwrap_or(0);
    let page = state
        .runtime
        .repos
        .entities
        .search_entities(
            params.channel_id.as_deref(),
            params.label.as_deref(),
            params.category.as_deref(),
            limit,
            offset,
        )
        .await?;
    Ok(Json(page))
}
