//! `/channels` routes.

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::api::routes::clamp_limit;
use crate::api::server::AppState;
use crate::domain::Channel;
use crate::persistence::Page;
use crate::{Error, Result};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(upsert))
        .route("/{id}", get(get_one))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    active_only: Option<bool>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<Channel>>> {
    let limit = clamp_limit(params.limit, 100, 500);
    let offset = params.offset.unwrap_or(0);
    let page = state
        .runtime
        .repos
        .channels
        .list_channels(params.active_only.unwrap_or(false), limit, offset)
        .await?;
    Ok(Json(page))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Channel>> {
    state
        .runtime
        .repos
        .channels
        .get_channel(&id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::not_found(format!("no channel with id `{id}`")))
}

/// A channel descriptor submitted to `POST /channels` (the options,
/// minus the capture-only fields the API doesn't need to accept).
#[derive(Debug, Deserialize)]
struct ChannelUpsert {
    id: String,
    name: String,
    url: String,
    #[serde(default)]
    headers: JsonValue,
    #[serde(default = "default_true")]
    active: bool,
    description: Option<String>,
}

fn default_true() -> bool {
    true
}

async fn upsert(
    State(state): State<AppState>,
    Json(body): Json<ChannelUpsert>,
) -> Result<Json<Channel>> {
    let headers = if body.headers.is_null() {
        JsonValue::Object(Default::default())
    } else {
        body.headers
    };
    let channel = state
        .runtime
        .repos
        .channels
        .upsert_channel(
            &body.id,
            &body.name,
            &body.url,
            &headers,
            body.active,
            body.description.as_deref(),
        )
        .await?;
    Ok(Json(channel))
}
