use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Entity {
    pub id: Uuid,
    pub segment_id: Uuid,
    pub segment_started_at: DateTime<Utc>,
    pub channel_id: String,
    pub label: String,
    pub category: String,
    pub start_offset: i32,
    pub end_offset: i32,
    pub model_name: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub segment_id: Uuid,
    pub segment_started_at: DateTime<Utc>,
    pub channel_id: String,
    pub matched_phrase: String,
    pub category: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}
