use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub url: String,
    pub headers: JsonValue,
    pub active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
