use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::status::RecordingStatus;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recording {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub channel_id: String,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RecordingStatus,
    pub error_message: Option<String>,
    pub metadata: JsonValue,
}
