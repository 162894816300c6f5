use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::status::VisualEventType;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VisualEvent {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub segment_id: Uuid,
    pub segment_started_at: DateTime<Utc>,
    pub channel_id: String,
    pub timestamp_offset: f64,
    pub event_type: VisualEventType,
    /// `[x, y, w, h]`
    pub bbox: Option<Vec<f64>>,
    pub confidence: Option<f32>,
    pub data: JsonValue,
    pub region: Option<String>,
    pub video_path: Option<String>,
    pub video_filename: Option<String>,
    pub screenshot_path: Option<String>,
    pub frame_timestamp_ms: Option<i64>,
}
