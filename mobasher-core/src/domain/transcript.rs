use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transcript {
    pub segment_id: Uuid,
    pub segment_started_at: DateTime<Utc>,
    pub language: String,
    pub text: String,
    pub text_norm: Option<String>,
    pub words: Option<JsonValue>,
    pub confidence: Option<f32>,
    pub model_name: String,
    pub model_version: Option<String>,
    pub processing_time_ms: Option<i32>,
    pub engine_time_ms: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SegmentEmbedding {
    pub segment_id: Uuid,
    pub segment_started_at: DateTime<Utc>,
    pub model_name: String,
    pub vector: Option<pgvector::Vector>,
}

/// Fixed embedding dimension used by `semantic_search_segments_by_vector`.
pub const EMBEDDING_DIM: usize = 384;
