use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{VisualEvent, VisualEventType};
use crate::persistence::Page;
use crate::Result;

#[derive(Debug, Clone)]
pub struct NewVisualEvent {
    pub segment_id: Uuid,
    pub segment_started_at: DateTime<Utc>,
    pub channel_id: String,
    pub timestamp_offset: f64,
    pub event_type: VisualEventType,
    pub bbox: Option<Vec<f64>>,
    pub confidence: Option<f32>,
    pub data: JsonValue,
    pub region: Option<String>,
    pub video_path: Option<String>,
    pub video_filename: Option<String>,
    pub screenshot_path: Option<String>,
    pub frame_timestamp_ms: Option<i64>,
}

#[async_trait]
pub trait VisualEventRepository: Send + Sync {
    async fn insert_visual_event(&self, event: NewVisualEvent) -> Result<VisualEvent>;

    async fn list_visual_events(
        &self,
        filter: VisualEventFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<VisualEvent>>;

    /// Screenshots view (`GET /screenshots`): every visual event
    /// carrying a non-null `screenshot_path`, newest first.
    async fn list_screenshots(
        &self,
        channel_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<VisualEvent>>;
}

/// Query filter for `GET /visual-events`. `region` and `q` (substring match
/// over the event's `data` payload's text, where present) are additional
/// filters beyond the core columns.
#[derive(Debug, Clone, Default)]
pub struct VisualEventFilter<'a> {
    pub channel_id: Option<&'a str>,
    pub event_type: Option<VisualEventType>,
    pub region: Option<&'a str>,
    pub q: Option<&'a str>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_confidence: Option<f32>,
}

pub struct PgVisualEventRepository {
    pool: PgPool,
}

impl PgVisualEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, created_at, segment_id, segment_started_at, channel_id, \
    timestamp_offset, event_type, bbox, confidence, data, region, video_path, video_filename, \
    screenshot_path, frame_timestamp_ms";

#[async_trait]
impl VisualEventRepository for PgVisualEventRepository {
    async fn insert_visual_event(&self, event: NewVisualEvent) -> Result<VisualEvent> {
        let query = format!(
            r#"
            INSERT INTO visual_events (
                id, created_at, segment_id, segment_started_at, channel_id, timestamp_offset,
                event_type, bbox, confidence, data, region, video_path, video_filename,
                screenshot_path, frame_timestamp_ms
            )
            VALUES (
                $1, now(), $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14
            )
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, VisualEvent>(&query)
            .bind(Uuid::new_v4())
            .bind(event.segment_id)
            .bind(event.segment_started_at)
            .bind(&event.channel_id)
            .bind(event.timestamp_offset)
            .bind(event.event_type)
            .bind(&event.bbox)
            .bind(event.confidence)
            .bind(&event.data)
            .bind(&event.region)
            .bind(&event.video_path)
            .bind(&event.video_filename)
            .bind(&event.screenshot_path)
            .bind(event.frame_timestamp_ms)
            .fetch_one(&self.pool)
            .await?;

        Ok(row)
    }

    async fn list_visual_events(
        &self,
        filter: VisualEventFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<VisualEvent>> {
        let query = format!(
            r#"
            SELECT {COLUMNS} FROM visual_events
            WHERE ($1::text IS NULL OR channel_id = $1)
              AND ($2::text IS NULL OR event_type = $2)
              AND ($3::text IS NULL OR region = $3)
              AND ($4::text IS NULL OR data::text ILIKE '%' || $4 || '%')
              AND ($5::timestamptz IS NULL OR created_at >= $5)
              AND ($6::timestamptz IS NULL OR created_at < $6)
              AND ($7::real IS NULL OR confidence >= $7)
            ORDER BY created_at DESC
            LIMIT $8 OFFSET $9
            "#
        );

        let events = sqlx::query_as::<_, VisualEvent>(&query)
            .bind(filter.channel_id)
            .bind(filter.event_type.map(|t| t.to_string()))
            .bind(filter.region)
            .bind(filter.q)
            .bind(filter.since)
            .bind(filter.until)
            .bind(filter.min_confidence)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(events, limit, offset))
    }

    async fn list_screenshots(
        &self,
        channel_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<VisualEvent>> {
        let query = format!(
            r#"
            SELECT {COLUMNS} FROM visual_events
            WHERE screenshot_path IS NOT NULL
              AND ($1::text IS NULL OR channel_id = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        );

        let events = sqlx::query_as::<_, VisualEvent>(&query)
            .bind(channel_id)
            .bind(since)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(events, limit, offset))
    }
}
