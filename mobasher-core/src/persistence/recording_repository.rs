use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Recording, RecordingStatus};
use crate::persistence::Page;
use crate::Result;

#[async_trait]
pub trait RecordingRepository: Send + Sync {
    async fn create_recording(&self, channel_id: &str, started_at: DateTime<Utc>) -> Result<Recording>;

    async fn complete_recording(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        status: RecordingStatus,
        error_message: Option<&str>,
    ) -> Result<Option<Recording>>;

    async fn list_recent_recordings(
        &self,
        channel_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        status: Option<RecordingStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Recording>>;
}

pub struct PgRecordingRepository {
    pool: PgPool,
}

impl PgRecordingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordingRepository for PgRecordingRepository {
    async fn create_recording(&self, channel_id: &str, started_at: DateTime<Utc>) -> Result<Recording> {
        let recording = sqlx::query_as::<_, Recording>(
            r#"
            INSERT INTO recordings (id, started_at, channel_id, ended_at, status, error_message, metadata)
            VALUES ($1, $2, $3, NULL, $4, NULL, $5)
            RETURNING id, started_at, channel_id, ended_at, status, error_message, metadata
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(started_at)
        .bind(channel_id)
        .bind(RecordingStatus::Running)
        .bind(JsonValue::Object(Default::default()))
        .fetch_one(&self.pool)
        .await?;

        Ok(recording)
    }

    async fn complete_recording(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        status: RecordingStatus,
        error_message: Option<&str>,
    ) -> Result<Option<Recording>> {
        let recording = sqlx::query_as::<_, Recording>(
            r#"
            UPDATE recordings
            SET ended_at = $3, status = $4, error_message = $5
            WHERE id = $1 AND started_at = $2
            RETURNING id, started_at, channel_id, ended_at, status, error_message, metadata
            "#,
        )
        .bind(id)
        .bind(started_at)
        .bind(ended_at)
        .bind(status)
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await?;

        Ok(recording)
    }

    async fn list_recent_recordings(
        &self,
        channel_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        status: Option<RecordingStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Recording>> {
        let recordings = sqlx::query_as::<_, Recording>(
            r#"
            SELECT id, started_at, channel_id, ended_at, status, error_message, metadata
            FROM recordings
            WHERE ($1::text IS NULL OR channel_id = $1)
              AND ($2::timestamptz IS NULL OR started_at >= $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY started_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(channel_id)
        .bind(since)
        .bind(status.map(|s| s.to_string()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::new(recordings, limit, offset))
    }
}
