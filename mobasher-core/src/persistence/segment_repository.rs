use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{PipelineStage, Segment, SegmentStatus, StageStatus};
use crate::persistence::{Page, retry_on_conflict};
use crate::{Error, Result};

/// Arguments for [`SegmentRepository::upsert_segment`], grouped to keep the
/// call site readable (the upsert signature has a dozen fields).
#[derive(Debug, Clone)]
pub struct UpsertSegment {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub recording_id: Uuid,
    pub channel_id: String,
    pub ended_at: DateTime<Utc>,
    pub audio_path: Option<String>,
    pub video_path: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub status: SegmentStatus,
}

#[async_trait]
pub trait SegmentRepository: Send + Sync {
    async fn upsert_segment(&self, args: UpsertSegment) -> Result<Segment>;

    async fn get_segment(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<Option<Segment>>;

    async fn list_segments(
        &self,
        channel_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        status: Option<SegmentStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Segment>>;

    async fn list_segments_missing_stage(
        &self,
        stage: PipelineStage,
        channel_id: Option<&str>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Segment>>;

    async fn set_stage_status(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
        stage: PipelineStage,
        status: StageStatus,
    ) -> Result<()>;
}

pub struct PgSegmentRepository {
    pool: PgPool,
}

impl PgSegmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn stage_column(stage: PipelineStage) -> &'static str {
    match stage {
        PipelineStage::Asr => "asr_status",
        PipelineStage::VisionOcr => "vision_ocr_status",
        PipelineStage::VisionObjects => "vision_objects_status",
        PipelineStage::VisionFaces => "vision_faces_status",
        PipelineStage::Nlp => "nlp_status",
    }
}

const SEGMENT_COLUMNS: &str = "id, started_at, recording_id, channel_id, ended_at, audio_path, \
    video_path, file_size_bytes, status, asr_status, vision_ocr_status, vision_objects_status, \
    vision_faces_status, nlp_status, metadata";

#[async_trait]
impl SegmentRepository for PgSegmentRepository {
    async fn upsert_segment(&self, args: UpsertSegment) -> Result<Segment> {
        Segment::validate_paths(&args.audio_path, &args.video_path)?;

        let query = format!(
            r#"
            INSERT INTO segments (
                id, started_at, recording_id, channel_id, ended_at,
                audio_path, video_path, file_size_bytes, status,
                asr_status, vision_ocr_status, vision_objects_status, vision_faces_status, nlp_status,
                metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', 'pending', 'pending', 'pending', 'pending', $10)
            ON CONFLICT (id, started_at) DO UPDATE SET
                -- merge semantics: preserve existing non-null paths, take the max known file size
                audio_path = COALESCE(segments.audio_path, EXCLUDED.audio_path),
                video_path = COALESCE(segments.video_path, EXCLUDED.video_path),
                file_size_bytes = GREATEST(
                    COALESCE(segments.file_size_bytes, 0),
                    COALESCE(EXCLUDED.file_size_bytes, 0)
                ),
                ended_at = EXCLUDED.ended_at,
                status = EXCLUDED.status
            RETURNING {SEGMENT_COLUMNS}
            "#
        );

        let segment = retry_on_conflict(|| async {
            sqlx::query_as::<_, Segment>(&query)
                .bind(args.id)
                .bind(args.started_at)
                .bind(args.recording_id)
                .bind(&args.channel_id)
                .bind(args.ended_at)
                .bind(&args.audio_path)
                .bind(&args.video_path)
                .bind(args.file_size_bytes)
                .bind(args.status)
                .bind(JsonValue::Object(Default::default()))
                .fetch_one(&self.pool)
                .await
                .map_err(|e| match &e {
                    sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                        Error::DbConflict(e)
                    }
                    _ => Error::from(e),
                })
        })
        .await?;

        Ok(segment)
    }

    async fn get_segment(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<Option<Segment>> {
        let query = format!("SELECT {SEGMENT_COLUMNS} FROM segments WHERE id = $1 AND started_at = $2");
        let segment = sqlx::query_as::<_, Segment>(&query)
            .bind(id)
            .bind(started_at)
            .fetch_optional(&self.pool)
            .await?;
        Ok(segment)
    }

    async fn list_segments(
        &self,
        channel_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        status: Option<SegmentStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Segment>> {
        let query = format!(
            r#"
            SELECT {SEGMENT_COLUMNS} FROM segments
            WHERE ($1::text IS NULL OR channel_id = $1)
              AND ($2::timestamptz IS NULL OR started_at >= $2)
              AND ($3::timestamptz IS NULL OR started_at < $3)
              AND ($4::text IS NULL OR status = $4)
            ORDER BY started_at DESC
            LIMIT $5 OFFSET $6
            "#
        );
        let segments = sqlx::query_as::<_, Segment>(&query)
            .bind(channel_id)
            .bind(start)
            .bind(end)
            .bind(status.map(|s| s.to_string()))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(segments, limit, offset))
    }

    async fn list_segments_missing_stage(
        &self,
        stage: PipelineStage,
        channel_id: Option<&str>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Segment>> {
        // ASR and NLP gate on the presence of a downstream row rather than
        // their own status column: a status scan strands any segment whose
        // worker crashed after marking the stage `processing` but before the
        // row was ever written, since `processing` never matches `pending`
        // again. NLP additionally must never fire before its own
        // prerequisite (the transcript) exists.
        let query = match stage {
            PipelineStage::Asr => format!(
                r#"
                SELECT {SEGMENT_COLUMNS} FROM segments
                WHERE NOT EXISTS (
                    SELECT 1 FROM transcripts t
                    WHERE t.segment_id = segments.id AND t.segment_started_at = segments.started_at
                )
                  AND started_at >= $1
                  AND ($2::text IS NULL OR channel_id = $2)
                  AND status != 'failed'
                ORDER BY started_at ASC
                LIMIT $3
                "#
            ),
            PipelineStage::Nlp => format!(
                r#"
                SELECT {SEGMENT_COLUMNS} FROM segments
                WHERE nlp_status = 'pending'
                  AND EXISTS (
                    SELECT 1 FROM transcripts t
                    WHERE t.segment_id = segments.id AND t.segment_started_at = segments.started_at
                  )
                  AND started_at >= $1
                  AND ($2::text IS NULL OR channel_id = $2)
                  AND status != 'failed'
                ORDER BY started_at ASC
                LIMIT $3
                "#
            ),
            _ => {
                let column = stage_column(stage);
                format!(
                    r#"
                    SELECT {SEGMENT_COLUMNS} FROM segments
                    WHERE {column} = 'pending'
                      AND started_at >= $1
                      AND ($2::text IS NULL OR channel_id = $2)
                      AND status != 'failed'
                    ORDER BY started_at ASC
                    LIMIT $3
                    "#
                )
            }
        };
        let segments = sqlx::query_as::<_, Segment>(&query)
            .bind(since)
            .bind(channel_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(segments)
    }

    async fn set_stage_status(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
        stage: PipelineStage,
        status: StageStatus,
    ) -> Result<()> {
        let column = stage_column(stage);
        let query = format!(
            "UPDATE segments SET {column} = $1 WHERE id = $2 AND started_at = $3"
        );
        sqlx::query(&query)
            .bind(status)
            .bind(id)
            .bind(started_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
