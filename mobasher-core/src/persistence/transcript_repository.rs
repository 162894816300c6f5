use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Segment, SegmentEmbedding, Transcript};
use crate::persistence::Page;
use crate::Result;

#[derive(Debug, Clone)]
pub struct UpsertTranscript {
    pub segment_id: Uuid,
    pub segment_started_at: DateTime<Utc>,
    pub language: String,
    pub text: String,
    pub text_norm: Option<String>,
    pub confidence: Option<f32>,
    pub words: Option<JsonValue>,
    pub model_name: String,
    pub model_version: Option<String>,
    pub processing_time_ms: Option<i32>,
    pub engine_time_ms: Option<i32>,
}

#[async_trait]
pub trait TranscriptRepository: Send + Sync {
    async fn upsert_transcript(&self, args: UpsertTranscript) -> Result<Transcript>;

    async fn get_transcript(
        &self,
        segment_id: Uuid,
        segment_started_at: DateTime<Utc>,
    ) -> Result<Option<Transcript>>;

    async fn upsert_embedding(
        &self,
        segment_id: Uuid,
        segment_started_at: DateTime<Utc>,
        model_name: &str,
        vector: pgvector::Vector,
    ) -> Result<SegmentEmbedding>;

    async fn list_recent_transcripts(
        &self,
        channel_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<(Segment, Transcript)>>;

    /// Returns `(segment, distance)` ordered by ascending L2 distance.
    async fn semantic_search_segments_by_vector(
        &self,
        query: pgvector::Vector,
        top_k: i64,
        model_name: Option<&str>,
        channel_id: Option<&str>,
    ) -> Result<Vec<(Segment, f64)>>;
}

pub struct PgTranscriptRepository {
    pool: PgPool,
}

impl PgTranscriptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SEGMENT_COLUMNS: &str = "s.id, s.started_at, s.recording_id, s.channel_id, s.ended_at, \
    s.audio_path, s.video_path, s.file_size_bytes, s.status, s.asr_status, s.vision_ocr_status, \
    s.vision_objects_status, s.vision_faces_status, s.nlp_status, s.metadata";

#[async_trait]
impl TranscriptRepository for PgTranscriptRepository {
    async fn upsert_transcript(&self, args: UpsertTranscript) -> Result<Transcript> {
        let transcript = sqlx::query_as::<_, Transcript>(
            r#"
            INSERT INTO transcripts (
                segment_id, segment_started_at, language, text, text_norm, words,
                confidence, model_name, model_version, processing_time_ms, engine_time_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (segment_id, segment_started_at) DO UPDATE SET
                language = EXCLUDED.language,
                text = EXCLUDED.text,
                text_norm = EXCLUDED.text_norm,
                words = EXCLUDED.words,
                confidence = EXCLUDED.confidence,
                model_name = EXCLUDED.model_name,
                model_version = EXCLUDED.model_version,
                processing_time_ms = EXCLUDED.processing_time_ms,
                engine_time_ms = EXCLUDED.engine_time_ms
            RETURNING segment_id, segment_started_at, language, text, text_norm, words,
                confidence, model_name, model_version, processing_time_ms, engine_time_ms
            "#,
        )
        .bind(args.segment_id)
        .bind(args.segment_started_at)
        .bind(&args.language)
        .bind(&args.text)
        .bind(&args.text_norm)
        .bind(&args.words)
        .bind(args.confidence)
        .bind(&args.model_name)
        .bind(&args.model_version)
        .bind(args.processing_time_ms)
        .bind(args.engine_time_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(transcript)
    }

    async fn get_transcript(
        &self,
        segment_id: Uuid,
        segment_started_at: DateTime<Utc>,
    ) -> Result<Option<Transcript>> {
        let transcript = sqlx::query_as::<_, Transcript>(
            r#"
            SELECT segment_id, segment_started_at, language, text, text_norm, words,
                confidence, model_name, model_version, processing_time_ms, engine_time_ms
            FROM transcripts
            WHERE segment_id = $1 AND segment_started_at = $2
            "#,
        )
        .bind(segment_id)
        .bind(segment_started_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transcript)
    }

    async fn upsert_embedding(
        &self,
        segment_id: Uuid,
        segment_started_at: DateTime<Utc>,
        model_name: &str,
        vector: pgvector::Vector,
    ) -> Result<SegmentEmbedding> {
        let embedding = sqlx::query_as::<_, SegmentEmbedding>(
            r#"
            INSERT INTO segment_embeddings (segment_id, segment_started_at, model_name, vector)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (segment_id, segment_started_at) DO UPDATE SET
                model_name = EXCLUDED.model_name,
                vector = EXCLUDED.vector
            RETURNING segment_id, segment_started_at, model_name, vector
            "#,
        )
        .bind(segment_id)
        .bind(segment_started_at)
        .bind(model_name)
        .bind(vector)
        .fetch_one(&self.pool)
        .await?;

        Ok(embedding)
    }

    async fn list_recent_transcripts(
        &self,
        channel_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<(Segment, Transcript)>> {
        let query = format!(
            r#"
            SELECT {SEGMENT_COLUMNS},
                t.segment_id as t_segment_id, t.segment_started_at as t_segment_started_at,
                t.language, t.text, t.text_norm, t.words, t.confidence, t.model_name,
                t.model_version, t.processing_time_ms, t.engine_time_ms
            FROM transcripts t
            JOIN segments s ON s.id = t.segment_id AND s.started_at = t.segment_started_at
            WHERE ($1::text IS NULL OR s.channel_id = $1)
              AND ($2::timestamptz IS NULL OR s.started_at >= $2)
            ORDER BY s.started_at DESC
            LIMIT $3 OFFSET $4
            "#
        );

        let rows = sqlx::query(&query)
            .bind(channel_id)
            .bind(since)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let pairs = rows
            .into_iter()
            .map(|row| {
                let segment: Segment = sqlx::FromRow::from_row(&row)?;
                let transcript = Transcript {
                    segment_id: sqlx::Row::try_get(&row, "t_segment_id")?,
                    segment_started_at: sqlx::Row::try_get(&row, "t_segment_started_at")?,
                    language: sqlx::Row::try_get(&row, "language")?,
                    text: sqlx::Row::try_get(&row, "text")?,
                    text_norm: sqlx::Row::try_get(&row, "text_norm")?,
                    words: sqlx::Row::try_get(&row, "words")?,
                    confidence: sqlx::Row::try_get(&row, "confidence")?,
                    model_name: sqlx::Row::try_get(&row, "model_name")?,
                    model_version: sqlx::Row::try_get(&row, "model_version")?,
                    processing_time_ms: sqlx::Row::try_get(&row, "processing_time_ms")?,
                    engine_time_ms: sqlx::Row::try_get(&row, "engine_time_ms")?,
                };
                Ok::<_, sqlx::Error>((segment, transcript))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Page::new(pairs, limit, offset))
    }

    async fn semantic_search_segments_by_vector(
        &self,
        query_vector: pgvector::Vector,
        top_k: i64,
        model_name: Option<&str>,
        channel_id: Option<&str>,
    ) -> Result<Vec<(Segment, f64)>> {
        let query = format!(
            r#"
            SELECT {SEGMENT_COLUMNS}, (e.vector <-> $1) as distance
            FROM segment_embeddings e
            JOIN segments s ON s.id = e.segment_id AND s.started_at = e.segment_started_at
            WHERE ($2::text IS NULL OR e.model_name = $2)
              AND ($3::text IS NULL OR s.channel_id = $3)
            ORDER BY e.vector <-> $1
            LIMIT $4
            "#
        );

        let rows = sqlx::query(&query)
            .bind(query_vector)
            .bind(model_name)
            .bind(channel_id)
            .bind(top_k)
            .fetch_all(&self.pool)
            .await?;

        let results = rows
            .into_iter()
            .map(|row| {
                let segment: Segment = sqlx::FromRow::from_row(&row)?;
                let distance: f64 = sqlx::Row::try_get(&row, "distance")?;
                Ok::<_, sqlx::Error>((segment, distance))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(results)
    }
}
