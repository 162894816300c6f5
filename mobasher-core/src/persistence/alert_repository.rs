use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::Alert;
use crate::persistence::Page;
use crate::Result;

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub segment_id: Uuid,
    pub segment_started_at: DateTime<Utc>,
    pub channel_id: String,
    pub matched_phrase: String,
    pub category: String,
    pub payload: JsonValue,
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn insert_alert(&self, alert: NewAlert) -> Result<Alert>;

    async fn list_recent_alerts(
        &self,
        channel_id: Option<&str>,
        category: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Alert>>;
}

pub struct PgAlertRepository {
    pool: PgPool,
}

impl PgAlertRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, segment_id, segment_started_at, channel_id, matched_phrase, category, \
    payload, created_at";

#[async_trait]
impl AlertRepository for PgAlertRepository {
    async fn insert_alert(&self, alert: NewAlert) -> Result<Alert> {
        let query = format!(
            r#"
            INSERT INTO alerts (
                id, segment_id, segment_started_at, channel_id, matched_phrase, category,
                payload, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, Alert>(&query)
            .bind(Uuid::new_v4())
            .bind(alert.segment_id)
            .bind(alert.segment_started_at)
            .bind(&alert.channel_id)
            .bind(&alert.matched_phrase)
            .bind(&alert.category)
            .bind(&alert.payload)
            .fetch_one(&self.pool)
            .await?;

        Ok(row)
    }

    async fn list_recent_alerts(
        &self,
        channel_id: Option<&str>,
        category: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Alert>> {
        let query = format!(
            r#"
            SELECT {COLUMNS} FROM alerts
            WHERE ($1::text IS NULL OR channel_id = $1)
              AND ($2::text IS NULL OR category = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#
        );

        let rows = sqlx::query_as::<_, Alert>(&query)
            .bind(channel_id)
            .bind(category)
            .bind(since)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(rows, limit, offset))
    }
}
