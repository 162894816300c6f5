use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::Entity;
use crate::persistence::Page;
use crate::Result;

#[derive(Debug, Clone)]
pub struct NewEntity {
    pub segment_id: Uuid,
    pub segment_started_at: DateTime<Utc>,
    pub channel_id: String,
    pub label: String,
    pub category: String,
    pub start_offset: i32,
    pub end_offset: i32,
    pub model_name: String,
}

#[async_trait]
pub trait EntityRepository: Send + Sync {
    async fn insert_entity(&self, entity: NewEntity) -> Result<Entity>;

    async fn list_entities_for_segment(
        &self,
        segment_id: Uuid,
        segment_started_at: DateTime<Utc>,
    ) -> Result<Vec<Entity>>;

    async fn search_entities(
        &self,
        channel_id: Option<&str>,
        label: Option<&str>,
        category: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Entity>>;
}

pub struct PgEntityRepository {
    pool: PgPool,
}

impl PgEntityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, segment_id, segment_started_at, channel_id, label, category, \
    start_offset, end_offset, model_name, started_at";

#[async_trait]
impl EntityRepository for PgEntityRepository {
    async fn insert_entity(&self, entity: NewEntity) -> Result<Entity> {
        let query = format!(
            r#"
            INSERT INTO entities (
                id, segment_id, segment_started_at, channel_id, label, category,
                start_offset, end_offset, model_name, started_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, Entity>(&query)
            .bind(Uuid::new_v4())
            .bind(entity.segment_id)
            .bind(entity.segment_started_at)
            .bind(&entity.channel_id)
            .bind(&entity.label)
            .bind(&entity.category)
            .bind(entity.start_offset)
            .bind(entity.end_offset)
            .bind(&entity.model_name)
            .fetch_one(&self.pool)
            .await?;

        Ok(row)
    }

    async fn list_entities_for_segment(
        &self,
        segment_id: Uuid,
        segment_started_at: DateTime<Utc>,
    ) -> Result<Vec<Entity>> {
        let query = format!(
            "SELECT {COLUMNS} FROM entities WHERE segment_id = $1 AND segment_started_at = $2 ORDER BY start_offset"
        );
        let rows = sqlx::query_as::<_, Entity>(&query)
            .bind(segment_id)
            .bind(segment_started_at)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn search_entities(
        &self,
        channel_id: Option<&str>,
        label: Option<&str>,
        category: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Entity>> {
        let query = format!(
            r#"
            SELECT {COLUMNS} FROM entities
            WHERE ($1::text IS NULL OR channel_id = $1)
              AND ($2::text IS NULL OR label ILIKE '%' || $2 || '%')
              AND ($3::text IS NULL OR category = $3)
            ORDER BY started_at DESC
            LIMIT $4 OFFSET $5
            "#
        );

        let rows = sqlx::query_as::<_, Entity>(&query)
            .bind(channel_id)
            .bind(label)
            .bind(category)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(rows, limit, offset))
    }
}
