use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::domain::Channel;
use crate::persistence::Page;
use crate::Result;

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn upsert_channel(
        &self,
        id: &str,
        name: &str,
        url: &str,
        headers: &JsonValue,
        active: bool,
        description: Option<&str>,
    ) -> Result<Channel>;

    async fn get_channel(&self, id: &str) -> Result<Option<Channel>>;

    async fn list_channels(&self, active_only: bool, limit: i64, offset: i64) -> Result<Page<Channel>>;
}

pub struct PgChannelRepository {
    pool: PgPool,
}

impl PgChannelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelRepository for PgChannelRepository {
    async fn upsert_channel(
        &self,
        id: &str,
        name: &str,
        url: &str,
        headers: &JsonValue,
        active: bool,
        description: Option<&str>,
    ) -> Result<Channel> {
        let channel = sqlx::query_as::<_, Channel>(
            r#"
            INSERT INTO channels (id, name, url, headers, active, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                url = EXCLUDED.url,
                headers = EXCLUDED.headers,
                active = EXCLUDED.active,
                description = EXCLUDED.description
            RETURNING id, name, url, headers, active, description, created_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(url)
        .bind(headers)
        .bind(active)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;

        Ok(channel)
    }

    async fn get_channel(&self, id: &str) -> Result<Option<Channel>> {
        let channel = sqlx::query_as::<_, Channel>(
            "SELECT id, name, url, headers, active, description, created_at FROM channels WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(channel)
    }

    async fn list_channels(&self, active_only: bool, limit: i64, offset: i64) -> Result<Page<Channel>> {
        let channels = sqlx::query_as::<_, Channel>(
            r#"
            SELECT id, name, url, headers, active, description, created_at FROM channels
            WHERE ($1 = false OR active = true)
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(active_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::new(channels, limit, offset))
    }
}
