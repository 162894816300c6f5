use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::SystemMetric;
use crate::Result;

#[async_trait]
pub trait MetricRepository: Send + Sync {
    async fn record_metric(
        &self,
        channel_id: Option<&str>,
        metric_name: &str,
        value: f64,
        labels: JsonValue,
    ) -> Result<SystemMetric>;

    async fn latest_metrics(
        &self,
        channel_id: Option<&str>,
        metric_name: &str,
        limit: i64,
    ) -> Result<Vec<SystemMetric>>;
}

pub struct PgMetricRepository {
    pool: PgPool,
}

impl PgMetricRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "time, id, channel_id, metric_name, value, labels";

#[async_trait]
impl MetricRepository for PgMetricRepository {
    async fn record_metric(
        &self,
        channel_id: Option<&str>,
        metric_name: &str,
        value: f64,
        labels: JsonValue,
    ) -> Result<SystemMetric> {
        let query = format!(
            r#"
            INSERT INTO system_metrics (time, id, channel_id, metric_name, value, labels)
            VALUES (now(), $1, $2, $3, $4, $5)
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, SystemMetric>(&query)
            .bind(Uuid::new_v4())
            .bind(channel_id)
            .bind(metric_name)
            .bind(value)
            .bind(&labels)
            .fetch_one(&self.pool)
            .await?;

        Ok(row)
    }

    async fn latest_metrics(
        &self,
        channel_id: Option<&str>,
        metric_name: &str,
        limit: i64,
    ) -> Result<Vec<SystemMetric>> {
        let query = format!(
            r#"
            SELECT {COLUMNS} FROM system_metrics
            WHERE ($1::text IS NULL OR channel_id = $1)
              AND metric_name = $2
            ORDER BY time DESC
            LIMIT $3
            "#
        );

        let rows = sqlx::query_as::<_, SystemMetric>(&query)
            .bind(channel_id)
            .bind(metric_name)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}
