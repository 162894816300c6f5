//! `system_metrics` hypertable row.
//!
//! Required by the CLI `status` aggregate view and by the general
//! "time-partitioning ... per hypertable" policy, which spans four
//! hypertables though the data model prose above only walks through three.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SystemMetric {
    pub time: DateTime<Utc>,
    pub id: Uuid,
    pub channel_id: Option<String>,
    pub metric_name: String,
    pub value: f64,
    pub labels: JsonValue,
}

impl SystemMetric {
    pub fn new(channel_id: Option<String>, metric_name: impl Into<String>, value: f64) -> Self {
        Self {
            time: Utc::now(),
            id: Uuid::new_v4(),
            channel_id,
            metric_name: metric_name.into(),
            value,
            labels: JsonValue::Object(Default::default()),
        }
    }
}
