//! Persistence layer: idempotent upserts over a relational store with
//! time-partitioned tables, one trait-per-entity repository built on
//! Postgres and the runtime `sqlx::query`/`query_as` builder API, since
//! there is no live database available to generate an offline query cache
//! in this environment.

pub mod alert_repository;
pub mod channel_repository;
pub mod entity_repository;
pub mod metric_repository;
pub mod pool;
pub mod recording_repository;
pub mod segment_repository;
pub mod transcript_repository;
pub mod visual_event_repository;

pub use alert_repository::{AlertRepository, NewAlert, PgAlertRepository};
pub use channel_repository::{ChannelRepository, PgChannelRepository};
pub use entity_repository::{EntityRepository, NewEntity, PgEntityRepository};
pub use metric_repository::{MetricRepository, PgMetricRepository};
pub use pool::{connect, run_migrations};
pub use recording_repository::{PgRecordingRepository, RecordingRepository};
pub use segment_repository::{PgSegmentRepository, SegmentRepository, UpsertSegment};
pub use transcript_repository::{PgTranscriptRepository, TranscriptRepository, UpsertTranscript};
pub use visual_event_repository::{
    NewVisualEvent, PgVisualEventRepository, VisualEventFilter, VisualEventRepository,
};

/// Retries `f` once on [`crate::Error::DbConflict`]: a unique-constraint
/// conflict is treated as "another writer got there first", and the call
/// retries with a read-modify-write once before surfacing. Any other error,
/// or a second conflict, is returned as-is.
pub async fn retry_on_conflict<T, F, Fut>(mut f: F) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    match f().await {
        Err(crate::Error::DbConflict(_)) => f().await,
        other => other,
    }
}

/// Pagination metadata: `next_offset` is present only when exactly `limit`
/// items were returned.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PageMeta {
    pub limit: i64,
    pub offset: i64,
    pub next_offset: Option<i64>,
}

/// A page of results wrapped in the `{items, meta: {...}}` envelope.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, limit: i64, offset: i64) -> Self {
        let next_offset = (items.len() as i64 == limit).then_some(offset + items.len() as i64);
        Self {
            items,
            meta: PageMeta {
                limit,
                offset,
                next_offset,
            },
        }
    }

    /// Reshapes the item type while carrying pagination metadata over
    /// unchanged, for routes that map repository rows into a response-only
    /// item type (e.g. `/transcripts`' `{segment, transcript}` pairs).
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_offset_present_only_when_page_is_full() {
        let full: Page<i32> = Page::new(vec![1, 2, 3], 3, 0);
        assert_eq!(full.meta.next_offset, Some(3));

        let partial: Page<i32> = Page::new(vec![1, 2], 3, 0);
        assert_eq!(partial.meta.next_offset, None);
    }

    #[test]
    fn serializes_as_nested_meta_envelope() {
        let page: Page<i32> = Page::new(vec![1, 2], 2, 0);
        let value = serde_json::to_value(&page).unwrap();
        assert_eq!(value["items"], serde_json::json!([1, 2]));
        assert_eq!(value["meta"]["limit"], 2);
        assert_eq!(value["meta"]["offset"], 0);
        assert_eq!(value["meta"]["next_offset"], 2);
        assert!(value.get("limit").is_none(), "pagination fields must live under meta");
    }

    #[test]
    fn map_preserves_meta() {
        let page: Page<i32> = Page::new(vec![1, 2, 3], 3, 0);
        let mapped = page.map(|n| n.to_string());
        assert_eq!(mapped.items, vec!["1", "2", "3"]);
        assert_eq!(mapped.meta.next_offset, Some(3));
    }

    #[tokio::test]
    async fn retry_on_conflict_retries_exactly_once() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = retry_on_conflict(|| {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(crate::Error::DbConflict(sqlx::Error::RowNotFound))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_on_conflict_surfaces_second_conflict() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: crate::Result<()> = retry_on_conflict(|| {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Err(crate::Error::DbConflict(sqlx::Error::RowNotFound)) }
        })
        .await;

        assert!(matches!(result, Err(crate::Error::DbConflict(_))));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_on_conflict_does_not_retry_other_errors() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: crate::Result<()> = retry_on_conflict(|| {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Err(crate::Error::Other("boom".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
