//! Schedulers: periodic polls that find segments missing a downstream
//! artifact and enqueue a task for them, with exponential backoff and jitter
//! on error. One generic loop (`run_scheduler_loop`) is parameterized by a
//! per-stage poll function; `backoff` holds the unrelated restart-backoff
//! primitive shared with the capture supervisor.

pub mod backoff;

use std::future::Future;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::domain::{PipelineStage, StageStatus};
use crate::persistence::SegmentRepository;
use crate::queue::{dedupe_key, task_names, TaskArgs, TaskQueue};
use crate::Result;

/// Tunables shared by every stage scheduler .
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval_seconds: u64,
    pub max_interval_seconds: u64,
    pub lookback_minutes: i64,
    pub channel_id: Option<String>,
    pub batch_limit: i64,
    pub dedupe_ttl_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            max_interval_seconds: 300,
            lookback_minutes: 10,
            channel_id: None,
            batch_limit: 200,
            dedupe_ttl_seconds: 3600,
        }
    }
}

/// Runs `poll` on a timer until `cancel` fires. On success the interval
/// resets to `config.interval_seconds`; on error it doubles, capped at
/// `config.max_interval_seconds`. Every sleep adds up to 20% jitter in
/// either direction to avoid every channel's scheduler waking in lockstep.
pub async fn run_scheduler_loop<F, Fut>(
    name: &str,
    cancel: CancellationToken,
    config: &SchedulerConfig,
    mut poll: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<usize>>,
{
    let mut current_interval = config.interval_seconds.max(10);
    loop {
        if cancel.is_cancelled() {
            return;
        }

        match poll().await {
            Ok(enqueued) => {
                info!(scheduler = name, enqueued, "scheduler poll complete");
                current_interval = config.interval_seconds.max(10);
            }
            Err(e) => {
                error!(scheduler = name, error = %e, "scheduler poll failed");
                current_interval = (current_interval * 2).min(config.max_interval_seconds);
            }
        }

        let jitter = rand::rng().random_range(-0.2..0.2);
        let sleep_for = ((current_interval as f64) * (1.0 + jitter)).max(5.0);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs_f64(sleep_for)) => {}
        }
    }
}

/// One poll for a single-artifact stage (ASR, OCR, objects, faces): finds
/// segments whose stage status is still `pending` within the lookback
/// window, enqueues a task per segment through the dedupe gate, and marks
/// the stage `queued` for every segment that won the race.
pub async fn enqueue_missing_for_stage(
    stage: PipelineStage,
    task_name: &str,
    segments: &dyn SegmentRepository,
    queue: &dyn TaskQueue,
    config: &SchedulerConfig,
) -> Result<usize> {
    let since = Utc::now() - ChronoDuration::minutes(config.lookback_minutes);
    let candidates = segments
        .list_segments_missing_stage(stage, config.channel_id.as_deref(), since, config.batch_limit)
        .await?;

    let mut enqueued = 0usize;
    for seg in candidates {
        let args = TaskArgs {
            segment_id: seg.id,
            segment_started_at: seg.started_at,
        };
        let key = dedupe_key(stage.as_str(), seg.id, seg.started_at);
        let won = queue
            .enqueue(task_name, &args, &key, config.dedupe_ttl_seconds)
            .await?;
        if !won {
            continue;
        }
        segments
            .set_stage_status(seg.id, seg.started_at, stage, StageStatus::Queued)
            .await?;
        enqueued += 1;
    }
    Ok(enqueued)
}

/// NLP's poll differs from the single-artifact stages: `list_segments_missing_stage`
/// already gates candidates on the transcript row existing (a negative/positive
/// existence predicate, not a status scan -- see [`crate::persistence::SegmentRepository`]),
/// so every candidate here is known transcribed. NLP enqueues two independent
/// tasks -- entities and alerts -- per eligible segment.
pub async fn enqueue_nlp_missing(
    segments: &dyn SegmentRepository,
    queue: &dyn TaskQueue,
    config: &SchedulerConfig,
) -> Result<usize> {
    let since = Utc::now() - ChronoDuration::minutes(config.lookback_minutes);
    let candidates = segments
        .list_segments_missing_stage(PipelineStage::Nlp, config.channel_id.as_deref(), since, config.batch_limit)
        .await?;

    let mut enqueued = 0usize;
    for seg in candidates {
        let args = TaskArgs {
            segment_id: seg.id,
            segment_started_at: seg.started_at,
        };
        let entities_key = dedupe_key("nlp_entities", seg.id, seg.started_at);
        let alerts_key = dedupe_key("nlp_alerts", seg.id, seg.started_at);

        let won_entities = queue
            .enqueue(task_names::NLP_ENTITIES_FOR_TRANSCRIPT, &args, &entities_key, config.dedupe_ttl_seconds)
            .await?;
        let won_alerts = queue
            .enqueue(task_names::NLP_ALERTS_FOR_TRANSCRIPT, &args, &alerts_key, config.dedupe_ttl_seconds)
            .await?;

        if won_entities || won_alerts {
            segments
                .set_stage_status(seg.id, seg.started_at, PipelineStage::Nlp, StageStatus::Queued)
                .await?;
            enqueued += 1;
        }
    }
    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn scheduler_loop_stops_promptly_when_cancelled() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let cancel_clone = cancel.clone();

        let handle = tokio::spawn(async move {
            run_scheduler_loop("test", cancel_clone, &SchedulerConfig::default(), || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler loop did not stop after cancellation")
            .unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
