//! Task queue adapter. Built on Redis Streams (`XADD` + consumer-group
//! `XREADGROUP`) over the `redis` crate directly rather than a broker
//! abstraction. Dedupe uses the classic `SET key val NX EX ttl` primitive:
//! the atomic "was this the first setter" return value doubles as the
//! distributed gate schedulers rely on.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{Error, Result};

/// Arguments every task carries: a segment identity pair, serialized as a
/// JSON object so new fields can be added without breaking older consumers
/// mid-deploy.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct TaskArgs {
    pub segment_id: uuid::Uuid,
    pub segment_started_at: chrono::DateTime<chrono::Utc>,
}

/// Delivery context handed to a consumer's handler: exposes the attempt
/// count and lets the handler request a delayed redelivery instead of an ack.
pub struct DeliveryContext {
    pub attempt: u32,
    requeue: Option<Duration>,
}

impl DeliveryContext {
    /// Requests redelivery after `after`, overriding the default backoff.
    pub fn retry_after(&mut self, after: Duration) {
        self.requeue = Some(after);
    }
}

/// Task queue abstraction . One implementation, `RedisTaskQueue`,
/// backs production; tests substitute an in-memory fake or a `mockall` mock
/// so worker/scheduler logic never needs a live Redis.
#[async_trait::async_trait]
pub trait TaskQueue: Send + Sync {
    /// Sets the dedupe key if absent (`SET NX EX`) and, only if this call
    /// won the race, publishes the task. Returns whether this call enqueued.
    async fn enqueue(
        &self,
        task_name: &str,
        args: &TaskArgs,
        dedupe_key: &str,
        ttl_seconds: u64,
    ) -> Result<bool>;

    /// Runs `handler` over deliveries for `task_name` with up to
    /// `concurrency` messages in flight, until `cancel` fires. On handler
    /// error the message is redelivered after
    /// `default_retry_delay * 2^attempt` seconds (+ jitter) up to
    /// `max_retries`; beyond that it is acked anyway (dead-lettered by
    /// omission from any DLQ in this layer -- the stage's own `failed`
    /// status is the durable record).
    async fn consume(
        &self,
        task_name: &str,
        concurrency: usize,
        cancel: CancellationToken,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<()>;
}

#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, args: TaskArgs, ctx: &mut DeliveryContext) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub default_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            default_retry_delay: Duration::from_secs(5),
        }
    }
}

pub fn backoff_with_jitter(base: Duration, attempt: u32) -> Duration {
    let scaled = base.as_secs_f64() * 2f64.powi(attempt as i32);
    let jitter = rand::rng().random_range(0.0..0.25 * scaled.max(0.001));
    Duration::from_secs_f64(scaled + jitter)
}

const GROUP: &str = "mobasher-workers";

pub struct RedisTaskQueue {
    conn: ConnectionManager,
    retry: RetryPolicy,
}

impl RedisTaskQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn ensure_group(&self, stream: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(stream, GROUP, "0")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(Error::Redis(e)),
        }
    }
}

#[async_trait::async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(
        &self,
        task_name: &str,
        args: &TaskArgs,
        dedupe_key: &str,
        ttl_seconds: u64,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let won: Option<String> = redis::cmd("SET")
            .arg(dedupe_key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(Error::Redis)?;
        if won.is_none() {
            return Ok(false);
        }

        let payload = serde_json::to_string(args)?;
        let _id: String = conn
            .xadd(
                task_name,
                "*",
                &[("payload", payload.as_str()), ("attempt", "0")],
            )
            .await
            .map_err(Error::Redis)?;
        Ok(true)
    }

    async fn consume(
        &self,
        task_name: &str,
        concurrency: usize,
        cancel: CancellationToken,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<()> {
        self.ensure_group(task_name).await?;
        let consumer_name = format!("consumer-{}", std::process::id());
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut join_set: JoinSet<()> = JoinSet::new();

        loop {
            // Reap finished deliveries without blocking; their permits were
            // already dropped inside the spawned task.
            while join_set.try_join_next().is_some() {}

            if cancel.is_cancelled() {
                break;
            }

            let mut conn = self.conn.clone();
            let opts = redis::streams::StreamReadOptions::default()
                .group(GROUP, &consumer_name)
                .count(concurrency)
                .block(1000);
            let reply: redis::RedisResult<redis::streams::StreamReadReply> = conn
                .xread_options(&[task_name], &[">"], &opts)
                .await;

            let reply = match reply {
                Ok(r) => r,
                Err(e) => {
                    warn!(task_name, error = %e, "queue read failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            for stream_key in reply.keys {
                for id in stream_key.ids {
                    let payload = id
                        .map
                        .get("payload")
                        .and_then(|v| match v {
                            redis::Value::BulkString(b) => {
                                String::from_utf8(b.clone()).ok()
                            }
                            _ => None,
                        })
                        .unwrap_or_default();
                    let args: TaskArgs = match serde_json::from_str(&payload) {
                        Ok(a) => a,
                        Err(e) => {
                            error!(task_name, error = %e, "dropping undeserializable message");
                            let _: redis::RedisResult<()> =
                                conn.xack(task_name, GROUP, &[id.id.clone()]).await;
                            continue;
                        }
                    };
                    // Delivery count travels in its own stream field rather than
                    // `TaskArgs` so the wire shape handlers see stays exactly
                    // `(segment_id, segment_started_at)`
                    let attempt: u32 = id
                        .map
                        .get("attempt")
                        .and_then(|v| match v {
                            redis::Value::BulkString(b) => String::from_utf8(b.clone()).ok(),
                            _ => None,
                        })
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0);

                    // Blocks only until a slot frees up, never past it: this is
                    // the one point where `concurrency` is actually enforced.
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                    let delivery_conn = self.conn.clone();
                    let task_name = task_name.to_string();
                    let delivery_id = id.id.clone();
                    let retry = self.retry.clone();
                    let handler = handler.clone();
                    join_set.spawn(async move {
                        let _permit = permit;
                        run_delivery(delivery_conn, &task_name, delivery_id, args, attempt, handler.as_ref(), &retry).await;
                    });
                }
            }
        }

        while join_set.join_next().await.is_some() {}
        Ok(())
    }
}

/// Handles one delivery to completion: invokes `handler`, then acks on
/// success or, on failure, sleeps the backoff and re-enqueues the retry --
/// entirely off the consumer's read loop, so one slow or backing-off
/// delivery never stalls the others.
async fn run_delivery(
    mut conn: ConnectionManager,
    task_name: &str,
    delivery_id: String,
    args: TaskArgs,
    attempt: u32,
    handler: &dyn TaskHandler,
    retry: &RetryPolicy,
) {
    let mut ctx = DeliveryContext {
        attempt,
        requeue: None,
    };
    let outcome = handler.handle(args.clone(), &mut ctx).await;
    match outcome {
        Ok(()) => {
            let _: redis::RedisResult<()> = conn.xack(task_name, GROUP, &[delivery_id]).await;
        }
        Err(e) => {
            warn!(task_name, error = %e, attempt = ctx.attempt, "handler failed");
            if ctx.attempt >= retry.max_retries {
                let _: redis::RedisResult<()> = conn.xack(task_name, GROUP, &[delivery_id]).await;
                return;
            }
            let delay = ctx
                .requeue
                .unwrap_or_else(|| backoff_with_jitter(retry.default_retry_delay, ctx.attempt));
            tokio::time::sleep(delay).await;
            let next_attempt = (ctx.attempt + 1).to_string();
            match serde_json::to_string(&args) {
                Ok(payload) => {
                    let _: redis::RedisResult<String> = conn
                        .xadd(
                            task_name,
                            "*",
                            &[
                                ("payload", payload.as_str()),
                                ("attempt", next_attempt.as_str()),
                            ],
                        )
                        .await;
                }
                Err(e) => error!(task_name, error = %e, "failed to serialize retry payload"),
            }
            let _: redis::RedisResult<()> = conn.xack(task_name, GROUP, &[delivery_id]).await;
        }
    }
}

/// Canonical task names, one per downstream analyser.
pub mod task_names {
    pub const ASR_TRANSCRIBE_SEGMENT: &str = "asr.transcribe_segment";
    pub const VISION_OCR_SEGMENT: &str = "vision.ocr_segment";
    pub const VISION_OBJECTS_SEGMENT: &str = "vision.objects_segment";
    pub const VISION_FACES_SEGMENT: &str = "vision.faces_segment";
    pub const VISION_SCREENSHOTS_SEGMENT: &str = "vision.screenshots_segment";
    pub const NLP_ENTITIES_FOR_TRANSCRIPT: &str = "nlp.entities_for_transcript";
    pub const NLP_ALERTS_FOR_TRANSCRIPT: &str = "nlp.alerts_for_transcript";
}

/// Builds the dedupe key for a stage scheduler's enqueue:
/// `"<stage>:queued:<segment-id>:<segment-started-at>"`.
pub fn dedupe_key(stage: &str, segment_id: uuid::Uuid, segment_started_at: chrono::DateTime<chrono::Utc>) -> String {
    format!("{stage}:queued:{segment_id}:{}", segment_started_at.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_with_base() {
        let base = Duration::from_secs(5);
        let a0 = backoff_with_jitter(base, 0);
        let a2 = backoff_with_jitter(base, 2);
        assert!(a0.as_secs_f64() >= 5.0 && a0.as_secs_f64() < 5.0 * 1.25);
        assert!(a2.as_secs_f64() >= 20.0 && a2.as_secs_f64() < 20.0 * 1.25);
    }

    #[test]
    fn dedupe_key_matches_glossary_format() {
        let id = uuid::Uuid::nil();
        let t = chrono::DateTime::parse_from_rfc3339("2026-03-05T14:30:05Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let key = dedupe_key("asr", id, t);
        assert_eq!(
            key,
            format!("asr:queued:{id}:2026-03-05T14:30:05+00:00")
        );
    }
}
