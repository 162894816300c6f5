//! Per-stage workers. All five stages share one execution
//! skeleton (`run_once`), parameterized by a small [`Analyser`] trait object
//! per kind. Stage-specific business logic
//! (model invocation, region handling, dictionary matching) lives in the
//! submodules; this file owns only what every stage needs regardless of
//! kind: status transitions, media path resolution, attempt counting, and
//! metrics.

pub mod asr;
pub mod nlp;
pub mod vision_faces;
pub mod vision_objects;
pub mod vision_ocr;
pub mod vision_screenshots;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prometheus::{HistogramVec, IntCounter, IntCounterVec, Registry};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{PipelineStage, Segment, StageStatus, VisualEventType};
use crate::persistence::{AlertRepository, EntityRepository, SegmentRepository, TranscriptRepository, VisualEventRepository};
use crate::queue::{DeliveryContext, TaskArgs, TaskHandler};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyserNeeds {
    pub audio: bool,
    pub video: bool,
}

/// One artifact produced by an analyser run. A single invocation may yield
/// several (e.g. OCR spans across multiple regions).
pub enum Artifact {
    Transcript(crate::persistence::UpsertTranscript),
    VisualEvent(crate::persistence::NewVisualEvent),
    Entity(crate::persistence::NewEntity),
    Alert(crate::persistence::NewAlert),
}

/// Shared read-only context handed to every analyser invocation: resolved
/// media path, channel id, and the process-wide config needed to locate
/// external tools/dictionaries.
pub struct WorkerContext {
    pub channel_id: String,
    pub media_path: PathBuf,
    pub data_root: PathBuf,
}

#[async_trait]
pub trait Analyser: Send + Sync {
    fn name(&self) -> &'static str;
    fn needs(&self) -> AnalyserNeeds;
    async fn run(&self, ctx: &WorkerContext, segment: &Segment) -> Result<Vec<Artifact>>;
}

/// Resolves a possibly-relative stored media path to one that exists on
/// disk, in order: (a) absolute and exists, (b) under the repository root
/// (current dir), (c) under the ingestion working directory (same as (b) in
/// this layout, kept as a distinct step for a two-stage lookup), (d)
/// remapped under `data_root` if the stored path contains `/audio/` or
/// `/video/`.
pub fn resolve_media_path(stored: &str, data_root: &Path) -> Option<PathBuf> {
    let stored_path = Path::new(stored);

    if stored_path.is_absolute() && stored_path.exists() {
        return Some(stored_path.to_path_buf());
    }

    if let Ok(cwd) = std::env::current_dir() {
        let candidate = cwd.join(stored_path);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    for marker in ["/audio/", "/video/"] {
        if let Some(idx) = stored.find(marker) {
            let remapped = data_root.join(&stored[idx + 1..]);
            if remapped.exists() {
                return Some(remapped);
            }
        }
    }

    None
}

/// Per-stage metric set. `outcomes`/`duration` are ambient and registered for
/// every stage; the remaining counters are stage-specific artifact counts,
/// present only for the stage that can produce that artifact kind.
pub struct WorkerMetrics {
    pub outcomes: IntCounterVec,
    pub duration: HistogramVec,
    pub vision_ocr_events: Option<IntCounterVec>,
    pub vision_objects: Option<IntCounter>,
    pub vision_faces: Option<IntCounter>,
    pub nlp_entities: Option<IntCounterVec>,
    pub nlp_alerts: Option<IntCounterVec>,
}

impl WorkerMetrics {
    pub fn register(registry: &Registry, stage: &str) -> Result<Self> {
        let outcomes = IntCounterVec::new(
            prometheus::Opts::new(
                format!("mobasher_{stage}_segments_total"),
                format!("Outcomes of {stage} worker runs"),
            ),
            &["status"],
        )
        .map_err(|e| Error::Other(e.to_string()))?;
        let duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                format!("mobasher_{stage}_duration_seconds"),
                format!("Wall-clock duration of {stage} analyser runs"),
            ),
            &["channel_id"],
        )
        .map_err(|e| Error::Other(e.to_string()))?;
        registry
            .register(Box::new(outcomes.clone()))
            .map_err(|e| Error::Other(e.to_string()))?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(|e| Error::Other(e.to_string()))?;

        let mut metrics = Self {
            outcomes,
            duration,
            vision_ocr_events: None,
            vision_objects: None,
            vision_faces: None,
            nlp_entities: None,
            nlp_alerts: None,
        };

        match stage {
            "vision_ocr" => {
                let counter = IntCounterVec::new(
                    prometheus::Opts::new(
                        "mobasher_vision_ocr_events_total",
                        "OCR text spans recorded, by screen region",
                    ),
                    &["region"],
                )
                .map_err(|e| Error::Other(e.to_string()))?;
                registry
                    .register(Box::new(counter.clone()))
                    .map_err(|e| Error::Other(e.to_string()))?;
                metrics.vision_ocr_events = Some(counter);
            }
            "vision_objects" => {
                let counter = IntCounter::new(
                    "mobasher_vision_objects_total",
                    "Object detections recorded",
                )
                .map_err(|e| Error::Other(e.to_string()))?;
                registry
                    .register(Box::new(counter.clone()))
                    .map_err(|e| Error::Other(e.to_string()))?;
                metrics.vision_objects = Some(counter);
            }
            "vision_faces" => {
                let counter =
                    IntCounter::new("mobasher_vision_faces_total", "Face detections recorded")
                        .map_err(|e| Error::Other(e.to_string()))?;
                registry
                    .register(Box::new(counter.clone()))
                    .map_err(|e| Error::Other(e.to_string()))?;
                metrics.vision_faces = Some(counter);
            }
            "nlp" => {
                let entities = IntCounterVec::new(
                    prometheus::Opts::new(
                        "mobasher_nlp_entities_total",
                        "Entities recorded, by model",
                    ),
                    &["model_name"],
                )
                .map_err(|e| Error::Other(e.to_string()))?;
                registry
                    .register(Box::new(entities.clone()))
                    .map_err(|e| Error::Other(e.to_string()))?;
                metrics.nlp_entities = Some(entities);

                let alerts = IntCounterVec::new(
                    prometheus::Opts::new(
                        "mobasher_nlp_alerts_total",
                        "Alerts raised, by dictionary category",
                    ),
                    &["category"],
                )
                .map_err(|e| Error::Other(e.to_string()))?;
                registry
                    .register(Box::new(alerts.clone()))
                    .map_err(|e| Error::Other(e.to_string()))?;
                metrics.nlp_alerts = Some(alerts);
            }
            _ => {}
        }

        Ok(metrics)
    }
}

/// Repositories a worker writes artifacts back through. Not every stage uses
/// every repository; unused fields are simply never called.
pub struct WorkerRepositories {
    pub segments: Arc<dyn SegmentRepository>,
    pub transcripts: Arc<dyn TranscriptRepository>,
    pub visual_events: Arc<dyn VisualEventRepository>,
    pub entities: Arc<dyn EntityRepository>,
    pub alerts: Arc<dyn AlertRepository>,
}

/// Generic per-segment worker skeleton, instantiated
/// once per stage with a boxed [`Analyser`].
pub struct StageWorker {
    pub stage: PipelineStage,
    pub analyser: Arc<dyn Analyser>,
    pub repos: Arc<WorkerRepositories>,
    pub data_root: PathBuf,
    pub metrics: Arc<WorkerMetrics>,
}

#[async_trait]
impl TaskHandler for StageWorker {
    async fn handle(&self, args: TaskArgs, ctx: &mut DeliveryContext) -> Result<()> {
        self.run_once(args.segment_id, args.segment_started_at, ctx.attempt)
            .await
    }
}

impl StageWorker {
    pub async fn run_once(
        &self,
        segment_id: Uuid,
        segment_started_at: DateTime<Utc>,
        attempt: u32,
    ) -> Result<()> {
        // Step 1: fetch, missing or lacking media is a bounded retry, not a
        // hard failure -- the detector may simply not have caught up yet.
        let segment = match self.repos.segments.get_segment(segment_id, segment_started_at).await? {
            Some(s) => s,
            None => {
                warn!(stage = self.stage.as_str(), %segment_id, "segment not found yet, will retry");
                return Err(Error::MissingMedia {
                    path: PathBuf::from(format!("segment {segment_id}")),
                });
            }
        };

        let needs = self.analyser.needs();
        let stored_path = if needs.audio {
            segment.audio_path.as_deref()
        } else if needs.video {
            segment.video_path.as_deref()
        } else {
            None
        };
        let stored_path = match stored_path {
            Some(p) => p,
            None if !needs.audio && !needs.video => "",
            None => {
                return Err(Error::MissingMedia {
                    path: PathBuf::from(format!("segment {segment_id} has no required media path")),
                });
            }
        };

        let media_path = if stored_path.is_empty() {
            PathBuf::new()
        } else {
            resolve_media_path(stored_path, &self.data_root).ok_or_else(|| Error::MissingMedia {
                path: PathBuf::from(stored_path),
            })?
        };

        // Step 3: transition to processing.
        self.repos
            .segments
            .set_stage_status(segment_id, segment_started_at, self.stage, StageStatus::Processing)
            .await?;

        let worker_ctx = WorkerContext {
            channel_id: segment.channel_id.clone(),
            media_path,
            data_root: self.data_root.clone(),
        };

        let start = Instant::now();
        let outcome = self.analyser.run(&worker_ctx, &segment).await;
        let elapsed = start.elapsed();
        self.metrics
            .duration
            .with_label_values(&[segment.channel_id.as_str()])
            .observe(elapsed.as_secs_f64());

        match outcome {
            Ok(artifacts) => {
                for artifact in artifacts {
                    self.persist_artifact(artifact).await?;
                }
                self.repos
                    .segments
                    .set_stage_status(segment_id, segment_started_at, self.stage, StageStatus::Completed)
                    .await?;
                self.metrics.outcomes.with_label_values(&["success"]).inc();
                info!(stage = self.stage.as_str(), %segment_id, attempt, elapsed_ms = elapsed.as_millis() as u64, "stage completed");
                Ok(())
            }
            Err(e) => {
                self.repos
                    .segments
                    .set_stage_status(segment_id, segment_started_at, self.stage, StageStatus::Failed)
                    .await?;
                self.metrics.outcomes.with_label_values(&["error"]).inc();
                error!(stage = self.stage.as_str(), %segment_id, attempt, error = %e, "stage failed");
                Err(e)
            }
        }
    }

    async fn persist_artifact(&self, artifact: Artifact) -> Result<()> {
        match artifact {
            Artifact::Transcript(args) => {
                self.repos.transcripts.upsert_transcript(args).await?;
            }
            Artifact::VisualEvent(event) => {
                match event.event_type {
                    VisualEventType::Ocr => {
                        if let Some(counter) = &self.metrics.vision_ocr_events {
                            let region = event.region.as_deref().unwrap_or("unknown");
                            counter.with_label_values(&[region]).inc();
                        }
                    }
                    VisualEventType::Object => {
                        if let Some(counter) = &self.metrics.vision_objects {
                            counter.inc();
                        }
                    }
                    VisualEventType::Face => {
                        if let Some(counter) = &self.metrics.vision_faces {
                            counter.inc();
                        }
                    }
                    VisualEventType::Logo | VisualEventType::SceneChange => {}
                }
                self.repos.visual_events.insert_visual_event(event).await?;
            }
            Artifact::Entity(entity) => {
                if let Some(counter) = &self.metrics.nlp_entities {
                    counter.with_label_values(&[entity.model_name.as_str()]).inc();
                }
                self.repos.entities.insert_entity(entity).await?;
            }
            Artifact::Alert(alert) => {
                if let Some(counter) = &self.metrics.nlp_alerts {
                    counter.with_label_values(&[alert.category.as_str()]).inc();
                }
                self.repos.alerts.insert_alert(alert).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_media_path_accepts_existing_absolute_path() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap().to_string();
        let resolved = resolve_media_path(&path, Path::new("/nonexistent"));
        assert_eq!(resolved.unwrap(), tmp.path());
    }

    #[test]
    fn resolve_media_path_remaps_under_data_root() {
        let tmp = tempfile::tempdir().unwrap();
        let audio_dir = tmp.path().join("audio/2026-03-05");
        std::fs::create_dir_all(&audio_dir).unwrap();
        let file = audio_dir.join("chan-20260305-000000.wav");
        std::fs::write(&file, b"x").unwrap();

        let stored = "/some/other/host/path/audio/2026-03-05/chan-20260305-000000.wav";
        let resolved = resolve_media_path(stored, tmp.path()).unwrap();
        assert_eq!(resolved, file);
    }

    #[test]
    fn resolve_media_path_returns_none_when_unresolvable() {
        assert!(resolve_media_path("/definitely/missing.wav", Path::new("/also/missing")).is_none());
    }
}
