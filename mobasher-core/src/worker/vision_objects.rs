//! Vision object-detection worker. Shares the detector invocation shape
//! with [`super::vision_faces`]; kept as
//! separate types since each is independently scheduled and labels its
//! metrics under a distinct stage name.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::domain::{Segment, VisualEventType};
use crate::persistence::NewVisualEvent;
use crate::worker::{Analyser, AnalyserNeeds, Artifact, WorkerContext};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ObjectsConfig {
    pub binary: String,
    pub sample_fps: f64,
    pub min_confidence: f32,
}

impl Default for ObjectsConfig {
    fn default() -> Self {
        Self {
            binary: "mobasher-objects".to_string(),
            sample_fps: 1.0,
            min_confidence: 0.4,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    label: String,
    bbox: [f64; 4],
    confidence: f32,
    frame_timestamp_ms: i64,
}

#[derive(Debug, Deserialize)]
struct DetectorOutput {
    detections: Vec<RawDetection>,
}

pub struct ObjectsAnalyser {
    pub config: ObjectsConfig,
}

impl ObjectsAnalyser {
    pub fn new(config: ObjectsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Analyser for ObjectsAnalyser {
    fn name(&self) -> &'static str {
        "vision_objects"
    }

    fn needs(&self) -> AnalyserNeeds {
        AnalyserNeeds {
            audio: false,
            video: true,
        }
    }

    async fn run(&self, ctx: &WorkerContext, segment: &Segment) -> Result<Vec<Artifact>> {
        let mut command = process_utils::tokio_command(&self.config.binary);
        command
            .arg("--input")
            .arg(&ctx.media_path)
            .arg("--sample-fps")
            .arg(self.config.sample_fps.to_string());

        let output = command
            .output()
            .await
            .map_err(|e| Error::ModelLoad(format!("failed to spawn object detector: {e}")))?;
        if !output.status.success() {
            return Err(Error::ModelLoad(format!(
                "object detector exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let parsed: DetectorOutput = serde_json::from_slice(&output.stdout)?;
        let video_path = ctx.media_path.to_string_lossy().into_owned();

        Ok(parsed
            .detections
            .into_iter()
            .filter(|d| d.confidence >= self.config.min_confidence)
            .map(|d| {
                Artifact::VisualEvent(NewVisualEvent {
                    segment_id: segment.id,
                    segment_started_at: segment.started_at,
                    channel_id: ctx.channel_id.clone(),
                    timestamp_offset: d.frame_timestamp_ms as f64 / 1000.0,
                    event_type: VisualEventType::Object,
                    bbox: Some(d.bbox.to_vec()),
                    confidence: Some(d.confidence),
                    data: json!({ "label": d.label }),
                    region: None,
                    video_path: Some(video_path.clone()),
                    video_filename: None,
                    screenshot_path: None,
                    frame_timestamp_ms: Some(d.frame_timestamp_ms),
                })
            })
            .collect())
    }
}
