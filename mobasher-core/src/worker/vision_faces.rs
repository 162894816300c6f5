//! Vision face-detection worker. Same
//! shape as [`super::vision_objects`] -- an external detector binary emits
//! per-frame JSON, this analyser filters by confidence and maps detections
//! to visual events -- kept as a separate type since faces are scheduled and
//! metered independently from generic objects.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::domain::{Segment, VisualEventType};
use crate::persistence::NewVisualEvent;
use crate::worker::{Analyser, AnalyserNeeds, Artifact, WorkerContext};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct FacesConfig {
    pub binary: String,
    pub sample_fps: f64,
    pub min_confidence: f32,
}

impl Default for FacesConfig {
    fn default() -> Self {
        Self {
            binary: "mobasher-faces".to_string(),
            sample_fps: 1.0,
            min_confidence: 0.5,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFace {
    bbox: [f64; 4],
    confidence: f32,
    frame_timestamp_ms: i64,
    #[serde(default)]
    identity: Option<String>,
    #[serde(default)]
    identity_distance: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct DetectorOutput {
    faces: Vec<RawFace>,
}

pub struct FacesAnalyser {
    pub config: FacesConfig,
}

impl FacesAnalyser {
    pub fn new(config: FacesConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Analyser for FacesAnalyser {
    fn name(&self) -> &'static str {
        "vision_faces"
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
            .map_err(|e| Error::ModelLoad(format!("failed to spawn face detector: {e}")))?;
        if !output.status.success() {
            return Err(Error::ModelLoad(format!(
                "face detector exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let parsed: DetectorOutput = serde_json::from_slice(&output.stdout)?;
        let video_path = ctx.media_path.to_string_lossy().into_owned();

        Ok(parsed
            .faces
            .into_iter()
            .filter(|f| f.confidence >= self.config.min_confidence)
            .map(|f| {
                let mut data = json!({});
                if let Some(identity) = &f.identity {
                    data["identity"] = json!(identity);
                }
                if let Some(distance) = f.identity_distance {
                    data["identity_distance"] = json!(distance);
                }
                Artifact::VisualEvent(NewVisualEvent {
                    segment_id: segment.id,
                    segment_started_at: segment.started_at,
                    channel_id: ctx.channel_id.clone(),
                    timestamp_offset: f.frame_timestamp_ms as f64 / 1000.0,
                    event_type: VisualEventType::Face,
                    bbox: Some(f.bbox.to_vec()),
                    confidence: Some(f.confidence),
                    data,
                    region: None,
                    video_path: Some(video_path.clone()),
                    video_filename: None,
                    screenshot_path: None,
                    frame_timestamp_ms: Some(f.frame_timestamp_ms),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faces_below_threshold_are_filterable() {
        let faces = vec![
            RawFace { bbox: [0.0, 0.0, 0.1, 0.1], confidence: 0.3, frame_timestamp_ms: 0, identity: None, identity_distance: None },
            RawFace { bbox: [0.0, 0.0, 0.1, 0.1], confidence: 0.9, frame_timestamp_ms: 0, identity: Some("anchor-1".into()), identity_distance: Some(0.2) },
        ];
        let kept: Vec<_> = faces.into_iter().filter(|f| f.confidence >= 0.5).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].identity.as_deref(), Some("anchor-1"));
    }
}
