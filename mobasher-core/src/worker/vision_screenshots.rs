//! Screenshot capture worker (`vision.screenshots_segment`). A
//! lighter-weight sibling of [`super::vision_ocr`]: it samples a
//! handful of full frames and saves them for operator inspection via
//! `GET /screenshots`, without running OCR over them. Shares the same
//! `ffmpeg`-based capture technique as the OCR worker's per-region
//! screenshot save, generalized here to the full frame only.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;

use crate::domain::{Segment, VisualEventType};
use crate::persistence::NewVisualEvent;
use crate::worker::{Analyser, AnalyserNeeds, Artifact, WorkerContext};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ScreenshotsConfig {
    pub frame_count: u32,
    pub screenshot_root: PathBuf,
}

impl Default for ScreenshotsConfig {
    fn default() -> Self {
        Self {
            frame_count: 1,
            screenshot_root: PathBuf::from("./data/screenshots"),
        }
    }
}

pub struct ScreenshotsAnalyser {
    pub config: ScreenshotsConfig,
}

impl ScreenshotsAnalyser {
    pub fn new(config: ScreenshotsConfig) -> Self {
        Self { config }
    }

    async fn capture_frame(&self, ctx: &WorkerContext, offset_ms: i64) -> Result<String> {
        let today = chrono::Utc::now().date_naive();
        let dir = crate::storage::screenshot_dir(&self.config.screenshot_root, &ctx.channel_id, today);
        crate::utils::fs::ensure_dir_all(&dir).await?;
        let filename = format!(
            "{}-{offset_ms}.jpg",
            ctx.media_path.file_stem().and_then(|s| s.to_str()).unwrap_or("frame"),
        );
        let path = dir.join(&filename);

        let mut command = process_utils::tokio_command("ffmpeg");
        command
            .arg("-y")
            .arg("-ss")
            .arg(format!("{:.3}", offset_ms as f64 / 1000.0))
            .arg("-i")
            .arg(&ctx.media_path)
            .arg("-frames:v")
            .arg("1")
            .arg(&path);
        let status = command
            .status()
            .await
            .map_err(|e| Error::io_path("running ffmpeg screenshot", &path, e))?;
        if !status.success() {
            return Err(Error::Other(format!(
                "ffmpeg screenshot capture failed for {}",
                path.display()
            )));
        }
        Ok(path.to_string_lossy().into_owned())
    }
}

#[async_trait]
impl Analyser for ScreenshotsAnalyser {
    fn name(&self) -> &'static str {
        "vision_screenshots"
    }

    fn needs(&self) -> AnalyserNeeds {
        AnalyserNeeds {
            audio: false,
            video: true,
        }
    }

    async fn run(&self, ctx: &WorkerContext, segment: &Segment) -> Result<Vec<Artifact>> {
        let duration_ms = (segment.ended_at - segment.started_at).num_milliseconds().max(1);
        let count = self.config.frame_count.max(1) as i64;
        let step = duration_ms / (count + 1);

        let mut artifacts = Vec::with_capacity(count as usize);
        for i in 1..=count {
            let offset_ms = step * i;
            let path = self.capture_frame(ctx, offset_ms).await?;
            artifacts.push(Artifact::VisualEvent(NewVisualEvent {
                segment_id: segment.id,
                segment_started_at: segment.started_at,
                channel_id: ctx.channel_id.clone(),
                timestamp_offset: offset_ms as f64 / 1000.0,
                event_type: VisualEventType::SceneChange,
                bbox: None,
                confidence: None,
                data: json!({ "kind": "screenshot" }),
                region: None,
                video_path: Some(ctx.media_path.to_string_lossy().into_owned()),
                video_filename: ctx
                    .media_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string),
                screenshot_path: Some(path),
                frame_timestamp_ms: Some(offset_ms),
            }));
        }
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_captures_one_frame() {
        assert_eq!(ScreenshotsConfig::default().frame_count, 1);
    }
}
