//! Vision OCR worker. Samples frames from
//! the segment's video at a configured rate, runs an external OCR tool per
//! region of interest, aggregates each region-frame's tokens into one event
//! (token-sorted text, union bbox, max token height), and merges consecutive
//! same-text aggregated detections into spans before persisting -- only
//! spans are canonical artifacts. Per-token raw events are also
//! emitted, gated on `ocr_write_raw`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::domain::{Segment, VisualEventType};
use crate::persistence::NewVisualEvent;
use crate::worker::{Analyser, AnalyserNeeds, Artifact, WorkerContext};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Headline,
    Ticker,
    Center,
    Full,
}

impl Region {
    pub fn as_str(self) -> &'static str {
        match self {
            Region::Headline => "headline",
            Region::Ticker => "ticker",
            Region::Center => "center",
            Region::Full => "full",
        }
    }

    pub fn all() -> [Region; 4] {
        [Region::Headline, Region::Ticker, Region::Center, Region::Full]
    }
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub binary: String,
    pub sample_fps: f64,
    pub write_raw_tokens: bool,
    pub text_sim_threshold: f64,
    pub iou_threshold: f64,
    pub merge_window_s: f64,
    pub screenshot_root: PathBuf,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            binary: "mobasher-ocr".to_string(),
            sample_fps: 3.0,
            write_raw_tokens: false,
            text_sim_threshold: 0.82,
            iou_threshold: 0.3,
            merge_window_s: 2.0,
            screenshot_root: PathBuf::from("./data/screenshots"),
        }
    }
}

/// `[x, y, w, h]` in normalised frame coordinates.
pub type BBox = [f64; 4];

#[derive(Debug, Clone)]
pub struct OcrToken {
    pub text: String,
    pub bbox: BBox,
    pub confidence: f32,
    pub frame_timestamp_ms: i64,
    pub region: Region,
    pub screenshot_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawToken {
    text: String,
    bbox: BBox,
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct FrameOcrOutput {
    tokens: Vec<RawToken>,
}

pub struct OcrAnalyser {
    pub config: OcrConfig,
}

impl OcrAnalyser {
    pub fn new(config: OcrConfig) -> Self {
        Self { config }
    }

    async fn run_region(
        &self,
        video_path: &Path,
        frame_timestamp_ms: i64,
        region: Region,
        channel_id: &str,
    ) -> Result<Vec<OcrToken>> {
        let mut command = process_utils::tokio_command(&self.config.binary);
        command
            .arg("--input")
            .arg(video_path)
            .arg("--frame-ts-ms")
            .arg(frame_timestamp_ms.to_string())
            .arg("--region")
            .arg(region.as_str())
            // Preprocessing pipeline: greyscale, local contrast equalisation,
            // mild blur, Otsu threshold, invert -- delegated to the tool, the
            // flag below just asks it to apply the full chain.
            .arg("--preprocess")
            .arg("greyscale,clahe,blur,otsu,invert");

        let output = command
            .output()
            .await
            .map_err(|e| Error::ModelLoad(format!("failed to spawn OCR tool: {e}")))?;
        if !output.status.success() {
            return Err(Error::ModelLoad(format!(
                "OCR tool exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let parsed: FrameOcrOutput = serde_json::from_slice(&output.stdout)?;
        let screenshot_path = self
            .save_region_screenshot(video_path, frame_timestamp_ms, region, channel_id)
            .await
            .ok();

        Ok(parsed
            .tokens
            .into_iter()
            .map(|t| OcrToken {
                text: t.text,
                bbox: t.bbox,
                confidence: t.confidence,
                frame_timestamp_ms,
                region,
                screenshot_path: screenshot_path.clone(),
            })
            .collect())
    }

    async fn save_region_screenshot(
        &self,
        video_path: &Path,
        frame_timestamp_ms: i64,
        region: Region,
        channel_id: &str,
    ) -> Result<String> {
        let today = chrono::Utc::now().date_naive();
        let dir = crate::storage::screenshot_dir(&self.config.screenshot_root, channel_id, today);
        crate::utils::fs::ensure_dir_all(&dir).await?;
        let filename = format!(
            "{}-{frame_timestamp_ms}-{}.jpg",
            video_path.file_stem().and_then(|s| s.to_str()).unwrap_or("frame"),
            region.as_str()
        );
        let path = dir.join(&filename);

        let mut command = process_utils::tokio_command("ffmpeg");
        command
            .arg("-y")
            .arg("-ss")
            .arg(format!("{:.3}", frame_timestamp_ms as f64 / 1000.0))
            .arg("-i")
            .arg(video_path)
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

/// Aggregates one region-frame's raw per-token detections into the single
/// event that span merging requires as input: text sorted by
/// token position (top-to-bottom, then left-to-right), the union of all
/// token boxes, with the union's height replaced by the tallest individual
/// token's height ("max token height"). Returns `None` for an empty frame.
fn aggregate_frame_tokens(tokens: &[OcrToken]) -> Option<OcrToken> {
    let first = tokens.first()?;
    let mut ordered: Vec<&OcrToken> = tokens.iter().collect();
    ordered.sort_by(|a, b| {
        a.bbox[1]
            .partial_cmp(&b.bbox[1])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.bbox[0]
                    .partial_cmp(&b.bbox[0])
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    let text = ordered
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let mut bbox = ordered[0].bbox;
    let mut max_height = ordered[0].bbox[3];
    for tok in &ordered[1..] {
        bbox = bbox_union(bbox, tok.bbox);
        max_height = max_height.max(tok.bbox[3]);
    }
    bbox[3] = max_height;
    let confidence = ordered
        .iter()
        .map(|t| t.confidence)
        .fold(f32::MIN, f32::max);

    Some(OcrToken {
        text,
        bbox,
        confidence,
        frame_timestamp_ms: first.frame_timestamp_ms,
        region: first.region,
        screenshot_path: first.screenshot_path.clone(),
    })
}

fn bbox_iou(a: BBox, b: BBox) -> f64 {
    let (ax0, ay0, ax1, ay1) = (a[0], a[1], a[0] + a[2], a[1] + a[3]);
    let (bx0, by0, bx1, by1) = (b[0], b[1], b[0] + b[2], b[1] + b[3]);
    let ix0 = ax0.max(bx0);
    let iy0 = ay0.max(by0);
    let ix1 = ax1.min(bx1);
    let iy1 = ay1.min(by1);
    let iw = (ix1 - ix0).max(0.0);
    let ih = (iy1 - iy0).max(0.0);
    let intersection = iw * ih;
    let area_a = a[2] * a[3];
    let area_b = b[2] * b[3];
    let union = area_a + area_b - intersection;
    if union <= 0.0 { 0.0 } else { intersection / union }
}

fn bbox_union(a: BBox, b: BBox) -> BBox {
    let x0 = a[0].min(b[0]);
    let y0 = a[1].min(b[1]);
    let x1 = (a[0] + a[2]).max(b[0] + b[2]);
    let y1 = (a[1] + a[3]).max(b[1] + b[3]);
    [x0, y0, x1 - x0, y1 - y0]
}

/// Levenshtein-ratio-style similarity in `[0, 1]`; `1.0` for identical text.
fn text_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let max_len = a_chars.len().max(b_chars.len());
    if max_len == 0 {
        return 1.0;
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0usize; b_chars.len() + 1];
    for (i, ac) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, bc) in b_chars.iter().enumerate() {
            let cost = if ac == bc { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let distance = prev[b_chars.len()];
    1.0 - (distance as f64 / max_len as f64)
}

/// One merged OCR span, ready to become a canonical [`NewVisualEvent`].
#[derive(Debug, Clone)]
pub struct OcrSpan {
    pub region: Region,
    pub text: String,
    pub bbox: BBox,
    pub confidence: f32,
    pub start_ms: i64,
    pub end_ms: i64,
    pub screenshot_path: Option<String>,
}

/// Merges token-level events into spans per region: same region, walked
/// in time order; extend the
/// current span while text similarity, bbox IoU, and the time gap all clear
/// their thresholds, otherwise close it and start a new one.
pub fn merge_into_spans(
    mut events: Vec<OcrToken>,
    text_sim_threshold: f64,
    iou_threshold: f64,
    merge_window_s: f64,
) -> Vec<OcrSpan> {
    events.sort_by_key(|e| (e.region as u8 as i64, e.frame_timestamp_ms));

    let mut spans: Vec<OcrSpan> = Vec::new();
    let mut current: Option<OcrSpan> = None;

    for event in events {
        if let Some(span) = current.as_mut() {
            if span.region == event.region {
                let gap_s = (event.frame_timestamp_ms - span.end_ms) as f64 / 1000.0;
                let sim = text_similarity(&span.text, &event.text);
                let iou = bbox_iou(span.bbox, event.bbox);
                if sim >= text_sim_threshold && iou >= iou_threshold && gap_s <= merge_window_s {
                    span.end_ms = event.frame_timestamp_ms;
                    span.bbox = bbox_union(span.bbox, event.bbox);
                    span.confidence = span.confidence.max(event.confidence);
                    continue;
                }
            }
            spans.push(current.take().unwrap());
        }
        current = Some(OcrSpan {
            region: event.region,
            text: event.text,
            bbox: event.bbox,
            confidence: event.confidence,
            start_ms: event.frame_timestamp_ms,
            end_ms: event.frame_timestamp_ms,
            screenshot_path: event.screenshot_path,
        });
    }
    if let Some(span) = current {
        spans.push(span);
    }
    spans
}

#[async_trait]
impl Analyser for OcrAnalyser {
    fn name(&self) -> &'static str {
        "vision_ocr"
    }

    fn needs(&self) -> AnalyserNeeds {
        AnalyserNeeds {
            audio: false,
            video: true,
        }
    }

    async fn run(&self, ctx: &WorkerContext, segment: &Segment) -> Result<Vec<Artifact>> {
        let duration_ms = (segment.ended_at - segment.started_at).num_milliseconds().max(0);
        let frame_interval_ms = (1000.0 / self.config.sample_fps).round() as i64;

        let video_path = ctx.media_path.to_string_lossy().into_owned();
        let video_filename = ctx
            .media_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);

        // One raw event per token (only if
        // `ocr_write_raw`), and always one aggregated event per region-frame
        // feeding the span merge below -- only spans are canonical.
        let mut raw_artifacts = Vec::new();
        let mut aggregated = Vec::new();

        let mut t = 0i64;
        while t < duration_ms {
            for region in Region::all() {
                let tokens = self
                    .run_region(&ctx.media_path, t, region, &ctx.channel_id)
                    .await?;
                if tokens.is_empty() {
                    continue;
                }
                if self.config.write_raw_tokens {
                    raw_artifacts.extend(tokens.iter().map(|tok| {
                        Artifact::VisualEvent(NewVisualEvent {
                            segment_id: segment.id,
                            segment_started_at: segment.started_at,
                            channel_id: ctx.channel_id.clone(),
                            timestamp_offset: tok.frame_timestamp_ms as f64 / 1000.0,
                            event_type: VisualEventType::Ocr,
                            bbox: Some(tok.bbox.to_vec()),
                            confidence: Some(tok.confidence),
                            data: json!({ "text": tok.text, "kind": "token" }),
                            region: Some(tok.region.as_str().to_string()),
                            video_path: Some(video_path.clone()),
                            video_filename: video_filename.clone(),
                            screenshot_path: tok.screenshot_path.clone(),
                            frame_timestamp_ms: Some(tok.frame_timestamp_ms),
                        })
                    }));
                }
                if let Some(agg) = aggregate_frame_tokens(&tokens) {
                    aggregated.push(agg);
                }
            }
            t += frame_interval_ms.max(1);
        }

        let spans = merge_into_spans(
            aggregated,
            self.config.text_sim_threshold,
            self.config.iou_threshold,
            self.config.merge_window_s,
        );

        let mut artifacts = raw_artifacts;
        artifacts.extend(spans.into_iter().map(|span| {
            Artifact::VisualEvent(NewVisualEvent {
                segment_id: segment.id,
                segment_started_at: segment.started_at,
                channel_id: ctx.channel_id.clone(),
                timestamp_offset: span.start_ms as f64 / 1000.0,
                event_type: VisualEventType::Ocr,
                bbox: Some(span.bbox.to_vec()),
                confidence: Some(span.confidence),
                data: json!({ "text": span.text, "end_ms": span.end_ms, "kind": "span" }),
                region: Some(span.region.as_str().to_string()),
                video_path: Some(video_path.clone()),
                video_filename: video_filename.clone(),
                screenshot_path: span.screenshot_path,
                frame_timestamp_ms: Some(span.start_ms),
            })
        }));
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(text: &str, bbox: BBox, ts_ms: i64, region: Region) -> OcrToken {
        OcrToken {
            text: text.to_string(),
            bbox,
            confidence: 0.9,
            frame_timestamp_ms: ts_ms,
            region,
            screenshot_path: None,
        }
    }

    #[test]
    fn identical_text_merges_into_one_span() {
        let events = vec![
            token("breaking news", [0.1, 0.8, 0.3, 0.05], 0, Region::Headline),
            token("breaking news", [0.1, 0.8, 0.3, 0.05], 300, Region::Headline),
            token("breaking news", [0.1, 0.8, 0.3, 0.05], 600, Region::Headline),
        ];
        let spans = merge_into_spans(events, 0.8, 0.3, 2.0);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start_ms, 0);
        assert_eq!(spans[0].end_ms, 600);
    }

    #[test]
    fn text_change_beyond_similarity_threshold_starts_new_span() {
        let events = vec![
            token("breaking news", [0.1, 0.8, 0.3, 0.05], 0, Region::Headline),
            token("completely different words here", [0.1, 0.8, 0.3, 0.05], 300, Region::Headline),
        ];
        let spans = merge_into_spans(events, 0.8, 0.3, 2.0);
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn gap_beyond_merge_window_starts_new_span() {
        let events = vec![
            token("breaking news", [0.1, 0.8, 0.3, 0.05], 0, Region::Headline),
            token("breaking news", [0.1, 0.8, 0.3, 0.05], 5000, Region::Headline),
        ];
        let spans = merge_into_spans(events, 0.8, 0.3, 2.0);
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn different_regions_never_merge() {
        let events = vec![
            token("breaking news", [0.1, 0.8, 0.3, 0.05], 0, Region::Headline),
            token("breaking news", [0.1, 0.8, 0.3, 0.05], 100, Region::Ticker),
        ];
        let spans = merge_into_spans(events, 0.8, 0.3, 2.0);
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn iou_zero_for_disjoint_boxes() {
        let a = [0.0, 0.0, 0.1, 0.1];
        let b = [0.5, 0.5, 0.1, 0.1];
        assert_eq!(bbox_iou(a, b), 0.0);
    }

    #[test]
    fn iou_one_for_identical_boxes() {
        let a = [0.1, 0.1, 0.2, 0.2];
        assert_eq!(bbox_iou(a, a), 1.0);
    }

    #[test]
    fn similarity_is_one_for_identical_text() {
        assert_eq!(text_similarity("hello", "hello"), 1.0);
    }

    #[test]
    fn similarity_drops_with_edits() {
        let sim = text_similarity("breaking news now", "breaking news later");
        assert!(sim > 0.5 && sim < 1.0);
    }

    #[test]
    fn aggregate_frame_tokens_sorts_by_position_and_unions_bbox() {
        let tokens = vec![
            token("world", [0.1, 0.9, 0.2, 0.03], 0, Region::Ticker),
            token("hello", [0.1, 0.8, 0.2, 0.03], 0, Region::Ticker),
        ];
        let agg = aggregate_frame_tokens(&tokens).unwrap();
        assert_eq!(agg.text, "hello world", "sorted top-to-bottom by bbox y");
        assert_eq!(agg.bbox[0], 0.1);
        assert_eq!(agg.bbox[1], 0.8, "union box starts at the topmost token");
        assert_eq!(agg.bbox[2], 0.2, "union box width spans both tokens");
    }

    #[test]
    fn aggregate_frame_tokens_height_is_max_not_union() {
        let tokens = vec![
            token("hello", [0.1, 0.8, 0.2, 0.03], 0, Region::Ticker),
            token("world", [0.1, 0.9, 0.2, 0.03], 0, Region::Ticker),
        ];
        let agg = aggregate_frame_tokens(&tokens).unwrap();
        // union spans y in [0.8, 0.93] -> union height 0.13, but spec calls
        // for the max individual token height (0.03), not the union's.
        assert_eq!(agg.bbox[3], 0.03);
    }

    #[test]
    fn aggregate_frame_tokens_empty_is_none() {
        assert!(aggregate_frame_tokens(&[]).is_none());
    }

    #[test]
    fn aggregate_frame_tokens_single_token_passthrough() {
        let tokens = vec![token("breaking", [0.1, 0.1, 0.2, 0.04], 120, Region::Headline)];
        let agg = aggregate_frame_tokens(&tokens).unwrap();
        assert_eq!(agg.text, "breaking");
        assert_eq!(agg.bbox, [0.1, 0.1, 0.2, 0.04]);
        assert_eq!(agg.frame_timestamp_ms, 120);
    }
}
