//! Segment detector: scans today's audio/video output directories,
//! rejects partial files, and upserts canonical segment records.
//!
//! Invoked from the capture supervisor's heartbeat-driven detection pass
//! (`capture::supervisor::run_detection_pass`): a plain `read_dir` walk with
//! size/duration gates, no inotify dependency for the gate itself.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::domain::{SegmentStatus, derive_segment_id};
use crate::persistence::{SegmentRepository, UpsertSegment};
use crate::storage::{self, Leg};
use crate::{Error, Result};

/// A file that passed the full-segment gate, ready to be upserted.
#[derive(Debug, Clone)]
pub struct DetectedSegment {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub path: PathBuf,
    pub media_kind: MediaKind,
    pub file_size_bytes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Full-segment gate. `probed_duration_secs` is only consulted
/// for video files "when in doubt" (i.e. once the cheap size check passes);
/// callers that cannot probe duration may pass `None` and rely on size alone.
pub fn passes_full_segment_gate(
    media_kind: MediaKind,
    ext: &str,
    size_bytes: u64,
    segment_seconds: u32,
    audio_sample_rate: u32,
    audio_channels: u32,
    probed_duration_secs: Option<f64>,
) -> bool {
    match media_kind {
        MediaKind::Audio => {
            let threshold = (0.85_f64
                * audio_sample_rate as f64
                * audio_channels as f64
                * 2.0
                * segment_seconds as f64) as u64;
            size_bytes >= threshold
        }
        MediaKind::Video => {
            if ext == "mp4" || ext == "mkv" {
                if size_bytes >= 500_000 {
                    return true;
                }
                if let Some(duration) = probed_duration_secs {
                    return duration >= 0.92 * segment_seconds as f64;
                }
                false
            } else {
                size_bytes >= 100_000
            }
        }
    }
}

/// Probes a media file's duration via `ffprobe`. Used only for the "when in
/// doubt" branch of the gate and by partials cleanup; failures are treated as
/// "unknown duration", never as a hard error, since the gate already passed
/// or failed on size alone in the common case.
pub async fn probe_duration_secs(path: &Path) -> Option<f64> {
    let output = process_utils::tokio_command("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}

/// Scans one leg's directory for today's files and returns those that pass
/// the gate. Does not touch the database or the filesystem beyond reading
/// metadata.
pub async fn scan_leg(
    data_root: &Path,
    channel_id: &str,
    leg: Leg,
    media_kind: MediaKind,
    ext: &str,
    segment_seconds: u32,
    audio_sample_rate: u32,
    audio_channels: u32,
) -> Result<Vec<DetectedSegment>> {
    let dir = storage::leg_dir(data_root, channel_id, leg, Utc::now().date_naive());
    let mut out = Vec::new();

    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(Error::io_path("reading directory", &dir, e)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io_path("reading directory entry", &dir, e))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let started_at = match storage::parse_started_at(filename) {
            Ok(t) => t,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping file with unparseable name");
                continue;
            }
        };

        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to stat candidate segment file");
                continue;
            }
        };
        let size_bytes = metadata.len();

        // Never admit the file the transcoder is actively writing right now:
        // a closed segment always has a start time strictly before the
        // current processing window.
        let ended_at = started_at + chrono::Duration::seconds(segment_seconds as i64);
        if ended_at > Utc::now() {
            continue;
        }

        let probed = if media_kind == MediaKind::Video && size_bytes < 500_000 {
            probe_duration_secs(&path).await
        } else {
            None
        };

        if !passes_full_segment_gate(
            media_kind,
            ext,
            size_bytes,
            segment_seconds,
            audio_sample_rate,
            audio_channels,
            probed,
        ) {
            debug!(path = %path.display(), size_bytes, "file below full-segment gate, skipping");
            continue;
        }

        out.push(DetectedSegment {
            id: derive_segment_id(channel_id, started_at),
            started_at,
            ended_at,
            path,
            media_kind,
            file_size_bytes: size_bytes as i64,
        });
    }

    Ok(out)
}

/// Runs one detection pass for a channel: scans both legs (whichever are
/// enabled) and upserts a segment row per detected file, merging audio/video
/// paths for files sharing the same derived id: re-running the detector
/// over the same files produces no new rows.
pub async fn detect_and_persist(
    channel: &ChannelConfig,
    data_root: &Path,
    recording_id: Uuid,
    recording_started_at: DateTime<Utc>,
    segments: &dyn SegmentRepository,
) -> Result<usize> {
    let _ = recording_started_at;
    let mut detected = Vec::new();

    if channel.recording.audio_enabled {
        detected.extend(
            scan_leg(
                data_root,
                &channel.id,
                Leg::Audio,
                MediaKind::Audio,
                "wav",
                channel.recording.segment_seconds,
                channel.audio.sample_rate,
                channel.audio.channels,
            )
            .await?,
        );
    }
    if channel.recording.video_enabled {
        detected.extend(
            scan_leg(
                data_root,
                &channel.id,
                Leg::Video,
                MediaKind::Video,
                "mp4",
                channel.recording.segment_seconds,
                channel.audio.sample_rate,
                channel.audio.channels,
            )
            .await?,
        );
    }

    let mut persisted = 0;
    for seg in detected {
        let (audio_path, video_path) = match seg.media_kind {
            MediaKind::Audio => (Some(seg.path.to_string_lossy().into_owned()), None),
            MediaKind::Video => (None, Some(seg.path.to_string_lossy().into_owned())),
        };
        segments
            .upsert_segment(UpsertSegment {
                id: seg.id,
                started_at: seg.started_at,
                recording_id,
                channel_id: channel.id.clone(),
                ended_at: seg.ended_at,
                audio_path,
                video_path,
                file_size_bytes: Some(seg.file_size_bytes),
                status: SegmentStatus::Created,
            })
            .await?;
        persisted += 1;
    }

    Ok(persisted)
}

/// Partials cleanup : deletes any file in a leg's directory whose
/// probed duration falls below the gate. Run once on supervisor stop.
pub async fn cleanup_partials(
    data_root: &Path,
    channel_id: &str,
    leg: Leg,
    ext: &str,
    segment_seconds: u32,
    audio_sample_rate: u32,
    audio_channels: u32,
    media_kind: MediaKind,
) -> Result<usize> {
    let dir = storage::leg_dir(data_root, channel_id, leg, Utc::now().date_naive());
    let mut removed = 0;

    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(Error::io_path("reading directory", &dir, e)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io_path("reading directory entry", &dir, e))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let size_bytes = metadata.len();
        let probed = probe_duration_secs(&path).await;
        if !passes_full_segment_gate(
            media_kind,
            ext,
            size_bytes,
            segment_seconds,
            audio_sample_rate,
            audio_channels,
            probed,
        ) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove partial file");
            } else {
                removed += 1;
            }
        }
    }

    Ok(removed)
}

/// Extras cleanup (a test aid): if more than one
/// valid segment exists for the same media type in the current run window,
/// keeps only the earliest and removes the rest. Run alongside partials
/// cleanup on every supervisor exit path.
pub async fn cleanup_extras(
    data_root: &Path,
    channel_id: &str,
    leg: Leg,
    media_kind: MediaKind,
    ext: &str,
    segment_seconds: u32,
    audio_sample_rate: u32,
    audio_channels: u32,
) -> Result<usize> {
    let mut detected = scan_leg(
        data_root,
        channel_id,
        leg,
        media_kind,
        ext,
        segment_seconds,
        audio_sample_rate,
        audio_channels,
    )
    .await?;
    if detected.len() <= 1 {
        return Ok(0);
    }
    detected.sort_by_key(|d| d.started_at);

    let mut removed = 0;
    for extra in &detected[1..] {
        if let Err(e) = tokio::fs::remove_file(&extra.path).await {
            warn!(path = %extra.path.display(), error = %e, "failed to remove extra segment file");
        } else {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_gate_uses_085_factor() {
        // 16kHz, mono, 60s => 0.85 * 16000 * 1 * 2 * 60 = 1_632_000 bytes.
        assert!(!passes_full_segment_gate(
            MediaKind::Audio,
            "wav",
            1_631_999,
            60,
            16_000,
            1,
            None
        ));
        assert!(passes_full_segment_gate(
            MediaKind::Audio,
            "wav",
            1_632_000,
            60,
            16_000,
            1,
            None
        ));
    }

    #[test]
    fn video_gate_accepts_on_size_alone_above_500kb() {
        assert!(passes_full_segment_gate(
            MediaKind::Video,
            "mp4",
            500_000,
            60,
            16_000,
            1,
            None
        ));
    }

    #[test]
    fn video_gate_falls_back_to_duration_below_500kb() {
        assert!(!passes_full_segment_gate(
            MediaKind::Video,
            "mp4",
            400_000,
            60,
            16_000,
            1,
            Some(10.0)
        ));
        assert!(passes_full_segment_gate(
            MediaKind::Video,
            "mp4",
            400_000,
            60,
            16_000,
            1,
            Some(55.3)
        ));
    }

    #[test]
    fn other_extensions_use_flat_100kb_threshold() {
        assert!(!passes_full_segment_gate(
            MediaKind::Video,
            "ts",
            99_999,
            60,
            16_000,
            1,
            None
        ));
        assert!(passes_full_segment_gate(
            MediaKind::Video,
            "ts",
            100_000,
            60,
            16_000,
            1,
            None
        ));
    }
}
