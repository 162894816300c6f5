//! Child transcoder argument-vector construction.
//!
//! Builds an ordered `Vec<String>` up in stages, never a shell string. The
//! concrete tool is a contract, not a choice -- any binary honouring the
//! same flags would work; we target an ffmpeg-shaped CLI as the reference
//! transcoder.

use std::path::Path;

use crate::capture::supervisor::LegKind;
use crate::config::ChannelConfig;

pub const USER_AGENT_MARKER: &str = "mobasher-capture/1";

/// Builds the argument vector for one leg's child process.
///
/// `output_dir` must already exist. The output pattern uses `strftime`
/// substitution so the transcoder itself produces start-aligned filenames
/// matching [`crate::storage::segment_filename`] / [`crate::storage::archive_filename`].
pub fn build_args(leg: LegKind, channel: &ChannelConfig, output_dir: &Path) -> Vec<String> {
    let mut args = vec!["-y".to_string(), "-hide_banner".to_string(), "-loglevel".to_string(), "warning".to_string()];

    args.push("-user_agent".to_string());
    args.push(USER_AGENT_MARKER.to_string());

    if !channel.input.headers.is_empty() {
        let header_block = channel
            .input
            .headers
            .iter()
            .map(|(k, v)| format!("{k}: {v}\r\n"))
            .collect::<String>();
        args.push("-headers".to_string());
        args.push(header_block);
    }

    // Bounded reconnect: the transcoder's own reconnect handles brief
    // outages; the supervisor's restart budget handles sustained ones.
    args.push("-reconnect".to_string());
    args.push("1".to_string());
    args.push("-reconnect_streamed".to_string());
    args.push("1".to_string());
    args.push("-reconnect_delay_max".to_string());
    args.push("5".to_string());

    args.push("-i".to_string());
    args.push(channel.input.url.clone());

    match leg {
        LegKind::Audio => {
            args.push("-vn".to_string());
            args.push("-acodec".to_string());
            args.push("pcm_s16le".to_string());
            args.push("-ar".to_string());
            args.push(channel.audio.sample_rate.to_string());
            args.push("-ac".to_string());
            args.push(channel.audio.channels.to_string());
            args.extend(segment_output_args(
                channel.recording.segment_seconds,
                false,
            ));
            args.push(
                output_dir
                    .join(format!("{}-%Y%m%d-%H%M%S.wav", channel.id))
                    .to_string_lossy()
                    .into_owned(),
            );
        }
        LegKind::Video => {
            args.push("-an".to_string());
            if let Some(quality) = channel.video.qualities.get(&channel.recording.video_quality) {
                args.push("-s".to_string());
                args.push(quality.resolution.clone());
                args.push("-b:v".to_string());
                args.push(quality.bitrate.clone());
                args.push("-r".to_string());
                args.push(quality.fps.to_string());
            }
            args.push("-c:v".to_string());
            args.push(channel.video.encoder.clone());
            args.push("-preset".to_string());
            args.push(channel.video.preset.clone());
            if channel.video.threads > 0 {
                args.push("-threads".to_string());
                args.push(channel.video.threads.to_string());
            }
            args.extend(segment_output_args(
                channel.recording.segment_seconds,
                false,
            ));
            args.push(
                output_dir
                    .join(format!("{}-%Y%m%d-%H%M%S.mp4", channel.id))
                    .to_string_lossy()
                    .into_owned(),
            );
        }
        LegKind::Archive => {
            // Hour-aligned clock strategy: one file per wall-clock hour.
            args.push("-c".to_string());
            args.push("copy".to_string());
            args.extend(segment_output_args(3600, true));
            args.push(
                output_dir
                    .join(format!("{}-%Y-%m-%d-%H%M%S.mp4", channel.id))
                    .to_string_lossy()
                    .into_owned(),
            );
        }
    }

    args
}

fn segment_output_args(segment_time: u32, atclocktime: bool) -> Vec<String> {
    let mut args = vec![
        "-f".to_string(),
        "segment".to_string(),
        "-segment_time".to_string(),
        segment_time.to_string(),
        "-reset_timestamps".to_string(),
        "1".to_string(),
        "-strftime".to_string(),
        "1".to_string(),
    ];
    if atclocktime {
        args.push("-segment_atclocktime".to_string());
        args.push("1".to_string());
    }
    args
}

/// Builds the argument vector for a one-shot thumbnail extraction from a
/// closed archive file: a single frame one second in.
pub fn build_thumbnail_args(archive_path: &Path, thumb_path: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-ss".to_string(),
        "00:00:01".to_string(),
        "-i".to_string(),
        archive_path.to_string_lossy().into_owned(),
        "-vframes".to_string(),
        "1".to_string(),
        thumb_path.to_string_lossy().into_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::channel::{AudioConfig, InputConfig, RecordingConfig, StorageConfig, VideoConfig};

    fn minimal_channel() -> ChannelConfig {
        ChannelConfig {
            id: "bbc-news".into(),
            input: InputConfig {
                url: "https://example.test/stream.m3u8".into(),
                headers: Default::default(),
            },
            recording: RecordingConfig::default(),
            storage: StorageConfig::default(),
            audio: AudioConfig::default(),
            video: VideoConfig::default(),
        }
    }

    #[test]
    fn audio_leg_sets_pcm_codec_and_segment_pattern() {
        let channel = minimal_channel();
        let args = build_args(LegKind::Audio, &channel, Path::new("/data/audio/2026-03-05"));
        assert!(args.iter().any(|a| a == "pcm_s16le"));
        assert!(args.iter().any(|a| a.contains("bbc-news-%Y%m%d-%H%M%S.wav")));
        assert!(args.iter().any(|a| a == "60"));
    }

    #[test]
    fn archive_leg_uses_hour_aligned_clock_segmenting() {
        let channel = minimal_channel();
        let args = build_args(LegKind::Archive, &channel, Path::new("/data/archive/bbc-news/2026-03-05"));
        assert!(args.iter().any(|a| a == "3600"));
        assert!(args.iter().any(|a| a == "-segment_atclocktime"));
        assert!(args.iter().any(|a| a.contains("bbc-news-%Y-%m-%d-%H%M%S.mp4")));
    }

    #[test]
    fn headers_are_joined_with_crlf() {
        let mut channel = minimal_channel();
        channel
            .input
            .headers
            .insert("Referer".into(), "https://example.test".into());
        let args = build_args(LegKind::Audio, &channel, Path::new("/data/audio/2026-03-05"));
        let idx = args.iter().position(|a| a == "-headers").unwrap();
        assert!(args[idx + 1].contains("Referer: https://example.test\r\n"));
    }
}
