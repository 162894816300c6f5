//! Per-channel descriptor loader.
//!
//! Channels are described by one TOML file each under a `channels/` directory
//! (`<id>.toml`). Malformed or incomplete files raise [`Error::Config`] naming
//! the missing field and the file, never panicking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

fn default_segment_seconds() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_video_quality() -> String {
    "default".to_string()
}

fn default_audio_dir() -> String {
    "audio".to_string()
}

fn default_video_dir() -> String {
    "video".to_string()
}

fn default_archive_dir() -> String {
    "archive".to_string()
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_channels() -> u32 {
    1
}

fn default_encoder() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "veryfast".to_string()
}

fn default_threads() -> u32 {
    0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingConfig {
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,
    #[serde(default = "default_true")]
    pub audio_enabled: bool,
    #[serde(default = "default_false")]
    pub video_enabled: bool,
    #[serde(default = "default_video_quality")]
    pub video_quality: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            segment_seconds: default_segment_seconds(),
            audio_enabled: default_true(),
            video_enabled: default_false(),
            video_quality: default_video_quality(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageDirectories {
    #[serde(default = "default_audio_dir")]
    pub audio: String,
    #[serde(default = "default_video_dir")]
    pub video: String,
    #[serde(default = "default_archive_dir")]
    pub archive: String,
}

impl Default for StorageDirectories {
    fn default() -> Self {
        Self {
            audio: default_audio_dir(),
            video: default_video_dir(),
            archive: default_archive_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_true")]
    pub date_folders: bool,
    #[serde(default)]
    pub directories: StorageDirectories,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            date_folders: default_true(),
            directories: StorageDirectories::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
        }
    }
}

/// One `{resolution, bitrate, fps}` entry in `video.qualities`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoQuality {
    pub resolution: String,
    pub bitrate: String,
    pub fps: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoConfig {
    #[serde(default)]
    pub qualities: HashMap<String, VideoQuality>,
    #[serde(default = "default_encoder")]
    pub encoder: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_threads")]
    pub threads: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            qualities: HashMap::new(),
            encoder: default_encoder(),
            preset: default_preset(),
            threads: default_threads(),
        }
    }
}

/// A fully-parsed per-channel descriptor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    pub id: String,
    pub input: InputConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub video: VideoConfig,
}

impl ChannelConfig {
    fn validate(&self, source: &Path) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::config(format!(
                "{}: missing required field `id`",
                source.display()
            )));
        }
        if self.input.url.trim().is_empty() {
            return Err(Error::config(format!(
                "{}: missing required field `input.url`",
                source.display()
            )));
        }
        if self.recording.segment_seconds == 0 {
            return Err(Error::config(format!(
                "{}: recording.segment_seconds must be non-zero",
                source.display()
            )));
        }
        if self.recording.video_enabled
            && !self
                .video
                .qualities
                .contains_key(&self.recording.video_quality)
        {
            return Err(Error::config(format!(
                "{}: recording.video_quality `{}` has no matching entry under video.qualities",
                source.display(),
                self.recording.video_quality
            )));
        }
        Ok(())
    }

    /// Resolved absolute directory for a given leg ("audio"/"video"/"archive")
    /// under `data_root`, per the storage layout's directory conventions.
    pub fn leg_root(&self, data_root: &Path, leg: &str) -> PathBuf {
        let sub = match leg {
            "audio" => &self.storage.directories.audio,
            "video" => &self.storage.directories.video,
            "archive" => &self.storage.directories.archive,
            other => other,
        };
        data_root.join(sub)
    }
}

/// Parses a single channel descriptor file.
pub fn load_channel_file(path: &Path) -> Result<ChannelConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::io_path("reading", path, e))?;
    let cfg: ChannelConfig = toml::from_str(&raw)
        .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
    cfg.validate(path)?;
    Ok(cfg)
}

/// Loads every `*.toml` file directly under `channels_dir` into a map keyed
/// by channel id. A malformed file aborts the whole load with the offending
/// file named in the error, matching the fail-fast policy for `ConfigError`.
pub fn load_channel_configs(channels_dir: &Path) -> Result<HashMap<String, ChannelConfig>> {
    let mut out = HashMap::new();
    if !channels_dir.exists() {
        return Ok(out);
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(channels_dir)
        .map_err(|e| Error::io_path("reading", channels_dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
        .collect();
    entries.sort();

    for path in entries {
        let cfg = load_channel_file(&path)?;
        out.insert(cfg.id.clone(), cfg);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_toml(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_minimal_valid_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_toml(
            dir.path(),
            "bbc-news.toml",
            r#"
            id = "bbc-news"

            [input]
            url = "https://example.test/stream.m3u8"
            "#,
        );
        let cfg = load_channel_file(&path).unwrap();
        assert_eq!(cfg.id, "bbc-news");
        assert_eq!(cfg.recording.segment_seconds, 60);
        assert!(cfg.recording.audio_enabled);
        assert!(!cfg.recording.video_enabled);
    }

    #[test]
    fn rejects_missing_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_toml(dir.path(), "broken.toml", r#"id = "broken""#);
        let err = load_channel_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_video_quality_without_matching_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_toml(
            dir.path(),
            "video.toml",
            r#"
            id = "chan"

            [input]
            url = "https://example.test/stream.m3u8"

            [recording]
            video_enabled = true
            video_quality = "hd"
            "#,
        );
        let err = load_channel_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn loads_directory_of_channels() {
        let dir = tempfile::tempdir().unwrap();
        write_toml(
            dir.path(),
            "a.toml",
            "id = \"a\"\n[input]\nurl = \"https://a.test/x.m3u8\"\n",
        );
        write_toml(
            dir.path(),
            "b.toml",
            "id = \"b\"\n[input]\nurl = \"https://b.test/x.m3u8\"\n",
        );
        let configs = load_channel_configs(dir.path()).unwrap();
        assert_eq!(configs.len(), 2);
        assert!(configs.contains_key("a"));
        assert!(configs.contains_key("b"));
    }
}
