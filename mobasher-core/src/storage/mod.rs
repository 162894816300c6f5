//! Storage layout : path computation and start-only filename
//! construction/parsing for the three capture legs.
//!
//! Layout, given `(data_root, channel_id, date)`:
//!
//! ```text
//! <data_root>/audio/<YYYY-MM-DD>/<channel>-YYYYMMDD-HHMMSS.wav
//! <data_root>/video/<YYYY-MM-DD>/<channel>-YYYYMMDD-HHMMSS.mp4
//! <data_root>/archive/<channel>/<YYYY-MM-DD>/<channel>-YYYY-MM-DD-HHMMSS.mp4
//! <data_root>/archive/<channel>/<YYYY-MM-DD>/<channel>-YYYY-MM-DD-HHMMSS-thumb.jpg
//! <data_root>/screenshots/<frame-name>.jpg
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::utils::fs;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Audio,
    Video,
    Archive,
}

impl Leg {
    fn dirname(self) -> &'static str {
        match self {
            Leg::Audio => "audio",
            Leg::Video => "video",
            Leg::Archive => "archive",
        }
    }
}

/// Computes the directory a leg writes into for a given date, without
/// creating it.
pub fn leg_dir(data_root: &Path, channel_id: &str, leg: Leg, date: NaiveDate) -> PathBuf {
    let date_str = date.format("%Y-%m-%d").to_string();
    match leg {
        Leg::Audio | Leg::Video => data_root.join(leg.dirname()).join(date_str),
        Leg::Archive => data_root
            .join(leg.dirname())
            .join(channel_id)
            .join(date_str),
    }
}

/// Computes and creates the three trees for `today`. Called once per
/// heartbeat by the capture supervisor before spawning/checking children.
pub async fn ensure_leg_dirs(
    data_root: &Path,
    channel_id: &str,
    today: NaiveDate,
) -> Result<(PathBuf, PathBuf, PathBuf)> {
    let audio = leg_dir(data_root, channel_id, Leg::Audio, today);
    let video = leg_dir(data_root, channel_id, Leg::Video, today);
    let archive = leg_dir(data_root, channel_id, Leg::Archive, today);
    fs::ensure_dir_all(&audio).await?;
    fs::ensure_dir_all(&video).await?;
    fs::ensure_dir_all(&archive).await?;
    Ok((audio, video, archive))
}

pub fn screenshot_dir(screenshot_root: &Path, channel_id: &str, date: NaiveDate) -> PathBuf {
    screenshot_root.join(channel_id).join(date.format("%Y-%m-%d").to_string())
}

/// Builds a start-only processing segment filename: `<channel>-YYYYMMDD-HHMMSS.<ext>`.
pub fn segment_filename(channel_id: &str, started_at: DateTime<Utc>, ext: &str) -> String {
    format!(
        "{channel_id}-{}.{ext}",
        started_at.format("%Y%m%d-%H%M%S")
    )
}

/// Builds an archive filename: `<channel>-YYYY-MM-DD-HHMMSS.<ext>`.
pub fn archive_filename(channel_id: &str, started_at: DateTime<Utc>, ext: &str) -> String {
    format!(
        "{channel_id}-{}.{ext}",
        started_at.format("%Y-%m-%d-%H%M%S")
    )
}

/// Builds the thumbnail path sitting next to an archive mp4: `<stem>-thumb.<ext>`.
pub fn thumbnail_path(archive_path: &Path, ext: &str) -> PathBuf {
    let stem = archive_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("archive");
    archive_path.with_file_name(format!("{stem}-thumb.{ext}"))
}

/// Parses the start timestamp out of a segment/archive filename produced by
/// [`segment_filename`]/[`archive_filename`]: split on `-`, take the last two
/// tokens as `YYYYMMDD` and `HHMMSS` (or `YYYY`, `MM`, `DD`, `HHMMSS` for the
/// archive form — both reduce to the same last-two-numeric-tokens rule once
/// the extension is stripped), the instant is UTC.
pub fn parse_started_at(filename: &str) -> Result<DateTime<Utc>> {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);

    let tokens: Vec<&str> = stem.split('-').collect();
    if tokens.len() < 2 {
        return Err(Error::config(format!(
            "cannot parse start timestamp from filename `{filename}`"
        )));
    }
    let time_tok = tokens[tokens.len() - 1];
    let date_tok = tokens[tokens.len() - 2];

    // Start-only segment form: two tokens, `YYYYMMDD` (8 digits) + `HHMMSS`.
    if date_tok.len() == 8 && date_tok.chars().all(|c| c.is_ascii_digit()) {
        return parse_compact(date_tok, time_tok, filename);
    }

    // Archive form: `...-YYYY-MM-DD-HHMMSS`, so the date token is just `DD`;
    // reconstruct the full date from the three tokens preceding the time.
    if tokens.len() >= 4 {
        let day = tokens[tokens.len() - 2];
        let month = tokens[tokens.len() - 3];
        let year = tokens[tokens.len() - 4];
        if year.len() == 4 && day.len() == 2 && month.len() == 2 {
            let compact = format!("{year}{month}{day}");
            return parse_compact(&compact, time_tok, filename);
        }
    }

    Err(Error::config(format!(
        "cannot parse start timestamp from filename `{filename}`"
    )))
}

fn parse_compact(date_tok: &str, time_tok: &str, filename: &str) -> Result<DateTime<Utc>> {
    let naive_date = NaiveDate::parse_from_str(date_tok, "%Y%m%d")
        .map_err(|e| Error::config(format!("bad date in filename `{filename}`: {e}")))?;
    if time_tok.len() != 6 || !time_tok.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::config(format!(
            "bad time token in filename `{filename}`"
        )));
    }
    let hour: u32 = time_tok[0..2].parse().unwrap_or(0);
    let minute: u32 = time_tok[2..4].parse().unwrap_or(0);
    let second: u32 = time_tok[4..6].parse().unwrap_or(0);
    let naive_time = naive_date
        .and_hms_opt(hour, minute, second)
        .ok_or_else(|| Error::config(format!("invalid time of day in `{filename}`")))?;
    Ok(Utc.from_utc_datetime(&naive_time))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn segment_filename_round_trips() {
        let started = t("2026-03-05T14:30:05Z");
        let name = segment_filename("bbc-news", started, "wav");
        assert_eq!(name, "bbc-news-20260305-143005.wav");
        let parsed = parse_started_at(&name).unwrap();
        assert_eq!(parsed, started);
    }

    #[test]
    fn archive_filename_round_trips() {
        let started = t("2026-03-05T14:30:05Z");
        let name = archive_filename("bbc-news", started, "mp4");
        assert_eq!(name, "bbc-news-2026-03-05-143005.mp4");
        let parsed = parse_started_at(&name).unwrap();
        assert_eq!(parsed, started);
    }

    #[test]
    fn thumbnail_sits_next_to_archive_file() {
        let path = PathBuf::from("/data/archive/bbc-news/2026-03-05/bbc-news-2026-03-05-143005.mp4");
        let thumb = thumbnail_path(&path, "jpg");
        assert_eq!(
            thumb,
            PathBuf::from("/data/archive/bbc-news/2026-03-05/bbc-news-2026-03-05-143005-thumb.jpg")
        );
    }

    #[test]
    fn leg_dir_is_date_partitioned_for_audio_and_video() {
        let root = Path::new("/data");
        let date = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        assert_eq!(
            leg_dir(root, "bbc-news", Leg::Audio, date),
            PathBuf::from("/data/audio/2026-03-05")
        );
        assert_eq!(
            leg_dir(root, "bbc-news", Leg::Archive, date),
            PathBuf::from("/data/archive/bbc-news/2026-03-05")
        );
    }

    #[test]
    fn rejects_unparseable_filename() {
        assert!(parse_started_at("not-a-segment").is_err());
    }

    #[test]
    fn channel_id_containing_dashes_still_parses() {
        let started = t("2026-03-05T00:00:00Z");
        let name = segment_filename("al-jazeera-en", started, "wav");
        let parsed = parse_started_at(&name).unwrap();
        assert_eq!(parsed, started);
    }
}
