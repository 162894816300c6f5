//! Retention and fresh-reset.
//!
//! Two independent concerns share this module because both are destructive
//! by nature and both funnel through the same confirmation gate
//! ([`Error::RetentionSafety`]): age-based pruning of derived tables plus the
//! screenshot tree (`db retention`), and the full "wipe it and start over"
//! sequence the operator reaches for after a bad deploy (`freshreset`). Both
//! follow a dry-run-first shape: report a count, only then act.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::capture::command::USER_AGENT_MARKER;
use crate::config::ProcessConfig;
use crate::runtime::Runtime;
use crate::{Error, Result};

/// One prunable `(table, time column)` pair. `segment_embeddings` and
/// `transcripts` share a cutoff derived from the same column name by
/// convention across both tables.
const PRUNEABLE_TABLES: &[(&str, &str)] = &[
    ("transcripts", "segment_started_at"),
    ("segment_embeddings", "segment_started_at"),
    ("entities", "started_at"),
    ("alerts", "created_at"),
];

/// Per-table row count, set by [`run_retention`]. In dry-run mode these are
/// counts of rows that *would* be deleted; otherwise rows actually deleted.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PruneReport {
    pub dry_run: bool,
    pub cutoff: DateTime<Utc>,
    pub rows_by_table: Vec<(String, u64)>,
}

impl PruneReport {
    pub fn total(&self) -> u64 {
        self.rows_by_table.iter().map(|(_, n)| n).sum()
    }
}

/// Prunes every table in [`PRUNEABLE_TABLES`] older than `older_than_days`.
/// Table/column names are compiled-in constants, never interpolated from
/// caller input, so building the SQL string here carries no injection risk.
pub async fn run_retention(pool: &PgPool, older_than_days: i64, dry_run: bool) -> Result<PruneReport> {
    if older_than_days < 1 {
        return Err(Error::config("older_than_days must be at least 1"));
    }
    let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
    let mut rows_by_table = Vec::with_capacity(PRUNEABLE_TABLES.len());

    for (table, column) in PRUNEABLE_TABLES {
        let affected: u64 = if dry_run {
            let query = format!("SELECT count(*) FROM {table} WHERE {column} < $1");
            sqlx::query_scalar::<_, i64>(&query)
                .bind(cutoff)
                .fetch_one(pool)
                .await? as u64
        } else {
            let query = format!("DELETE FROM {table} WHERE {column} < $1");
            sqlx::query(&query).bind(cutoff).execute(pool).await?.rows_affected()
        };
        info!(table, column, affected, dry_run, "retention pass over table");
        rows_by_table.push(((*table).to_string(), affected));
    }

    Ok(PruneReport {
        dry_run,
        cutoff,
        rows_by_table,
    })
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ScreenshotCleanupReport {
    pub dry_run: bool,
    pub removed: u64,
    pub bytes_reclaimed: u64,
}

const SCREENSHOT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Walks `screenshot_root` recursively, removing image files whose mtime
/// predates `cutoff`. Non-image files and directories are left untouched;
/// empty directories are not pruned since a capture in progress may still
/// be writing into a sibling.
pub async fn cleanup_screenshots(
    screenshot_root: &Path,
    older_than_days: i64,
    dry_run: bool,
) -> Result<ScreenshotCleanupReport> {
    if older_than_days < 1 {
        return Err(Error::config("older_than_days must be at least 1"));
    }
    let cutoff = std::time::SystemTime::now() - std::time::Duration::from_secs(older_than_days as u64 * 86_400);
    let mut report = ScreenshotCleanupReport {
        dry_run,
        ..Default::default()
    };
    walk_and_clean(screenshot_root, cutoff, dry_run, &mut report).await?;
    Ok(report)
}

fn walk_and_clean<'a>(
    dir: &'a Path,
    cutoff: std::time::SystemTime,
    dry_run: bool,
    report: &'a mut ScreenshotCleanupReport,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io_path("reading", dir, e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(|e| Error::io_path("reading", dir, e))? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(|e| Error::io_path("stat", &path, e))?;

            if file_type.is_dir() {
                walk_and_clean(&path, cutoff, dry_run, report).await?;
                continue;
            }

            let is_screenshot = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| SCREENSHOT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !is_screenshot {
                continue;
            }

            let metadata = entry.metadata().await.map_err(|e| Error::io_path("stat", &path, e))?;
            let modified = metadata.modified().map_err(|e| Error::io_path("stat", &path, e))?;
            if modified >= cutoff {
                continue;
            }

            report.removed += 1;
            report.bytes_reclaimed += metadata.len();
            if !dry_run {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| Error::io_path("removing", &path, e))?;
            }
        }
        Ok(())
    })
}

/// Which worker binaries each expose a `/metrics` endpoint on their own
/// configured port, released as part of a fresh reset.
const METRICS_PORT_WORKERS: &[&str] = &["asr", "vision_ocr", "vision_objects", "vision_faces", "nlp", "api"];

/// Confirms every configured metrics port is free by attempting a transient
/// bind. A port still held after the process-kill step above means something
/// other than this process owns it; that is reported, never force-killed by
/// port number alone since a PID isn't recoverable from a bind failure.
async fn verify_metrics_ports_released(config: &ProcessConfig) -> Vec<u16> {
    let mut still_bound = Vec::new();
    for worker in METRICS_PORT_WORKERS {
        let Some(port) = config.metrics_port(worker) else {
            continue;
        };
        match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => drop(listener),
            Err(_) => still_bound.push(port),
        }
    }
    still_bound
}

/// Kills every OS process whose command line contains `marker`, via
/// `sysinfo`'s process table rather than `/proc` directly so this works the
/// same on every platform the transcoder binary could run on. Used by both
/// `freshreset` (transcoder children only) and `kill-the-minions` (same
/// marker, a narrower name the operator reaches for mid-incident).
pub fn kill_processes_matching(marker: &str) -> usize {
    let mut system = sysinfo::System::new_all();
    system.refresh_all();

    let mut killed = 0usize;
    for (pid, process) in system.processes() {
        let matches = process
            .cmd()
            .iter()
            .any(|arg| arg.to_string_lossy().contains(marker));
        if !matches {
            continue;
        }
        if process.kill() {
            killed += 1;
            info!(pid = pid.as_u32(), marker, "killed lingering process");
        } else {
            warn!(pid = pid.as_u32(), marker, "failed to kill lingering process");
        }
    }
    killed
}

/// What a fresh reset should also wipe beyond the derived tables, per spec
/// its "fresh reset sequence".
#[derive(Debug, Clone, Copy, Default)]
pub struct FreshResetScope {
    pub include_channels: bool,
    pub today_only: bool,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FreshResetReport {
    pub supervisors_stopped: usize,
    pub processes_killed: usize,
    pub metrics_ports_still_bound: Vec<u16>,
    pub rows_truncated: Vec<(String, u64)>,
    pub directories_wiped: usize,
}

const TRUNCATE_TABLES: &[&str] = &[
    "alerts",
    "entities",
    "visual_events",
    "segment_embeddings",
    "transcripts",
    "segments",
    "recordings",
    "system_metrics",
];

/// The full fresh-reset sequence: stop supervisors and queue consumption,
/// kill lingering transcoder children, verify metrics ports are free,
/// truncate every derived table (and `channels` if asked), then wipe
/// per-date data directories (today's only if asked). Refuses outright
/// without `confirmed`, mapped by the CLI to exit code 2.
pub async fn fresh_reset(runtime: &Runtime, scope: FreshResetScope, confirmed: bool) -> Result<FreshResetReport> {
    if !confirmed {
        return Err(Error::RetentionSafety(
            "fresh reset requires explicit confirmation".to_string(),
        ));
    }

    let mut report = FreshResetReport::default();

    let channel_ids: Vec<String> = runtime.supervisors.iter().map(|e| e.key().clone()).collect();
    for channel_id in channel_ids {
        if let Some((_, handle)) = runtime.supervisors.remove(&channel_id) {
            if let Err(e) = handle.stop().await {
                warn!(channel_id, error = %e, "supervisor stop returned an error during fresh reset");
            }
            report.supervisors_stopped += 1;
        }
    }
    runtime.shutdown.cancel();

    report.processes_killed = kill_processes_matching(USER_AGENT_MARKER);
    report.metrics_ports_still_bound = verify_metrics_ports_released(&runtime.config).await;

    let mut tables: Vec<&str> = TRUNCATE_TABLES.to_vec();
    if scope.include_channels {
        tables.push("channels");
    }
    for table in tables {
        let rows = sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&runtime.pool)
            .await?
            .rows_affected();
        report.rows_truncated.push((table.to_string(), rows));
    }

    report.directories_wiped = wipe_data_directories(&runtime.data_root, scope.today_only).await?;
    report.directories_wiped += wipe_data_directories(&runtime.screenshot_root, scope.today_only).await?;

    Ok(report)
}

/// Removes per-date subdirectories under each leg tree (`audio/<date>`,
/// `video/<date>`, `archive/<channel>/<date>`, `screenshots/<channel>/<date>`)
/// -- or just today's if `today_only`. Leaves the leg root itself so a running
/// supervisor restarted right after can still create today's directory.
async fn wipe_data_directories(root: &Path, today_only: bool) -> Result<usize> {
    let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
    let mut removed = 0usize;
    removed += wipe_date_dirs_recursive(root, &today, today_only).await?;
    Ok(removed)
}

fn wipe_date_dirs_recursive<'a>(
    dir: &'a Path,
    today: &'a str,
    today_only: bool,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<usize>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::io_path("reading", dir, e)),
        };

        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await.map_err(|e| Error::io_path("reading", dir, e))? {
            let path = entry.path();
            if !entry.file_type().await.map_err(|e| Error::io_path("stat", &path, e))?.is_dir() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let is_date_dir = name.len() == 10 && name.chars().filter(|c| *c == '-').count() == 2;

            if is_date_dir {
                if today_only && name != today {
                    continue;
                }
                tokio::fs::remove_dir_all(&path)
                    .await
                    .map_err(|e| Error::io_path("removing", &path, e))?;
                removed += 1;
            } else {
                // Not a date directory itself; recurse in case it is a
                // channel-name directory above the date level (archive/screenshots layout).
                removed += wipe_date_dirs_recursive(&path, today, today_only).await?;
            }
        }
        Ok(removed)
    })
}

/// Kills only lingering transcoder children, without touching the database
/// or directories. A lighter-weight sibling of `freshreset` for "something
/// is stuck, just kill the ffmpeg processes".
pub fn kill_the_minions() -> usize {
    kill_processes_matching(USER_AGENT_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_report_totals_every_table() {
        let report = PruneReport {
            dry_run: true,
            cutoff: Utc::now(),
            rows_by_table: vec![("transcripts".to_string(), 3), ("alerts".to_string(), 2)],
        };
        assert_eq!(report.total(), 5);
    }

    #[test]
    fn pruneable_tables_match_spec_list() {
        let names: Vec<&str> = PRUNEABLE_TABLES.iter().map(|(t, _)| *t).collect();
        assert_eq!(names, vec!["transcripts", "segment_embeddings", "entities", "alerts"]);
    }
}
