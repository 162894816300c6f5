//! Operator CLI: a single binary whose subcommands map one-to-one onto
//! the components described above. One `clap::Parser` root, a
//! `Subcommand` enum, a small `run` dispatcher per variant; most
//! subcommands build a [`Runtime`] and either run forever or perform one
//! bounded operation.
//!
//! Every subcommand that can refuse destructively (`db truncate`,
//! `freshreset`) exits with code 2 without `--confirm`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use crate::api::server::{self, ApiServerConfig};
use crate::capture::{CaptureSupervisor, SupervisorConfig};
use crate::config::ProcessConfig;
use crate::domain::PipelineStage;
use crate::queue::{task_names, TaskQueue};
use crate::retention;
use crate::runtime::Runtime;
use crate::scheduler::{self, SchedulerConfig};
use crate::worker::{
    asr::{AsrAnalyser, AsrConfig},
    nlp::{AlertsAnalyser, AlertsConfig, EntitiesAnalyser, EntitiesConfig},
    vision_faces::{FacesAnalyser, FacesConfig},
    vision_objects::{ObjectsAnalyser, ObjectsConfig},
    vision_ocr::{OcrAnalyser, OcrConfig},
    vision_screenshots::{ScreenshotsAnalyser, ScreenshotsConfig},
    Analyser, StageWorker, WorkerMetrics, WorkerRepositories,
};
use crate::{Error, Result};

/// Exit code for a destructive command refused without `--confirm`.
pub const EXIT_REFUSED: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "mobasher", author, version, about = "TV capture, segmentation, and analysis orchestration core", long_about = None)]
pub struct Cli {
    /// Directory holding one `<channel-id>.toml` file per channel .
    #[arg(long, global = true, env = "MOBASHER_CHANNELS_DIR", default_value = "./channels")]
    pub channels_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture supervisor for a channel's audio/video/archive legs.
    Recorder {
        #[command(subcommand)]
        action: RecorderAction,
    },
    /// Archive leg inspection (bundled into the same supervisor as `recorder`).
    Archive {
        #[command(subcommand)]
        action: ArchiveAction,
    },
    /// Database maintenance.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    /// All-in-one process group: every enabled channel's supervisor, every
    /// stage's scheduler, and the read API in one process.
    Services {
        #[command(subcommand)]
        action: ServicesAction,
    },
    /// Read API server .
    Api {
        #[command(subcommand)]
        action: ApiAction,
    },
    /// ASR stage.
    Asr {
        #[command(subcommand)]
        action: AsrAction,
    },
    /// Vision stages: OCR, objects, faces, and standalone screenshots.
    Vision {
        #[command(subcommand)]
        action: VisionAction,
    },
    /// NLP stage: entity and alert extraction over
    /// completed transcripts.
    Nlp {
        #[command(subcommand)]
        action: NlpAction,
    },
    /// Channel descriptor management.
    Channels {
        #[command(subcommand)]
        action: ChannelsAction,
    },
    /// One-shot summary: channel count, active supervisors, queue depth proxy.
    Status,
    /// Destructive full reset: stop everything, truncate derived tables, wipe
    /// data directories.
    Freshreset(ConfirmArgs),
    /// Kill lingering transcoder child processes by user-agent marker,
    /// without touching the database or disk.
    KillTheMinions,
}

#[derive(Args, Debug, Clone)]
pub struct ConfirmArgs {
    /// Must be passed explicitly; without it the command refuses (exit 2).
    #[arg(long)]
    pub confirm: bool,
    /// Also truncate the `channels` table / wipe only today's directories.
    #[arg(long)]
    pub include_channels: bool,
    #[arg(long)]
    pub today_only: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ChannelScope {
    /// Restrict to one channel id; omit to act on every loaded channel.
    #[arg(long)]
    pub channel: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum RecorderAction {
    /// Starts capture supervisors and blocks until Ctrl-C.
    Start(ChannelScope),
    /// Requests a clean stop of running supervisors (Ctrl-C the `start` process).
    Stop(ChannelScope),
    /// Prints current recording status per channel.
    Status(ChannelScope),
    /// Tails the rotating log file.
    Logs {
        #[arg(long, default_value_t = 200)]
        lines: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum ArchiveAction {
    /// Same process as `recorder start`: the archive leg always runs
    /// alongside the audio/video legs under one supervisor .
    Start(ChannelScope),
    Stop(ChannelScope),
    /// Lists archive files and thumbnails on disk for a channel/date.
    Status {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        date: Option<chrono::NaiveDate>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbAction {
    /// Unconditionally empties every derived table (no age cutoff).
    Truncate(ConfirmArgs),
    /// Age-based pruning of derived tables and the screenshot tree .
    Retention {
        #[arg(long, default_value_t = 365)]
        days: i64,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ServicesAction {
    Up,
    Down,
    Ps,
}

#[derive(Subcommand, Debug)]
pub enum ApiAction {
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand, Debug)]
pub enum AsrAction {
    /// Runs the consumer loop for `asr.transcribe_segment`.
    Worker {
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Checks that the configured ASR binary is reachable.
    Ping,
    /// One-shot: enqueues segments missing a transcript.
    Enqueue(ChannelScope),
    /// Runs the periodic ASR scheduler loop.
    Scheduler(ChannelScope),
    /// Times `ping` N times and reports latency stats. The ASR model itself
    /// is an external collaborator; this only measures process round-trip.
    Bench {
        #[arg(long, default_value_t = 5)]
        iterations: u32,
    },
}

#[derive(Subcommand, Debug)]
pub enum VisionStage {
    Ocr,
    Objects,
    Faces,
}

#[derive(Subcommand, Debug)]
pub enum VisionAction {
    /// Runs the consumer loop for the given stage.
    Worker {
        #[command(subcommand)]
        stage: VisionStage,
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// One-shot: enqueues segments missing the given stage's artifact.
    Enqueue {
        #[command(subcommand)]
        stage: VisionStage,
        #[arg(long)]
        channel: Option<String>,
    },
    /// Runs the consumer loop for standalone screenshot capture
    /// (`vision.screenshots_segment`); shares the OCR stage status column
    /// since no dedicated one exists.
    WorkerScreenshots {
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Enqueues standalone screenshot capture (`vision.screenshots_segment`).
    EnqueueScreenshots(ChannelScope),
}

#[derive(Subcommand, Debug)]
pub enum NlpKind {
    Entities,
    Alerts,
}

#[derive(Subcommand, Debug)]
pub enum NlpAction {
    /// Runs the consumer loop for the given kind.
    Worker {
        #[command(subcommand)]
        kind: NlpKind,
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// One-shot: enqueues both entity and alert tasks for transcribed
    /// segments missing them (`enqueue_nlp_missing` gates on the transcript
    /// existing, not a status column).
    Enqueue(ChannelScope),
}

#[derive(Subcommand, Debug)]
pub enum ChannelsAction {
    List {
        #[arg(long)]
        active_only: bool,
    },
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        name: Option<String>,
    },
    Enable { id: String },
    Disable { id: String },
}

/// Loads [`ProcessConfig`] from the environment, calling `dotenvy::dotenv()`
/// first so a `.env` file works the same as exported variables.
fn load_process_config() -> Result<ProcessConfig> {
    let _ = dotenvy::dotenv();
    ProcessConfig::from_env()
}

pub async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Recorder { action } => run_recorder(cli.channels_dir, action).await,
        Command::Archive { action } => run_archive(cli.channels_dir, action).await,
        Command::Db { action } => run_db(cli.channels_dir, action).await,
        Command::Services { action } => run_services(cli.channels_dir, action).await,
        Command::Api { action } => run_api(cli.channels_dir, action).await,
        Command::Asr { action } => run_asr(cli.channels_dir, action).await,
        Command::Vision { action } => run_vision(cli.channels_dir, action).await,
        Command::Nlp { action } => run_nlp(cli.channels_dir, action).await,
        Command::Channels { action } => run_channels(cli.channels_dir, action).await,
        Command::Status => run_status(cli.channels_dir).await,
        Command::Freshreset(args) => run_freshreset(cli.channels_dir, args).await,
        Command::KillTheMinions => {
            let killed = retention::kill_the_minions();
            info!(killed, "kill-the-minions complete");
            Ok(0)
        }
    }
}

async fn bootstrap(channels_dir: &std::path::Path) -> Result<Arc<Runtime>> {
    let config = load_process_config()?;
    let runtime = Runtime::bootstrap(config, channels_dir).await?;
    Ok(Arc::new(runtime))
}

fn selected_channel_ids(runtime: &Runtime, channel: &Option<String>) -> Vec<String> {
    match channel {
        Some(id) => vec![id.clone()],
        None => runtime.channels.iter().map(|e| e.key().clone()).collect(),
    }
}

async fn wait_for_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install ctrl-c handler, continuing until killed");
        std::future::pending::<()>().await;
    }
}

/// Starts a `CaptureSupervisor` per selected channel and blocks until Ctrl-C,
/// then shuts every supervisor down cleanly.
async fn run_recorder(channels_dir: PathBuf, action: RecorderAction) -> Result<i32> {
    match action {
        RecorderAction::Start(scope) => {
            let runtime = bootstrap(&channels_dir).await?;
            let ids = selected_channel_ids(&runtime, &scope.channel);
            if ids.is_empty() {
                error!("no channels loaded from {}", channels_dir.display());
                return Ok(1);
            }

            for id in &ids {
                let Some(channel) = runtime.channels.get(id).map(|e| e.value().clone()) else {
                    warn!(channel = %id, "unknown channel, skipping");
                    continue;
                };
                let supervisor_config = SupervisorConfig {
                    data_root: runtime.data_root.clone(),
                    ..Default::default()
                };
                let supervisor = CaptureSupervisor::new(
                    channel,
                    supervisor_config,
                    runtime.repos.recordings.clone(),
                    runtime.repos.segments.clone(),
                );
                let handle = supervisor.spawn();
                runtime.supervisors.insert(id.clone(), handle);
                info!(channel = %id, "capture supervisor started");
            }

            wait_for_shutdown_signal().await;
            info!("shutdown signal received, stopping supervisors");
            runtime.shutdown().await;
            Ok(0)
        }
        RecorderAction::Stop(_scope) => {
            info!("send Ctrl-C (SIGINT) or SIGTERM to the running `recorder start` process to stop it cleanly");
            Ok(0)
        }
        RecorderAction::Status(scope) => {
            let runtime = bootstrap(&channels_dir).await?;
            let ids = selected_channel_ids(&runtime, &scope.channel);
            for id in ids {
                let page = runtime
                    .repos
                    .recordings
                    .list_recent_recordings(Some(&id), None, None, 1, 0)
                    .await?;
                match page.items.first() {
                    Some(r) => println!("{id}: recording {} status={} started_at={}", r.id, r.status, r.started_at),
                    None => println!("{id}: no recordings on record"),
                }
            }
            Ok(0)
        }
        RecorderAction::Logs { lines } => {
            let config = load_process_config()?;
            print_recent_log_lines(&config.log_dir, lines)
        }
    }
}

/// The archive leg is bundled into the same supervisor as `recorder`
/// (the dual capture engine always runs the archive leg); `start`/
/// `stop` delegate straight through. `status` is a disk listing instead,
/// since it is the one archive-specific read the operator actually wants.
async fn run_archive(channels_dir: PathBuf, action: ArchiveAction) -> Result<i32> {
    match action {
        ArchiveAction::Start(scope) => run_recorder(channels_dir, RecorderAction::Start(scope)).await,
        ArchiveAction::Stop(scope) => run_recorder(channels_dir, RecorderAction::Stop(scope)).await,
        ArchiveAction::Status { channel, date } => {
            let config = load_process_config()?;
            let data_root = PathBuf::from(&config.data_root);
            let date = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
            let dir = crate::storage::leg_dir(&data_root, &channel, crate::storage::Leg::Archive, date);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    println!("{}: no archive directory for {date}", channel);
                    return Ok(0);
                }
                Err(e) => return Err(Error::io_path("reading", &dir, e)),
            };
            let mut count = 0;
            while let Some(entry) = entries.next_entry().await.map_err(|e| Error::io_path("reading", &dir, e))? {
                println!("{}", entry.path().display());
                count += 1;
            }
            println!("{channel}: {count} files under {}", dir.display());
            Ok(0)
        }
    }
}

async fn run_db(channels_dir: PathBuf, action: DbAction) -> Result<i32> {
    let runtime = bootstrap(&channels_dir).await?;
    match action {
        DbAction::Truncate(confirm) => {
            if !confirm.confirm {
                error!("db truncate refused: pass --confirm to proceed");
                return Ok(EXIT_REFUSED);
            }
            let scope = retention::FreshResetScope {
                include_channels: confirm.include_channels,
                today_only: false,
            };
            // A narrower sibling of `freshreset`: same truncate step, no
            // supervisor teardown and no directory wipe.
            let mut tables: Vec<&str> = vec![
                "alerts",
                "entities",
                "visual_events",
                "segment_embeddings",
                "transcripts",
                "segments",
                "recordings",
                "system_metrics",
            ];
            if scope.include_channels {
                tables.push("channels");
            }
            for table in tables {
                let rows = sqlx::query(&format!("DELETE FROM {table}"))
                    .execute(&runtime.pool)
                    .await?
                    .rows_affected();
                info!(table, rows, "truncated table");
            }
            Ok(0)
        }
        DbAction::Retention { days, dry_run } => {
            let report = retention::run_retention(&runtime.pool, days, dry_run).await?;
            for (table, rows) in &report.rows_by_table {
                println!("{table}: {rows} rows {}", if dry_run { "(dry-run)" } else { "deleted" });
            }
            println!("total: {} rows", report.total());

            let shot_report =
                retention::cleanup_screenshots(&runtime.screenshot_root, days, dry_run).await?;
            println!(
                "screenshots: {} files {} ({} bytes)",
                shot_report.removed,
                if dry_run { "(dry-run)" } else { "removed" },
                shot_report.bytes_reclaimed
            );
            Ok(0)
        }
    }
}

async fn run_services(channels_dir: PathBuf, action: ServicesAction) -> Result<i32> {
    match action {
        ServicesAction::Up => {
            let runtime = bootstrap(&channels_dir).await?;

            for entry in runtime.channels.iter() {
                let id = entry.key().clone();
                let channel = entry.value().clone();
                let supervisor_config = SupervisorConfig {
                    data_root: runtime.data_root.clone(),
                    ..Default::default()
                };
                let supervisor = CaptureSupervisor::new(
                    channel,
                    supervisor_config,
                    runtime.repos.recordings.clone(),
                    runtime.repos.segments.clone(),
                );
                runtime.supervisors.insert(id, supervisor.spawn());
            }

            spawn_all_schedulers(&runtime);

            let api_runtime = runtime.clone();
            tokio::spawn(async move {
                let config = ApiServerConfig {
                    bind_address: api_runtime.config.api_host.clone(),
                    port: api_runtime.config.api_port,
                };
                if let Err(e) = server::serve(api_runtime, config).await {
                    error!(error = %e, "read API server exited with error");
                }
            });

            info!("services up: supervisors, schedulers, and API all running");
            wait_for_shutdown_signal().await;
            runtime.shutdown().await;
            Ok(0)
        }
        ServicesAction::Down => {
            info!("send Ctrl-C (SIGINT) or SIGTERM to the running `services up` process to stop it cleanly");
            Ok(0)
        }
        ServicesAction::Ps => {
            let runtime = bootstrap(&channels_dir).await?;
            println!("channels loaded: {}", runtime.channels.len());
            for entry in runtime.channels.iter() {
                println!("  - {}", entry.key());
            }
            Ok(0)
        }
    }
}

fn spawn_all_schedulers(runtime: &Arc<Runtime>) {
    let stages: [(PipelineStage, &'static str); 4] = [
        (PipelineStage::Asr, task_names::ASR_TRANSCRIBE_SEGMENT),
        (PipelineStage::VisionOcr, task_names::VISION_OCR_SEGMENT),
        (PipelineStage::VisionObjects, task_names::VISION_OBJECTS_SEGMENT),
        (PipelineStage::VisionFaces, task_names::VISION_FACES_SEGMENT),
    ];
    for (stage, task_name) in stages {
        let runtime = runtime.clone();
        let cancel = runtime.shutdown.clone();
        tokio::spawn(async move {
            scheduler::run_scheduler_loop(stage.as_str(), cancel, &SchedulerConfig::default(), || {
                let segments = runtime.repos.segments.clone();
                let queue = runtime.queue.clone();
                async move {
                    scheduler::enqueue_missing_for_stage(
                        stage,
                        task_name,
                        segments.as_ref(),
                        queue.as_ref(),
                        &SchedulerConfig::default(),
                    )
                    .await
                }
            })
            .await;
        });
    }

    let runtime = runtime.clone();
    let cancel = runtime.shutdown.clone();
    tokio::spawn(async move {
        scheduler::run_scheduler_loop("nlp", cancel, &SchedulerConfig::default(), || {
            let segments = runtime.repos.segments.clone();
            let queue = runtime.queue.clone();
            async move {
                scheduler::enqueue_nlp_missing(segments.as_ref(), queue.as_ref(), &SchedulerConfig::default())
                    .await
            }
        })
        .await;
    });
}

async fn run_api(channels_dir: PathBuf, action: ApiAction) -> Result<i32> {
    let ApiAction::Serve { host, port } = action;
    let runtime = bootstrap(&channels_dir).await?;
    let config = ApiServerConfig {
        bind_address: host.unwrap_or_else(|| runtime.config.api_host.clone()),
        port: port.unwrap_or(runtime.config.api_port),
    };
    server::serve(runtime, config).await?;
    Ok(0)
}

fn stage_worker_metrics(runtime: &Runtime, stage: &str) -> Result<Arc<WorkerMetrics>> {
    Ok(Arc::new(WorkerMetrics::register(&runtime.metrics_registry, stage)?))
}

fn worker_repositories(runtime: &Runtime) -> Arc<WorkerRepositories> {
    Arc::new(WorkerRepositories {
        segments: runtime.repos.segments.clone(),
        transcripts: runtime.repos.transcripts.clone(),
        visual_events: runtime.repos.visual_events.clone(),
        entities: runtime.repos.entities.clone(),
        alerts: runtime.repos.alerts.clone(),
    })
}

async fn run_stage_worker(
    runtime: &Arc<Runtime>,
    stage: PipelineStage,
    task_name: &str,
    analyser: Arc<dyn Analyser>,
    concurrency: usize,
) -> Result<()> {
    let worker = Arc::new(StageWorker {
        stage,
        analyser,
        repos: worker_repositories(runtime),
        data_root: runtime.data_root.clone(),
        metrics: stage_worker_metrics(runtime, stage.as_str())?,
    });
    runtime
        .queue
        .consume(task_name, concurrency, runtime.shutdown.clone(), worker)
        .await
}

async fn run_asr(channels_dir: PathBuf, action: AsrAction) -> Result<i32> {
    match action {
        AsrAction::Worker { concurrency } => {
            let runtime = bootstrap(&channels_dir).await?;
            let analyser: Arc<dyn Analyser> = Arc::new(AsrAnalyser::new(AsrConfig::default()));
            run_stage_worker(&runtime, PipelineStage::Asr, task_names::ASR_TRANSCRIBE_SEGMENT, analyser, concurrency).await?;
            Ok(0)
        }
        AsrAction::Ping => {
            let latency = ping_binary(&AsrConfig::default().binary).await?;
            println!("asr tool reachable, {latency:?}");
            Ok(0)
        }
        AsrAction::Enqueue(scope) => {
            let runtime = bootstrap(&channels_dir).await?;
            let config = SchedulerConfig {
                channel_id: scope.channel,
                ..Default::default()
            };
            let n = scheduler::enqueue_missing_for_stage(
                PipelineStage::Asr,
                task_names::ASR_TRANSCRIBE_SEGMENT,
                runtime.repos.segments.as_ref(),
                runtime.queue.as_ref(),
                &config,
            )
            .await?;
            println!("enqueued {n} segment(s) for ASR");
            Ok(0)
        }
        AsrAction::Scheduler(scope) => {
            let runtime = bootstrap(&channels_dir).await?;
            let config = SchedulerConfig {
                channel_id: scope.channel,
                ..Default::default()
            };
            scheduler::run_scheduler_loop("asr", runtime.shutdown.clone(), &config, || {
                let segments = runtime.repos.segments.clone();
                let queue = runtime.queue.clone();
                let config = config.clone();
                async move {
                    scheduler::enqueue_missing_for_stage(
                        PipelineStage::Asr,
                        task_names::ASR_TRANSCRIBE_SEGMENT,
                        segments.as_ref(),
                        queue.as_ref(),
                        &config,
                    )
                    .await
                }
            })
            .await;
            Ok(0)
        }
        AsrAction::Bench { iterations } => {
            let binary = AsrConfig::default().binary;
            let mut samples = Vec::with_capacity(iterations as usize);
            for _ in 0..iterations.max(1) {
                samples.push(ping_binary(&binary).await?);
            }
            report_bench(&samples);
            Ok(0)
        }
    }
}

/// Invokes `binary --help` purely to measure process start/round-trip
/// latency; never the analyser's own model-loading path, which stays an
/// external collaborator's concern (the explicit non-goal).
async fn ping_binary(binary: &str) -> Result<std::time::Duration> {
    let start = std::time::Instant::now();
    let status = process_utils::tokio_command(binary)
        .arg("--help")
        .status()
        .await
        .map_err(|e| Error::ModelLoad(format!("failed to spawn {binary}: {e}")))?;
    if !status.success() {
        return Err(Error::ModelLoad(format!("{binary} --help exited with {:?}", status.code())));
    }
    Ok(start.elapsed())
}

fn report_bench(samples: &[std::time::Duration]) {
    let millis: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
    let min = millis.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = millis.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = millis.iter().sum::<f64>() / millis.len().max(1) as f64;
    println!("iterations={} min={min:.1}ms mean={mean:.1}ms max={max:.1}ms", millis.len());
}

async fn run_vision(channels_dir: PathBuf, action: VisionAction) -> Result<i32> {
    match action {
        VisionAction::Worker { stage, concurrency } => {
            let runtime = bootstrap(&channels_dir).await?;
            let (pipeline_stage, task_name, analyser): (PipelineStage, &str, Arc<dyn Analyser>) = match stage {
                VisionStage::Ocr => (
                    PipelineStage::VisionOcr,
                    task_names::VISION_OCR_SEGMENT,
                    Arc::new(OcrAnalyser::new(OcrConfig {
                        screenshot_root: runtime.screenshot_root.clone(),
                        ..Default::default()
                    })),
                ),
                VisionStage::Objects => (
                    PipelineStage::VisionObjects,
                    task_names::VISION_OBJECTS_SEGMENT,
                    Arc::new(ObjectsAnalyser::new(ObjectsConfig::default())),
                ),
                VisionStage::Faces => (
                    PipelineStage::VisionFaces,
                    task_names::VISION_FACES_SEGMENT,
                    Arc::new(FacesAnalyser::new(FacesConfig::default())),
                ),
            };
            run_stage_worker(&runtime, pipeline_stage, task_name, analyser, concurrency).await?;
            Ok(0)
        }
        VisionAction::Enqueue { stage, channel } => {
            let runtime = bootstrap(&channels_dir).await?;
            let (pipeline_stage, task_name) = match stage {
                VisionStage::Ocr => (PipelineStage::VisionOcr, task_names::VISION_OCR_SEGMENT),
                VisionStage::Objects => (PipelineStage::VisionObjects, task_names::VISION_OBJECTS_SEGMENT),
                VisionStage::Faces => (PipelineStage::VisionFaces, task_names::VISION_FACES_SEGMENT),
            };
            let config = SchedulerConfig {
                channel_id: channel,
                ..Default::default()
            };
            let n = scheduler::enqueue_missing_for_stage(
                pipeline_stage,
                task_name,
                runtime.repos.segments.as_ref(),
                runtime.queue.as_ref(),
                &config,
            )
            .await?;
            println!("enqueued {n} segment(s) for {}", pipeline_stage.as_str());
            Ok(0)
        }
        VisionAction::WorkerScreenshots { concurrency } => {
            let runtime = bootstrap(&channels_dir).await?;
            let analyser: Arc<dyn Analyser> = Arc::new(ScreenshotsAnalyser::new(ScreenshotsConfig {
                screenshot_root: runtime.screenshot_root.clone(),
                ..Default::default()
            }));
            // No dedicated pipeline stage/status column exists for
            // screenshots; reuse OCR's for status
            // transitions but keep the metric name distinct.
            let worker = Arc::new(StageWorker {
                stage: PipelineStage::VisionOcr,
                analyser,
                repos: worker_repositories(&runtime),
                data_root: runtime.data_root.clone(),
                metrics: stage_worker_metrics(&runtime, "vision_screenshots")?,
            });
            runtime
                .queue
                .consume(task_names::VISION_SCREENSHOTS_SEGMENT, concurrency, runtime.shutdown.clone(), worker)
                .await?;
            Ok(0)
        }
        VisionAction::EnqueueScreenshots(scope) => {
            let runtime = bootstrap(&channels_dir).await?;
            let config = SchedulerConfig {
                channel_id: scope.channel,
                ..Default::default()
            };
            // Screenshots have no dedicated status column to gate on; reuse
            // the OCR-missing query as "recently detected, not yet sampled".
            let n = scheduler::enqueue_missing_for_stage(
                PipelineStage::VisionOcr,
                task_names::VISION_SCREENSHOTS_SEGMENT,
                runtime.repos.segments.as_ref(),
                runtime.queue.as_ref(),
                &config,
            )
            .await?;
            println!("enqueued {n} segment(s) for screenshot capture");
            Ok(0)
        }
    }
}

async fn run_nlp(channels_dir: PathBuf, action: NlpAction) -> Result<i32> {
    match action {
        NlpAction::Worker { kind, concurrency } => {
            let runtime = bootstrap(&channels_dir).await?;
            let transcripts = runtime.repos.transcripts.clone();
            let (task_name, analyser): (&str, Arc<dyn Analyser>) = match kind {
                NlpKind::Entities => (
                    task_names::NLP_ENTITIES_FOR_TRANSCRIPT,
                    Arc::new(EntitiesAnalyser::new(EntitiesConfig::default(), transcripts)),
                ),
                NlpKind::Alerts => (
                    task_names::NLP_ALERTS_FOR_TRANSCRIPT,
                    Arc::new(AlertsAnalyser::new(AlertsConfig::default(), transcripts)),
                ),
            };
            run_stage_worker(&runtime, PipelineStage::Nlp, task_name, analyser, concurrency).await?;
            Ok(0)
        }
        NlpAction::Enqueue(scope) => {
            let runtime = bootstrap(&channels_dir).await?;
            let config = SchedulerConfig {
                channel_id: scope.channel,
                ..Default::default()
            };
            let n = scheduler::enqueue_nlp_missing(runtime.repos.segments.as_ref(), runtime.queue.as_ref(), &config)
                .await?;
            println!("enqueued {n} segment(s) for NLP");
            Ok(0)
        }
    }
}

async fn run_channels(channels_dir: PathBuf, action: ChannelsAction) -> Result<i32> {
    let runtime = bootstrap(&channels_dir).await?;
    match action {
        ChannelsAction::List { active_only } => {
            let page = runtime.repos.channels.list_channels(active_only, 500, 0).await?;
            for channel in page.items {
                println!("{} ({}) active={} url={}", channel.id, channel.name, channel.active, channel.url);
            }
            Ok(0)
        }
        ChannelsAction::Add { id, url, name } => {
            let name = name.unwrap_or_else(|| id.clone());
            let channel = runtime
                .repos
                .channels
                .upsert_channel(&id, &name, &url, &serde_json::json!({}), true, None)
                .await?;
            println!("added channel {}", channel.id);
            Ok(0)
        }
        ChannelsAction::Enable { id } => set_channel_active(&runtime, &id, true).await,
        ChannelsAction::Disable { id } => set_channel_active(&runtime, &id, false).await,
    }
}

async fn set_channel_active(runtime: &Runtime, id: &str, active: bool) -> Result<i32> {
    let Some(existing) = runtime.repos.channels.get_channel(id).await? else {
        error!(channel = id, "unknown channel");
        return Ok(1);
    };
    runtime
        .repos
        .channels
        .upsert_channel(
            &existing.id,
            &existing.name,
            &existing.url,
            &existing.headers,
            active,
            existing.description.as_deref(),
        )
        .await?;
    println!("{id}: active={active}");
    Ok(0)
}

async fn run_status(channels_dir: PathBuf) -> Result<i32> {
    let runtime = bootstrap(&channels_dir).await?;
    let channels = runtime.repos.channels.list_channels(false, 500, 0).await?;
    println!("channels: {}", channels.items.len());
    for channel in &channels.items {
        let recordings = runtime
            .repos
            .recordings
            .list_recent_recordings(Some(&channel.id), None, None, 1, 0)
            .await?;
        let status = recordings
            .items
            .first()
            .map(|r| r.status.to_string())
            .unwrap_or_else(|| "no recordings".to_string());
        println!("  - {}: active={} last_recording={}", channel.id, channel.active, status);
    }
    Ok(0)
}

async fn run_freshreset(channels_dir: PathBuf, args: ConfirmArgs) -> Result<i32> {
    let runtime = bootstrap(&channels_dir).await?;
    let scope = retention::FreshResetScope {
        include_channels: args.include_channels,
        today_only: args.today_only,
    };
    match retention::fresh_reset(&runtime, scope, args.confirm).await {
        Ok(report) => {
            println!(
                "fresh reset complete: {} supervisor(s) stopped, {} process(es) killed, {} table(s) truncated, {} director(ies) wiped",
                report.supervisors_stopped,
                report.processes_killed,
                report.rows_truncated.len(),
                report.directories_wiped,
            );
            if !report.metrics_ports_still_bound.is_empty() {
                warn!(ports = ?report.metrics_ports_still_bound, "some metrics ports are still bound");
            }
            Ok(0)
        }
        Err(Error::RetentionSafety(msg)) => {
            error!("{msg}");
            Ok(EXIT_REFUSED)
        }
        Err(e) => Err(e),
    }
}

fn print_recent_log_lines(log_dir: &str, lines: usize) -> Result<i32> {
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let path = std::path::Path::new(log_dir).join(format!("mobasher-core.log.{today}"));
    let content = std::fs::read_to_string(&path).map_err(|e| Error::io_path("reading", &path, e))?;
    for line in content.lines().rev().take(lines).collect::<Vec<_>>().into_iter().rev() {
        println!("{line}");
    }
    Ok(0)
}
