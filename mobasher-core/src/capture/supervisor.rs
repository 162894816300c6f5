//! Per-channel capture supervisor.
//!
//! Owns up to three child transcoder processes per channel (audio leg, video
//! leg, archive leg), each in its own OS process group via
//! [`process_utils::ProcessGroupExt`]. Each leg's exit is watched by its own
//! task that feeds an mpsc channel: a oneshot per child, generalized here to
//! an mpsc so the supervisor's main loop can await "any leg" without giving
//! up ownership of the others. Restart budget uses
//! `scheduler::backoff::RestartTracker`, keyed per `{channel}:{leg}`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use process_utils::{ProcessGroupExt, SIGKILL, SIGTERM};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::capture::command::build_args;
use crate::config::ChannelConfig;
use crate::domain::RecordingStatus;
use crate::persistence::{RecordingRepository, SegmentRepository};
use crate::scheduler::backoff::RestartTracker;
use crate::storage;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegKind {
    Audio,
    Video,
    Archive,
}

impl LegKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LegKind::Audio => "audio",
            LegKind::Video => "video",
            LegKind::Archive => "archive",
        }
    }
}

/// Tunables for one supervisor instance.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub data_root: PathBuf,
    pub transcoder_binary: String,
    pub heartbeat_seconds: u64,
    pub max_restarts_per_hour: usize,
    pub shutdown_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            transcoder_binary: "ffmpeg".to_string(),
            heartbeat_seconds: 10,
            max_restarts_per_hour: 5,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

type ExitTx = mpsc::UnboundedSender<(LegKind, Option<i32>)>;
type ExitRx = mpsc::UnboundedReceiver<(LegKind, Option<i32>)>;

struct ActiveLeg {
    pid: u32,
}

/// A handle to a spawned supervisor task, used by the runtime/CLI to stop it
/// and by the retention job's fresh-reset sequence.
pub struct SupervisorHandle {
    pub channel_id: String,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<Result<()>>,
}

impl SupervisorHandle {
    /// Requests a clean stop and awaits it. Idempotent.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(Error::Other(format!("supervisor task panicked: {e}"))),
        }
    }
}

pub struct CaptureSupervisor {
    channel: ChannelConfig,
    config: SupervisorConfig,
    recordings: Arc<dyn RecordingRepository>,
    segments: Arc<dyn SegmentRepository>,
    restart_tracker: RestartTracker,
}

impl CaptureSupervisor {
    pub fn new(
        channel: ChannelConfig,
        config: SupervisorConfig,
        recordings: Arc<dyn RecordingRepository>,
        segments: Arc<dyn SegmentRepository>,
    ) -> Self {
        Self {
            channel,
            config,
            recordings,
            segments,
            restart_tracker: RestartTracker::new(),
        }
    }

    /// Spawns the supervisor loop as a background task and returns a handle
    /// to stop it.
    pub fn spawn(mut self) -> SupervisorHandle {
        let channel_id = self.channel.id.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move { self.run(task_cancel).await });
        SupervisorHandle {
            channel_id,
            cancel,
            join,
        }
    }

    fn enabled_legs(&self) -> Vec<LegKind> {
        let mut legs = Vec::new();
        if self.channel.recording.audio_enabled {
            legs.push(LegKind::Audio);
        }
        if self.channel.recording.video_enabled {
            legs.push(LegKind::Video);
        }
        // The archive leg always runs: it is the raw continuous record the
        // rest of the system derives thumbnails and long-form review from.
        legs.push(LegKind::Archive);
        legs
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        let started_at = Utc::now();
        let recording = self
            .recordings
            .create_recording(&self.channel.id, started_at)
            .await?;
        info!(channel = %self.channel.id, recording_id = %recording.id, "capture supervisor starting");

        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
        let mut active: HashMap<LegKind, ActiveLeg> = HashMap::new();
        let mut final_status = RecordingStatus::Completed;

        for leg in self.enabled_legs() {
            match self.spawn_leg(leg, exit_tx.clone()).await {
                Ok(handle) => {
                    active.insert(leg, handle);
                }
                Err(e) => {
                    error!(channel = %self.channel.id, leg = leg.as_str(), error = %e, "failed to start leg");
                }
            }
        }

        if active.is_empty() {
            final_status = RecordingStatus::Failed;
        } else {
            let mut heartbeat =
                tokio::time::interval(Duration::from_secs(self.config.heartbeat_seconds.max(5)));
            heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            'supervise: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(channel = %self.channel.id, "supervisor stop requested");
                        break 'supervise;
                    }
                    _ = heartbeat.tick() => {
                        if let Err(e) = self.run_detection_pass(recording.id, started_at).await {
                            warn!(channel = %self.channel.id, error = %e, "heartbeat segment-detection pass failed");
                        }
                    }
                    Some((leg, code)) = exit_rx.recv() => {
                        active.remove(&leg);
                        self.handle_leg_exit(leg, code, &mut active, exit_tx.clone()).await;
                        if active.is_empty() {
                            final_status = RecordingStatus::Failed;
                            break 'supervise;
                        }
                    }
                }
            }
        }

        self.shutdown_all(active, exit_rx).await;
        self.run_cleanup().await;

        self.recordings
            .complete_recording(recording.id, started_at, Utc::now(), final_status, None)
            .await?;

        if let Err(e) = self.run_detection_pass(recording.id, started_at).await {
            warn!(channel = %self.channel.id, error = %e, "final segment-detection pass failed");
        }

        Ok(())
    }

    async fn spawn_leg(&self, leg: LegKind, exit_tx: ExitTx) -> Result<ActiveLeg> {
        let today = Utc::now().date_naive();
        let (audio_dir, video_dir, archive_dir) =
            storage::ensure_leg_dirs(&self.config.data_root, &self.channel.id, today).await?;
        let output_dir = match leg {
            LegKind::Audio => audio_dir,
            LegKind::Video => video_dir,
            LegKind::Archive => archive_dir,
        };

        let args = build_args(leg, &self.channel, &output_dir);
        let mut command = process_utils::tokio_command(&self.config.transcoder_binary);
        command.args(&args);
        command.new_process_group();
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            Error::Config(format!(
                "failed to spawn {} leg for channel {}: {e}",
                leg.as_str(),
                self.channel.id
            ))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| Error::Other("spawned child has no pid".into()))?;

        info!(channel = %self.channel.id, leg = leg.as_str(), pid, "leg started");

        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    error!(pid, error = %e, "error waiting for leg process");
                    None
                }
            };
            let _ = exit_tx.send((leg, code));
        });

        Ok(ActiveLeg { pid })
    }

    async fn handle_leg_exit(
        &mut self,
        leg: LegKind,
        code: Option<i32>,
        active: &mut HashMap<LegKind, ActiveLeg>,
        exit_tx: ExitTx,
    ) {
        let actor_id = format!("{}:{}", self.channel.id, leg.as_str());

        if code == Some(0) {
            info!(channel = %self.channel.id, leg = leg.as_str(), "leg exited cleanly");
            self.restart_tracker.clear_failures(&actor_id);
            return;
        }

        warn!(channel = %self.channel.id, leg = leg.as_str(), code, "leg exited with error");
        if self.restart_tracker.recent_failures(&actor_id) >= self.config.max_restarts_per_hour {
            error!(channel = %self.channel.id, leg = leg.as_str(), "restart budget exhausted, giving up on leg");
            return;
        }

        let backoff = self.restart_tracker.record_failure(&actor_id);
        if !backoff.is_zero() {
            tokio::time::sleep(backoff).await;
        }

        match self.spawn_leg(leg, exit_tx).await {
            Ok(handle) => {
                active.insert(leg, handle);
            }
            Err(e) => {
                error!(channel = %self.channel.id, leg = leg.as_str(), error = %e, "restart failed to spawn");
            }
        }
    }

    async fn run_detection_pass(
        &self,
        recording_id: Uuid,
        recording_started_at: DateTime<Utc>,
    ) -> Result<()> {
        crate::detector::detect_and_persist(
            &self.channel,
            &self.config.data_root,
            recording_id,
            recording_started_at,
            self.segments.as_ref(),
        )
        .await?;
        Ok(())
    }

    /// Partials and extras cleanup , run once on every exit path
    /// after the legs have stopped and before the recording is marked
    /// completed. Only the audio/video legs are gated; the archive leg is a
    /// continuous raw record with no per-segment gate to apply.
    async fn run_cleanup(&self) {
        let seg_secs = self.channel.recording.segment_seconds;
        let sample_rate = self.channel.audio.sample_rate;
        let channels = self.channel.audio.channels;

        if self.channel.recording.audio_enabled {
            self.cleanup_leg(
                storage::Leg::Audio,
                crate::detector::MediaKind::Audio,
                "wav",
                seg_secs,
                sample_rate,
                channels,
            )
            .await;
        }
        if self.channel.recording.video_enabled {
            self.cleanup_leg(
                storage::Leg::Video,
                crate::detector::MediaKind::Video,
                "mp4",
                seg_secs,
                sample_rate,
                channels,
            )
            .await;
        }
    }

    async fn cleanup_leg(
        &self,
        leg: storage::Leg,
        media_kind: crate::detector::MediaKind,
        ext: &str,
        segment_seconds: u32,
        sample_rate: u32,
        channels: u32,
    ) {
        match crate::detector::cleanup_partials(
            &self.config.data_root,
            &self.channel.id,
            leg,
            ext,
            segment_seconds,
            sample_rate,
            channels,
            media_kind,
        )
        .await
        {
            Ok(removed) if removed > 0 => {
                info!(channel = %self.channel.id, leg = ext, removed, "removed partial segment files")
            }
            Ok(_) => {}
            Err(e) => warn!(channel = %self.channel.id, leg = ext, error = %e, "partials cleanup failed"),
        }

        match crate::detector::cleanup_extras(
            &self.config.data_root,
            &self.channel.id,
            leg,
            media_kind,
            ext,
            segment_seconds,
            sample_rate,
            channels,
        )
        .await
        {
            Ok(removed) if removed > 0 => {
                info!(channel = %self.channel.id, leg = ext, removed, "removed extra duplicate segment files")
            }
            Ok(_) => {}
            Err(e) => warn!(channel = %self.channel.id, leg = ext, error = %e, "extras cleanup failed"),
        }
    }

    /// Sends SIGTERM to each remaining leg's process group, waits up to the
    /// configured grace period, then SIGKILL for stragglers. Returns once
    /// every leg has been observed to exit or a short bounded wait elapses.
    async fn shutdown_all(&self, active: HashMap<LegKind, ActiveLeg>, mut exit_rx: ExitRx) {
        let mut pending: HashMap<LegKind, u32> =
            active.into_iter().map(|(k, v)| (k, v.pid)).collect();
        if pending.is_empty() {
            return;
        }

        for pid in pending.values() {
            if let Err(e) = process_utils::signal_group(*pid, SIGTERM) {
                warn!(pid, error = %e, "failed to send SIGTERM to leg process group");
            }
        }

        wait_for_exits(&mut pending, &mut exit_rx, self.config.shutdown_grace).await;

        if !pending.is_empty() {
            warn!(channel = %self.channel.id, legs = pending.len(), "legs unresponsive after grace period, sending SIGKILL");
            for pid in pending.values() {
                if let Err(e) = process_utils::signal_group(*pid, SIGKILL) {
                    warn!(pid, error = %e, "failed to send SIGKILL to leg process group");
                }
            }
            wait_for_exits(&mut pending, &mut exit_rx, Duration::from_secs(5)).await;
        }
    }
}

async fn wait_for_exits(
    pending: &mut HashMap<LegKind, u32>,
    exit_rx: &mut ExitRx,
    timeout: Duration,
) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    while !pending.is_empty() {
        tokio::select! {
            _ = &mut deadline => break,
            maybe = exit_rx.recv() => {
                match maybe {
                    Some((leg, _code)) => { pending.remove(&leg); }
                    None => break,
                }
            }
        }
    }
}
