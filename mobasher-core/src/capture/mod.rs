//! Capture supervisor: spawns and supervises the per-channel
//! transcoder subprocesses (audio leg, video leg, archive leg).

pub mod command;
pub mod supervisor;

pub use supervisor::{CaptureSupervisor, LegKind, SupervisorConfig, SupervisorHandle};
