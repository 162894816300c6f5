//! Configuration: process-wide (env-driven) and per-channel (file-driven).

pub mod channel;
pub mod process;

pub use channel::{ChannelConfig, VideoQuality, load_channel_configs, load_channel_file};
pub use process::{DatabaseConfig, ProcessConfig};
