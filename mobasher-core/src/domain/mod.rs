//! Domain types: the rows that flow through persistence, the queue, and the API.

pub mod channel;
pub mod entity;
pub mod metric;
pub mod recording;
pub mod segment;
pub mod status;
pub mod transcript;
pub mod visual_event;

pub use channel::Channel;
pub use entity::{Alert, Entity};
pub use metric::SystemMetric;
pub use recording::Recording;
pub use segment::{Segment, derive_segment_id};
pub use status::{PipelineStage, RecordingStatus, SegmentStatus, StageStatus, VisualEventType};
pub use transcript::{EMBEDDING_DIM, SegmentEmbedding, Transcript};
pub use visual_event::VisualEvent;
