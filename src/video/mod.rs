//! Video mode: one active producer feeding a bounded frame queue

pub mod display;
pub mod queue;
pub mod relay;

pub use display::{
    run_display, spawn_display, DisplayStats, FrameSink, LatestFrameSink, NullSink, SinkFlow,
};
pub use queue::{FrameQueue, Pull, QueueStats, VideoFrame};
pub use relay::{EndReason, RelayStats, VideoRelay};
