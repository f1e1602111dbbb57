//! Frame sink side of the video relay
//!
//! A dedicated thread polls the frame queue and hands frames to a
//! [`FrameSink`]. Rendering itself lives outside this crate.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::VideoError;
use crate::video::queue::{FrameQueue, Pull, VideoFrame};

/// What the display loop does after a frame was shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFlow {
    Continue,
    /// The viewer closed the window: end the session and disconnect its producer
    Close,
}

/// Consumer of decoded-for-display frames
pub trait FrameSink: Send {
    fn session_started(&mut self, _generation: u64) {}

    fn show(&mut self, frame: &VideoFrame) -> Result<SinkFlow, VideoError>;

    fn session_ended(&mut self, _generation: u64) {}
}

/// Display loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayStats {
    pub sessions: u64,
    pub frames_shown: u64,
    pub sink_errors: u64,
    /// Sessions ended by the sink returning [`SinkFlow::Close`]
    pub stops_requested: u64,
    /// Frames still queued when a session ended
    pub discarded: u64,
}

/// Pull frames until the queue is closed.
///
/// Each session is bracketed by `session_started`/`session_ended`; a frame
/// from a newer generation closes the previous session first. When the sink
/// asks to close, the producer is cancelled and the loop waits for the next
/// session.
pub fn run_display(queue: &FrameQueue, sink: &mut dyn FrameSink, poll: Duration) -> DisplayStats {
    let mut stats = DisplayStats::default();
    loop {
        if !queue.wait_for_session(poll) {
            if queue.is_closed() {
                return stats;
            }
            continue;
        }

        let mut generation = queue.generation();
        sink.session_started(generation);
        stats.sessions += 1;
        tracing::info!("Video display loop started (generation {})", generation);

        let closed = loop {
            match queue.pull(poll) {
                Pull::Frame(frame) => {
                    if frame.generation != generation {
                        sink.session_ended(generation);
                        generation = frame.generation;
                        sink.session_started(generation);
                        stats.sessions += 1;
                    }
                    match sink.show(&frame) {
                        Ok(SinkFlow::Continue) => stats.frames_shown += 1,
                        Ok(SinkFlow::Close) => {
                            stats.frames_shown += 1;
                            if queue.request_stop(generation) {
                                tracing::info!("Video closed by viewer (generation {})", generation);
                                stats.stops_requested += 1;
                            }
                            break false;
                        }
                        Err(e) => {
                            tracing::error!("Frame sink error: {}", e);
                            stats.sink_errors += 1;
                        }
                    }
                }
                Pull::Empty => continue,
                Pull::Inactive => break false,
                Pull::Closed => break true,
            }
        };

        sink.session_ended(generation);
        stats.discarded += queue.drain_through(generation) as u64;
        tracing::info!("Video display loop ended (generation {})", generation);
        if closed {
            return stats;
        }
    }
}

/// Run [`run_display`] on its own thread
pub fn spawn_display(
    queue: Arc<FrameQueue>,
    mut sink: Box<dyn FrameSink>,
    poll: Duration,
) -> std::io::Result<JoinHandle<DisplayStats>> {
    thread::Builder::new()
        .name("video-display".into())
        .spawn(move || run_display(&queue, sink.as_mut(), poll))
}

/// Discards frames
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn show(&mut self, _frame: &VideoFrame) -> Result<SinkFlow, VideoError> {
        Ok(SinkFlow::Continue)
    }
}

/// Keeps the newest frame on disk, replacing it atomically
#[derive(Debug)]
pub struct LatestFrameSink {
    path: PathBuf,
    tmp: PathBuf,
}

impl LatestFrameSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".part");
        Self {
            path,
            tmp: PathBuf::from(tmp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for LatestFrameSink {
    fn session_started(&mut self, generation: u64) {
        tracing::info!("Writing live video to {} (session {})", self.path.display(), generation);
    }

    fn show(&mut self, frame: &VideoFrame) -> Result<SinkFlow, VideoError> {
        fs::write(&self.tmp, &frame.payload)
            .and_then(|()| fs::rename(&self.tmp, &self.path))
            .map_err(|e| VideoError::Sink(format!("{}: {}", self.path.display(), e)))?;
        Ok(SinkFlow::Continue)
    }
}
