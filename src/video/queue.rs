//! Bounded frame queue between the video producer and the frame sink
//!
//! Pushing never blocks: once the queue holds `capacity` frames the oldest is
//! evicted, so the sink always sees the freshest picture. The queue also
//! carries the session-active flag so a consumer can wait on one condition
//! variable for both frames and session changes.
//!
//! A session may carry the producer's stop token, which lets the consumer end
//! it from its side with [`FrameQueue::request_stop`].

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One encoded frame as received from the producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Producer generation that sent this frame
    pub generation: u64,
    /// Index within the generation, starting at 0
    pub sequence: u64,
    /// Opaque encoded image (JPEG from the stock client)
    pub payload: Bytes,
}

/// Result of one consumer pull
#[derive(Debug, PartialEq, Eq)]
pub enum Pull {
    Frame(VideoFrame),
    /// Session active but nothing arrived within the timeout
    Empty,
    /// No active producer and nothing left to drain
    Inactive,
    /// Server is shutting down
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<VideoFrame>,
    generation: u64,
    active: bool,
    closed: bool,
    stop: Option<CancellationToken>,
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: u64,
    pub evicted: u64,
    pub stale: u64,
}

#[derive(Debug)]
pub struct FrameQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    ready: Condvar,
    pushed: AtomicU64,
    evicted: AtomicU64,
    stale: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                ..QueueState::default()
            }),
            ready: Condvar::new(),
            pushed: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        }
    }

    /// Mark `generation` as the active session and drop every frame left over
    /// from older ones.
    pub fn begin_session(&self, generation: u64) {
        self.open_session(generation, None);
    }

    /// Like [`begin_session`](Self::begin_session), but the consumer can end
    /// the session by cancelling `stop`.
    pub fn begin_stoppable_session(&self, generation: u64, stop: CancellationToken) {
        self.open_session(generation, Some(stop));
    }

    fn open_session(&self, generation: u64, stop: Option<CancellationToken>) {
        let mut state = self.state.lock();
        let before = state.frames.len();
        state.frames.retain(|f| f.generation >= generation);
        let purged = before - state.frames.len();
        if purged > 0 {
            tracing::debug!("Dropped {} stale frames before generation {}", purged, generation);
        }
        state.generation = generation;
        state.active = true;
        state.stop = stop;
        drop(state);
        self.ready.notify_all();
    }

    /// Mark the session inactive if `generation` is still current.
    pub fn end_session(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || !state.active {
            return false;
        }
        state.active = false;
        state.stop = None;
        drop(state);
        self.ready.notify_all();
        true
    }

    /// Consumer side: end the session of `generation` and cancel its producer.
    ///
    /// Returns false if that session is no longer the active one.
    pub fn request_stop(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.generation != generation || !state.active {
            return false;
        }
        state.active = false;
        let stop = state.stop.take();
        drop(state);
        if let Some(stop) = stop {
            stop.cancel();
        }
        self.ready.notify_all();
        true
    }

    /// Append a frame, evicting the oldest if full. Frames from an inactive
    /// session or any generation other than the current one are discarded.
    /// Returns true if queued.
    pub fn push(&self, frame: VideoFrame) -> bool {
        let mut state = self.state.lock();
        if state.closed || !state.active || frame.generation != state.generation {
            drop(state);
            self.stale.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        while state.frames.len() >= self.capacity {
            state.frames.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        state.frames.push_back(frame);
        drop(state);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_one();
        true
    }

    /// Take the oldest frame, waiting at most `timeout` for one to arrive.
    ///
    /// Frames are handed out even after the session ends, until drained.
    pub fn pull(&self, timeout: Duration) -> Pull {
        let mut state = self.state.lock();
        if let Some(pull) = Self::try_take(&mut state) {
            return pull;
        }
        let _ = self.ready.wait_for(&mut state, timeout);
        Self::try_take(&mut state).unwrap_or(Pull::Empty)
    }

    fn try_take(state: &mut QueueState) -> Option<Pull> {
        if state.closed {
            return Some(Pull::Closed);
        }
        if let Some(frame) = state.frames.pop_front() {
            return Some(Pull::Frame(frame));
        }
        if !state.active {
            return Some(Pull::Inactive);
        }
        None
    }

    /// Wait up to `timeout` for a session to become active (or frames to be
    /// pending). Returns false on timeout or once closed.
    pub fn wait_for_session(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        let ready = |s: &QueueState| !s.closed && (s.active || !s.frames.is_empty());
        if ready(&*state) {
            return true;
        }
        if state.closed {
            return false;
        }
        let _ = self.ready.wait_for(&mut state, timeout);
        ready(&*state)
    }

    /// Drop pending frames from `generation` and older. Returns how many.
    pub fn drain_through(&self, generation: u64) -> usize {
        let mut state = self.state.lock();
        let before = state.frames.len();
        state.frames.retain(|f| f.generation > generation);
        before - state.frames.len()
    }

    /// Stop the queue for good and wake every waiter
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.active = false;
        state.stop = None;
        state.frames.clear();
        drop(state);
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Generation of the current (or most recent) session
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Generations of the pending frames, oldest first
    pub fn pending_generations(&self) -> Vec<u64> {
        self.state.lock().frames.iter().map(|f| f.generation).collect()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
        }
    }
}
