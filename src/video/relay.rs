//! Single-producer video relay
//!
//! Per connection: `Starting -> Streaming -> Ending -> Closed`.
//!
//! Starting is serialized. A new producer cancels the current one and waits
//! for its task to finish (socket dropped) before it claims the slot and bumps
//! the generation, so two producers never push concurrently and the queue
//! never mixes generations. If the old task has not finished within the
//! takeover timeout it is aborted and then awaited.

use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::config::VideoConfig;
use crate::error::{ProtocolError, VideoError};
use crate::protocol::wire::{read_exact_vec, FrameHeader};
use crate::server::{ConnId, Shutdown};
use crate::video::queue::{FrameQueue, VideoFrame};

/// Why a producer left Streaming
#[derive(Debug)]
pub enum EndReason {
    /// Zero-length frame
    Finished,
    /// Taken over, closed by the viewer, or server shutdown
    Cancelled,
    /// Read failed or peer closed mid-stream
    Disconnected(std::io::Error),
    Violation(ProtocolError),
}

/// The producer currently holding the session
struct ProducerSlot {
    generation: u64,
    conn: ConnId,
    peer: SocketAddr,
    cancel: CancellationToken,
    done: oneshot::Receiver<()>,
    abort: AbortHandle,
}

#[derive(Default)]
struct SessionState {
    active: Option<ProducerSlot>,
    generation: u64,
}

/// What a streaming task owns besides its socket
struct Producer {
    generation: u64,
    conn: ConnId,
    peer: SocketAddr,
    cancel: CancellationToken,
    done: oneshot::Sender<()>,
}

/// Relay counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub sessions: u64,
    pub takeovers: u64,
    pub forced_aborts: u64,
    pub frames_received: u64,
}

pub struct VideoRelay {
    config: VideoConfig,
    queue: Arc<FrameQueue>,
    state: Mutex<SessionState>,
    /// Held across the whole Starting phase, including the wait for the
    /// previous producer
    handoff: tokio::sync::Mutex<()>,
    takeovers: AtomicU64,
    forced_aborts: AtomicU64,
    frames_received: AtomicU64,
}

impl VideoRelay {
    pub fn new(config: VideoConfig) -> Self {
        let queue = Arc::new(FrameQueue::new(config.queue_capacity));
        Self {
            config,
            queue,
            state: Mutex::new(SessionState::default()),
            handoff: tokio::sync::Mutex::new(()),
            takeovers: AtomicU64::new(0),
            forced_aborts: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }

    /// Connection currently producing, if any
    pub fn active_producer(&self) -> Option<ConnId> {
        self.state.lock().active.as_ref().map(|slot| slot.conn)
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active.is_some()
    }

    /// Number of sessions ever started
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            sessions: self.generation(),
            takeovers: self.takeovers.load(Ordering::Relaxed),
            forced_aborts: self.forced_aborts.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
        }
    }

    /// Starting phase for a new video connection.
    ///
    /// Returns once the previous producer has fully exited and this one's
    /// streaming task is spawned on `tracker`. Returns the new generation,
    /// or `None` if the server stopped while waiting.
    pub async fn start<S>(
        self: &Arc<Self>,
        conn: ConnId,
        peer: SocketAddr,
        stream: S,
        tracker: &TaskTracker,
        shutdown: &Shutdown,
    ) -> Option<u64>
    where
        S: AsyncRead + Unpin + Send + 'static,
    {
        let _handoff = self.handoff.lock().await;
        if !shutdown.is_running() {
            return None;
        }

        let previous = self.state.lock().active.take();
        if let Some(previous) = previous {
            self.evict(previous).await;
        }

        let cancel = shutdown.child_token();
        let (done_tx, done_rx) = oneshot::channel();
        let mut state = self.state.lock();
        state.generation += 1;
        let generation = state.generation;
        self.queue.begin_stoppable_session(generation, cancel.clone());

        let producer = Producer {
            generation,
            conn,
            peer,
            cancel: cancel.clone(),
            done: done_tx,
        };
        // Spawned under the state lock so the task cannot reach Ending before
        // its slot is recorded.
        let handle = tracker.spawn(
            self.clone()
                .stream_frames(producer, stream)
                .in_current_span(),
        );
        state.active = Some(ProducerSlot {
            generation,
            conn,
            peer,
            cancel,
            done: done_rx,
            abort: handle.abort_handle(),
        });
        drop(state);

        tracing::info!("Video session {} claimed by {}", generation, peer);
        Some(generation)
    }

    /// Force the previous producer out and wait until its task is gone
    async fn evict(&self, mut previous: ProducerSlot) {
        tracing::info!(
            "Video takeover: stopping producer {} (conn {}, generation {})",
            previous.peer,
            previous.conn,
            previous.generation
        );
        self.takeovers.fetch_add(1, Ordering::Relaxed);
        previous.cancel.cancel();

        let timeout = self.config.takeover_timeout();
        if tokio::time::timeout(timeout, &mut previous.done).await.is_err() {
            let err = VideoError::TakeoverTimeout {
                generation: previous.generation,
                timeout_ms: self.config.takeover_timeout_ms,
            };
            tracing::warn!("{}; aborting it", err);
            self.forced_aborts.fetch_add(1, Ordering::Relaxed);
            previous.abort.abort();
            // Resolves once the aborted future, and with it the socket, is dropped.
            let _ = previous.done.await;
        }
    }

    /// Streaming and Ending phases
    async fn stream_frames<S>(self: Arc<Self>, producer: Producer, mut stream: S)
    where
        S: AsyncRead + Unpin,
    {
        tracing::info!("Video streaming started from {}", producer.peer);
        let reason = self.frame_loop(&producer, &mut stream).await;
        match &reason {
            EndReason::Finished => {
                tracing::info!("End of video stream from {}", producer.peer)
            }
            EndReason::Cancelled => {
                tracing::info!("Video stream from {} cancelled", producer.peer)
            }
            EndReason::Disconnected(e) => {
                tracing::info!("Video stream from {} lost: {}", producer.peer, e)
            }
            EndReason::Violation(e) => {
                tracing::warn!("Video stream from {} rejected: {}", producer.peer, e)
            }
        }

        // Ending
        {
            let mut state = self.state.lock();
            let still_ours = state
                .active
                .as_ref()
                .map_or(false, |slot| slot.generation == producer.generation);
            if still_ours {
                state.active = None;
            }
        }
        self.queue.end_session(producer.generation);
        drop(stream);
        tracing::info!("Video streaming ended from {}", producer.peer);
        let _ = producer.done.send(());
    }

    async fn frame_loop<S>(&self, producer: &Producer, stream: &mut S) -> EndReason
    where
        S: AsyncRead + Unpin,
    {
        let mut sequence = 0u64;
        loop {
            let header = tokio::select! {
                biased;
                _ = producer.cancel.cancelled() => return EndReason::Cancelled,
                r = FrameHeader::read_from(stream) => r,
            };
            let len = match header {
                Ok(FrameHeader::End) => return EndReason::Finished,
                Ok(FrameHeader::Data(len)) => len,
                Err(e) => return EndReason::Disconnected(e),
            };
            if len > self.config.max_frame_len {
                return EndReason::Violation(ProtocolError::FrameTooLarge {
                    len: u64::from(len),
                    limit: u64::from(self.config.max_frame_len),
                });
            }

            let payload = tokio::select! {
                biased;
                _ = producer.cancel.cancelled() => return EndReason::Cancelled,
                r = read_exact_vec(stream, len as usize) => match r {
                    Ok(payload) => payload,
                    Err(e) => return EndReason::Disconnected(e),
                },
            };
            if producer.cancel.is_cancelled() {
                return EndReason::Cancelled;
            }

            self.frames_received.fetch_add(1, Ordering::Relaxed);
            self.queue.push(VideoFrame {
                generation: producer.generation,
                sequence,
                payload: Bytes::from(payload),
            });
            sequence += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::{encode_video_end, encode_video_frame};
    use crate::video::display::{spawn_display, FrameSink, SinkFlow};
    use crate::video::queue::Pull;
    use std::pin::Pin;
    use std::sync::atomic::AtomicBool;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream, ReadBuf};

    fn relay() -> Arc<VideoRelay> {
        Arc::new(VideoRelay::new(VideoConfig {
            max_frame_len: 1024,
            ..VideoConfig::default()
        }))
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 2], port))
    }

    async fn connect(
        relay: &Arc<VideoRelay>,
        conn: ConnId,
        tracker: &TaskTracker,
        shutdown: &Shutdown,
    ) -> (DuplexStream, u64) {
        let (client, server) = duplex(64 * 1024);
        let generation = relay
            .start(conn, peer(conn as u16), server, tracker, shutdown)
            .await
            .unwrap();
        (client, generation)
    }

    async fn until<F: Fn() -> bool>(cond: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition");
    }

    #[tokio::test]
    async fn test_frames_reach_queue() {
        let relay = relay();
        let tracker = TaskTracker::new();
        let shutdown = Shutdown::new();
        let (mut client, generation) = connect(&relay, 1, &tracker, &shutdown).await;
        assert_eq!(generation, 1);
        assert_eq!(relay.active_producer(), Some(1));

        client.write_all(&encode_video_frame(b"frame-0").unwrap()).await.unwrap();
        until(|| relay.queue().len() == 1).await;
        match relay.queue().pull(Duration::ZERO) {
            Pull::Frame(f) => {
                assert_eq!(f.payload, Bytes::from_static(b"frame-0"));
                assert_eq!((f.generation, f.sequence), (1, 0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_length_ends_session() {
        let relay = relay();
        let tracker = TaskTracker::new();
        let shutdown = Shutdown::new();
        let (mut client, _) = connect(&relay, 1, &tracker, &shutdown).await;

        client.write_all(&encode_video_frame(b"a").unwrap()).await.unwrap();
        client.write_all(&encode_video_end()).await.unwrap();
        until(|| !relay.is_active()).await;

        assert!(!relay.queue().is_active());
        assert_eq!(relay.stats().frames_received, 1);
        assert!(matches!(relay.queue().pull(Duration::ZERO), Pull::Frame(_)));
        assert_eq!(relay.queue().pull(Duration::ZERO), Pull::Inactive);

        // server side hung up
        let mut buf = [0u8; 1];
        assert_eq!(tokio::io::AsyncReadExt::read(&mut client, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let relay = relay();
        let tracker = TaskTracker::new();
        let shutdown = Shutdown::new();
        let (mut client, _) = connect(&relay, 1, &tracker, &shutdown).await;

        client.write_all(&4096u32.to_be_bytes()).await.unwrap();
        until(|| !relay.is_active()).await;
        assert!(relay.queue().is_empty());
    }

    #[tokio::test]
    async fn test_takeover_joins_previous_producer() {
        let relay = relay();
        let tracker = TaskTracker::new();
        let shutdown = Shutdown::new();
        let (mut first, g1) = connect(&relay, 1, &tracker, &shutdown).await;
        first.write_all(&encode_video_frame(b"old").unwrap()).await.unwrap();
        until(|| relay.stats().frames_received == 1).await;

        let (mut second, g2) = connect(&relay, 2, &tracker, &shutdown).await;
        assert_eq!(g2, g1 + 1);
        assert_eq!(relay.active_producer(), Some(2));
        assert_eq!(relay.stats().takeovers, 1);

        // the first producer's socket is already closed
        let mut buf = [0u8; 1];
        assert_eq!(tokio::io::AsyncReadExt::read(&mut first, &mut buf).await.unwrap(), 0);
        // and its leftovers were purged
        assert!(relay.queue().is_empty());

        second.write_all(&encode_video_frame(b"new").unwrap()).await.unwrap();
        until(|| relay.queue().len() == 1).await;
        assert_eq!(relay.queue().pending_generations(), vec![g2]);

        // late frames on the old socket go nowhere
        let _ = first.write_all(&encode_video_frame(b"late").unwrap()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(relay.queue().pending_generations(), vec![g2]);
        assert!(relay.queue().is_active());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_producer() {
        let relay = relay();
        let tracker = TaskTracker::new();
        let shutdown = Shutdown::new();
        let (_client, _) = connect(&relay, 1, &tracker, &shutdown).await;

        shutdown.trigger();
        tracker.close();
        tokio::time::timeout(Duration::from_secs(2), tracker.wait())
            .await
            .unwrap();
        assert!(!relay.is_active());

        let (_c, server) = duplex(16);
        assert!(relay.start(9, peer(9), server, &tracker, &shutdown).await.is_none());
    }

    struct CloseAfterFirst;

    impl FrameSink for CloseAfterFirst {
        fn show(&mut self, _frame: &VideoFrame) -> Result<SinkFlow, VideoError> {
            Ok(SinkFlow::Close)
        }
    }

    #[tokio::test]
    async fn test_viewer_close_ends_producer() {
        let relay = relay();
        let tracker = TaskTracker::new();
        let shutdown = Shutdown::new();
        let display = spawn_display(
            relay.queue().clone(),
            Box::new(CloseAfterFirst),
            Duration::from_millis(5),
        )
        .unwrap();

        let (mut client, _) = connect(&relay, 1, &tracker, &shutdown).await;
        client.write_all(&encode_video_frame(b"only").unwrap()).await.unwrap();
        until(|| !relay.is_active()).await;
        assert!(!relay.queue().is_active());

        let mut buf = [0u8; 1];
        assert_eq!(tokio::io::AsyncReadExt::read(&mut client, &mut buf).await.unwrap(), 0);

        // the next producer gets a fresh session
        let (_next, generation) = connect(&relay, 2, &tracker, &shutdown).await;
        assert_eq!(generation, 2);
        assert_eq!(relay.stats().takeovers, 0);

        relay.queue().close();
        let stats = tokio::task::spawn_blocking(move || display.join())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.stops_requested, 1);
    }

    /// Blocks its worker thread on every poll, so cancellation is not seen in time
    struct Stall(Arc<AtomicBool>);

    impl AsyncRead for Stall {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            self.0.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stuck_producer_is_aborted() {
        let relay = Arc::new(VideoRelay::new(VideoConfig {
            takeover_timeout_ms: 50,
            ..VideoConfig::default()
        }));
        let tracker = TaskTracker::new();
        let shutdown = Shutdown::new();
        let entered = Arc::new(AtomicBool::new(false));
        relay
            .start(1, peer(1), Stall(entered.clone()), &tracker, &shutdown)
            .await
            .unwrap();
        until(|| entered.load(Ordering::SeqCst)).await;

        let (_second, generation) = connect(&relay, 2, &tracker, &shutdown).await;
        assert_eq!(generation, 2);
        assert_eq!(relay.active_producer(), Some(2));
        let stats = relay.stats();
        assert_eq!(stats.takeovers, 1);
        assert_eq!(stats.forced_aborts, 1);

        shutdown.trigger();
        tracker.close();
        tokio::time::timeout(Duration::from_secs(2), tracker.wait())
            .await
            .unwrap();
    }
}
