//! Voice UDP relay
//!
//! One receive loop, no per-peer state beyond the latest sender. A session
//! starts implicitly with the first audio datagram and ends with the literal
//! `STOP_AUDIO` datagram. Audio that happens to equal those ten bytes is
//! taken as the control message.

use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::config::VoiceConfig;
use crate::error::AudioError;
use crate::protocol::{is_stop_audio, STOP_AUDIO};
use crate::server::Shutdown;
use crate::voice::playback::Playback;

/// Pause before restarting after a receive error
const RESTART_DELAY: Duration = Duration::from_millis(50);

/// Shared voice session state and counters
#[derive(Debug, Default)]
pub struct VoiceStats {
    active: AtomicBool,
    peer: Mutex<Option<SocketAddr>>,
    sessions_started: AtomicU64,
    sessions_ended: AtomicU64,
    blocks_forwarded: AtomicU64,
    blocks_dropped: AtomicU64,
    restarts: AtomicU64,
}

impl VoiceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Latest peer that sent audio
    pub fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    pub fn sessions_ended(&self) -> u64 {
        self.sessions_ended.load(Ordering::Relaxed)
    }

    pub fn blocks_forwarded(&self) -> u64 {
        self.blocks_forwarded.load(Ordering::Relaxed)
    }

    pub fn blocks_dropped(&self) -> u64 {
        self.blocks_dropped.load(Ordering::Relaxed)
    }

    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Record audio from `peer`. True if this starts a new session.
    fn begin(&self, peer: SocketAddr) -> bool {
        *self.peer.lock() = Some(peer);
        if self.active.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// True if a session was active and is now ended.
    fn end(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.sessions_ended.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Why the inner receive loop returned
#[derive(Debug)]
enum LoopExit {
    Shutdown,
    Empty(SocketAddr),
    Error(std::io::Error),
}

pub struct VoiceRelay {
    socket: UdpSocket,
    config: VoiceConfig,
    playback: Playback,
    stats: Arc<VoiceStats>,
    shutdown: Shutdown,
}

impl VoiceRelay {
    pub fn new(
        socket: UdpSocket,
        config: VoiceConfig,
        playback: Playback,
        stats: Arc<VoiceStats>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            socket,
            config,
            playback,
            stats,
            shutdown,
        }
    }

    /// Supervise the receive loop until shutdown, then stop playback
    pub async fn run(self) {
        match self.socket.local_addr() {
            Ok(addr) => tracing::info!("Voice UDP relay listening on {}", addr),
            Err(e) => tracing::warn!("Voice UDP relay started, local address unknown: {}", e),
        }

        let mut buf = vec![0u8; self.config.recv_buffer.max(STOP_AUDIO.len())];
        while self.shutdown.is_running() {
            match self.receive_loop(&mut buf).await {
                LoopExit::Shutdown => break,
                LoopExit::Empty(peer) => {
                    tracing::info!("UDP client {} disconnected (empty datagram)", peer);
                }
                LoopExit::Error(e) => {
                    tracing::error!("Error receiving UDP data: {}", e);
                    tokio::time::sleep(RESTART_DELAY).await;
                }
            }
            self.stats.restarts.fetch_add(1, Ordering::Relaxed);
            if self.stats.end() {
                tracing::info!("Audio session reset after receive loop restart");
            }
        }

        self.stats.end();
        let mut playback = self.playback;
        // join off the async workers
        let stats = tokio::task::spawn_blocking(move || {
            playback.stop();
            playback.stats()
        })
        .await
        .unwrap_or_default();
        tracing::info!(
            "Voice UDP relay stopped ({} blocks played, {} dropped)",
            stats.played,
            stats.overflow
        );
    }

    async fn receive_loop(&self, buf: &mut [u8]) -> LoopExit {
        loop {
            let (n, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => return LoopExit::Shutdown,
                r = self.socket.recv_from(buf) => match r {
                    Ok((0, peer)) => return LoopExit::Empty(peer),
                    Ok(received) => received,
                    Err(e) => return LoopExit::Error(e),
                },
            };
            self.on_datagram(&buf[..n], peer);
        }
    }

    fn on_datagram(&self, datagram: &[u8], peer: SocketAddr) {
        if is_stop_audio(datagram) {
            if self.stats.end() {
                tracing::info!("Audio streaming ended by client: {}", peer);
            } else {
                tracing::info!("Received STOP_AUDIO before session started from {}", peer);
            }
            return;
        }

        if self.stats.begin(peer) {
            tracing::info!("Audio streaming started from {}", peer);
        }
        match self.playback.submit(Bytes::copy_from_slice(datagram)) {
            Ok(()) => {
                self.stats.blocks_forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(AudioError::QueueFull) => {
                self.stats.blocks_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Playback queue full, dropped block from {}", peer);
            }
            Err(e) => {
                self.stats.blocks_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Playback unavailable: {}", e);
            }
        }
    }
}
