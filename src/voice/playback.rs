//! Playback thread between the UDP loop and the audio device
//!
//! Blocks cross a bounded channel. When the device falls behind, new blocks
//! are dropped and counted instead of stalling the network loop.

use bytes::Bytes;
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::AudioError;
use crate::voice::device::AudioDevice;

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    played: AtomicU64,
    overflow: AtomicU64,
    device_errors: AtomicU64,
}

/// Playback counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub queued: u64,
    pub played: u64,
    pub overflow: u64,
    pub device_errors: u64,
}

pub struct Playback {
    tx: Option<Sender<Bytes>>,
    thread_handle: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl Playback {
    /// Start the playback thread with room for `depth` pending blocks
    pub fn start(mut device: Box<dyn AudioDevice>, depth: usize) -> Result<Self, AudioError> {
        let (tx, rx) = bounded::<Bytes>(depth.max(1));
        let counters = Arc::new(Counters::default());
        let thread_counters = counters.clone();
        let name = device.name();
        tracing::info!("Using audio output device: {}", name);

        let handle = thread::Builder::new()
            .name("voice-playback".into())
            .spawn(move || {
                // Ends once every sender is gone
                for block in rx.iter() {
                    match device.play(&block) {
                        Ok(()) => {
                            thread_counters.played.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            thread_counters.device_errors.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!("Audio device {} failed: {}", name, e);
                        }
                    }
                }
                if let Err(e) = device.flush() {
                    tracing::warn!("Audio device {} flush failed: {}", name, e);
                }
            })
            .map_err(|e| AudioError::Device(e.to_string()))?;

        Ok(Self {
            tx: Some(tx),
            thread_handle: Some(handle),
            counters,
        })
    }

    /// Queue one block without blocking
    pub fn submit(&self, block: Bytes) -> Result<(), AudioError> {
        let tx = self.tx.as_ref().ok_or(AudioError::Stopped)?;
        match tx.try_send(block) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.overflow.fetch_add(1, Ordering::Relaxed);
                Err(AudioError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(AudioError::Stopped),
        }
    }

    /// Let the thread drain what is queued, then join it
    pub fn stop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.tx.is_some()
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            played: self.counters.played.load(Ordering::Relaxed),
            overflow: self.counters.overflow.load(Ordering::Relaxed),
            device_errors: self.counters.device_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.stop();
    }
}
