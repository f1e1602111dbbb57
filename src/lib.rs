//! # LAN Huddle
//!
//! A LAN communication hub: chat, file drop, live video and voice on one box.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                                HUB                                       │
//! │                                                                          │
//! │   TCP :5000 (one port, first byte picks the mode)                        │
//! │  ┌───────────────┐     ┌──────────────────────────────────────────────┐ │
//! │  │   Acceptor    │────▶│  Dispatcher (server::acceptor)               │ │
//! │  │ task per conn │     │  0x01 chat │ 0x02 file │ 0x03 video │ else ✗ │ │
//! │  └───────────────┘     └──────┬───────────┬────────────┬──────────────┘ │
//! │                               │           │            │                │
//! │                               ▼           ▼            ▼                │
//! │  ┌─────────────────────┐ ┌──────────┐ ┌──────────────────────────┐     │
//! │  │ ChatRoster          │ │ ingest   │ │ VideoRelay               │     │
//! │  │ per-member outboxes │ │ upload/  │ │ single producer,         │     │
//! │  │ relay to all others │ │          │ │ takeover on connect      │     │
//! │  └─────────────────────┘ └──────────┘ └────────────┬─────────────┘     │
//! │                                                    │ generation-tagged  │
//! │                                                    ▼                    │
//! │                                        ┌──────────────────────────┐     │
//! │                                        │ FrameQueue (cap 2)       │     │
//! │                                        └────────────┬─────────────┘     │
//! │                                                     ▼                   │
//! │                                        ┌──────────────────────────┐     │
//! │                                        │ display thread → Sink    │     │
//! │                                        └──────────────────────────┘     │
//! │                                                                          │
//! │   UDP :7000                                                              │
//! │  ┌──────────────────────────┐    ┌─────────────────┐   ┌─────────────┐  │
//! │  │ VoiceRelay               │───▶│ Playback thread │──▶│ AudioDevice │  │
//! │  │ PCM16 blocks/STOP_AUDIO  │    │ bounded queue   │   │             │  │
//! │  └──────────────────────────┘    └─────────────────┘   └─────────────┘  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod file;
pub mod network;
pub mod protocol;
pub mod server;
pub mod video;
pub mod voice;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default TCP port for chat, file and video
    pub const DEFAULT_TCP_PORT: u16 = 5000;

    /// Default UDP port for voice
    pub const DEFAULT_UDP_PORT: u16 = 7000;

    /// Pending-connection backlog on the TCP listener
    pub const DEFAULT_LISTEN_BACKLOG: u32 = 10;

    /// Maximum simultaneous chat members
    pub const MAX_CHAT_CLIENTS: usize = 50;

    /// Read size for chat relaying
    pub const CHAT_RECV_BUFFER: usize = 1024;

    /// Chunks queued per chat member before further broadcasts to it are dropped
    pub const CHAT_OUTBOX_DEPTH: usize = 64;

    /// Read size while copying an upload to disk
    pub const FILE_CHUNK_SIZE: usize = 4096;

    /// Frames waiting for display; the oldest is evicted past this
    pub const FRAME_QUEUE_CAPACITY: usize = 2;

    /// Largest video frame payload accepted
    pub const MAX_VIDEO_FRAME_LEN: u32 = 16 * 1024 * 1024;

    /// Largest voice datagram read in one call
    pub const VOICE_RECV_BUFFER: usize = 4096;

    /// Voice sample rate (PCM16 mono)
    pub const VOICE_SAMPLE_RATE: u32 = 44_100;

    /// Samples per voice datagram sent by the client
    pub const VOICE_FRAMES_PER_BLOCK: usize = 512;
}
