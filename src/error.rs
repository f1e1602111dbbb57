//! Error types for the session server

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("Video error: {0}")]
    Video(#[from] VideoError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire-level violations. The offending connection is closed, nothing else happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown mode tag: {0}")]
    UnknownMode(u8),

    #[error("Invalid file name length: {0}")]
    InvalidNameLength(u32),

    #[error("Frame too large: {len} bytes (limit {limit})")]
    FrameTooLarge { len: u64, limit: u64 },

    #[error("Empty video frame (length 0 is the end-of-stream marker)")]
    EmptyFrame,
}

/// Chat roster errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Roster full ({capacity} members)")]
    RosterFull { capacity: usize },

    #[error("Already a member: connection {0}")]
    AlreadyMember(u64),
}

/// Video relay errors
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Previous producer (generation {generation}) did not exit within {timeout_ms} ms")]
    TakeoverTimeout { generation: u64, timeout_ms: u64 },

    #[error("Frame sink error: {0}")]
    Sink(String),
}

/// Audio output errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device error: {0}")]
    Device(String),

    #[error("Playback queue full")]
    QueueFull,

    #[error("Playback stopped")]
    Stopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on {addr}: {source}")]
    BindFailed {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
