//! Server configuration
//!
//! Defaults first, then a TOML file (`HUDDLE_CONFIG`, or `server.toml` in the
//! platform config directory), then environment overrides:
//! `HUDDLE_TCP_PORT`, `HUDDLE_UDP_PORT`, `HUDDLE_UPLOAD_DIR`.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub chat: ChatConfig,
    pub file: FileConfig,
    pub video: VideoConfig,
    pub voice: VoiceConfig,
}

/// Listening sockets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Address both sockets bind to
    pub bind_address: IpAddr,
    /// Multiplexed TCP port (chat, file, video)
    pub tcp_port: u16,
    /// Voice UDP port
    pub udp_port: u16,
    /// TCP listen backlog
    pub listen_backlog: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
        }
    }
}

impl NetworkConfig {
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.tcp_port)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.udp_port)
    }

    /// Loopback with OS-assigned ports, for tests and embedding
    pub fn ephemeral() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            tcp_port: 0,
            udp_port: 0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChatConfig {
    /// Maximum roster size
    pub max_clients: usize,
    /// Receive chunk size in bytes
    pub recv_buffer: usize,
    /// Chunks queued per member; a member whose queue is full misses broadcasts
    pub outbox_depth: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_clients: MAX_CHAT_CLIENTS,
            recv_buffer: CHAT_RECV_BUFFER,
            outbox_depth: CHAT_OUTBOX_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Directory uploads are written into
    pub upload_dir: PathBuf,
    /// Copy chunk size in bytes
    pub chunk_size: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("."),
            chunk_size: FILE_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VideoConfig {
    /// Frame queue depth, 2 by default. The oldest frame is evicted past this,
    /// so raising it adds display latency. Values below 1 are treated as 1.
    pub queue_capacity: usize,
    /// Largest accepted frame payload
    pub max_frame_len: u32,
    /// How long a new producer waits for the previous one to exit
    pub takeover_timeout_ms: u64,
    /// Consumer poll interval
    pub poll_interval_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            queue_capacity: FRAME_QUEUE_CAPACITY,
            max_frame_len: MAX_VIDEO_FRAME_LEN,
            takeover_timeout_ms: 2000,
            poll_interval_ms: 30,
        }
    }
}

impl VideoConfig {
    pub fn takeover_timeout(&self) -> Duration {
        Duration::from_millis(self.takeover_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VoiceConfig {
    /// Datagram receive buffer in bytes
    pub recv_buffer: usize,
    /// Blocks buffered between the UDP loop and the audio device
    pub playback_queue: usize,
    /// Sample rate of the PCM16 mono stream the client sends
    pub sample_rate: u32,
    /// Samples per datagram the client sends
    pub frames_per_block: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            recv_buffer: VOICE_RECV_BUFFER,
            playback_queue: 64,
            sample_rate: VOICE_SAMPLE_RATE,
            frames_per_block: VOICE_FRAMES_PER_BLOCK,
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&s)
    }

    /// Defaults, then config file (if any), then environment
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::from_file(&path)?
            }
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `HUDDLE_*` overrides from the given lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(s) = lookup("HUDDLE_TCP_PORT") {
            self.network.tcp_port = parse_port("HUDDLE_TCP_PORT", &s)?;
        }
        if let Some(s) = lookup("HUDDLE_UDP_PORT") {
            self.network.udp_port = parse_port("HUDDLE_UDP_PORT", &s)?;
        }
        if let Some(s) = lookup("HUDDLE_UPLOAD_DIR") {
            self.file.upload_dir = PathBuf::from(s);
        }
        Ok(())
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|e| Error::Config(format!("{}={:?}: {}", key, value, e)))
}

/// Explicit `HUDDLE_CONFIG`, else `<config dir>/lan-huddle/server.toml`
pub fn config_path() -> Option<PathBuf> {
    if let Some(p) = std::env::var_os("HUDDLE_CONFIG") {
        return Some(PathBuf::from(p));
    }
    directories::ProjectDirs::from("", "", "lan-huddle")
        .map(|dirs| dirs.config_dir().join("server.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_wire_constants() {
        let config = ServerConfig::default();
        assert_eq!(config.network.tcp_port, 5000);
        assert_eq!(config.network.udp_port, 7000);
        assert_eq!(config.chat.max_clients, 50);
        assert_eq!(config.chat.recv_buffer, 1024);
        assert_eq!(config.file.chunk_size, 4096);
        assert_eq!(config.video.queue_capacity, 2);
        assert_eq!(config.chat.outbox_depth, 64);
        assert_eq!(config.voice.sample_rate, 44_100);
        assert_eq!(config.voice.frames_per_block, 512);
    }

    #[test]
    fn test_tuning_knobs_from_toml() {
        let config = ServerConfig::from_toml(
            r#"
            [chat]
            outbox_depth = 8

            [video]
            queue_capacity = 4

            [voice]
            sample_rate = 8000
            frames_per_block = 160
            "#,
        )
        .unwrap();
        assert_eq!(config.chat.outbox_depth, 8);
        assert_eq!(config.video.queue_capacity, 4);
        assert_eq!(config.voice.sample_rate, 8000);
        assert_eq!(config.voice.frames_per_block, 160);
        assert_eq!(config.video.max_frame_len, MAX_VIDEO_FRAME_LEN);
    }

    #[test]
    fn test_partial_toml() {
        let config = ServerConfig::from_toml(
            r#"
            [network]
            tcp_port = 6000

            [chat]
            max_clients = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.network.tcp_port, 6000);
        assert_eq!(config.network.udp_port, 7000);
        assert_eq!(config.chat.max_clients, 3);
        assert_eq!(config.chat.recv_buffer, 1024);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ServerConfig::from_toml("[chat]\nmax_client = 3\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config
            .apply_env(|key| match key {
                "HUDDLE_TCP_PORT" => Some("5100".into()),
                "HUDDLE_UPLOAD_DIR" => Some("/tmp/uploads".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.network.tcp_port, 5100);
        assert_eq!(config.network.udp_port, 7000);
        assert_eq!(config.file.upload_dir, PathBuf::from("/tmp/uploads"));
    }

    #[test]
    fn test_bad_env_port() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_env(|key| (key == "HUDDLE_UDP_PORT").then(|| "seventy".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
