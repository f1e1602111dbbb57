//! Client side of each mode
//!
//! Thin wrappers that speak the wire format. Used by `huddle-client` and the
//! integration tests.

use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::config::VoiceConfig;
use crate::error::{NetworkError, ProtocolError, Result};
use crate::protocol::wire::{encode_video_end, encode_video_frame, FileHeader};
use crate::protocol::{Mode, STOP_AUDIO};

/// Open a TCP connection and announce `mode`
pub async fn connect(addr: SocketAddr, mode: Mode) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?;
    stream.set_nodelay(true)?;
    stream.write_u8(mode.tag()).await?;
    Ok(stream)
}

/// Upload `size` bytes from `reader` as `name`.
///
/// Returns the body bytes actually sent. Fewer than `size` means `reader` ran
/// dry and the server will record an incomplete transfer.
pub async fn send_file<R>(addr: SocketAddr, name: &str, reader: R, size: u64) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let header = FileHeader::new(name, size).encode()?;
    let mut stream = connect(addr, Mode::File).await?;
    stream.write_all(&header).await?;

    let mut body = reader.take(size);
    let sent = tokio::io::copy(&mut body, &mut stream).await?;
    stream.shutdown().await?;
    tracing::info!("Sent file: {} ({}/{} bytes)", name, sent, size);
    Ok(sent)
}

/// Upload a file from disk under its own file name
pub async fn send_file_path(addr: SocketAddr, path: &Path) -> Result<u64> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ProtocolError::InvalidNameLength(0))?;
    let file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    send_file(addr, &name, file, size).await
}

/// One video producer connection
pub struct VideoPublisher {
    stream: TcpStream,
    frames_sent: u64,
}

impl VideoPublisher {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            stream: connect(addr, Mode::Video).await?,
            frames_sent: 0,
        })
    }

    /// Send one encoded frame. Empty payloads are refused since length 0
    /// would end the stream.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(ProtocolError::EmptyFrame.into());
        }
        self.stream.write_all(&encode_video_frame(payload)?).await?;
        self.frames_sent += 1;
        Ok(())
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Send the end-of-stream marker and close
    pub async fn finish(mut self) -> Result<()> {
        self.stream.write_all(&encode_video_end()).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Underlying stream, e.g. to watch for a takeover closing it
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

/// Sends PCM16 blocks to the voice port
pub struct VoiceSender {
    socket: UdpSocket,
    target: SocketAddr,
    blocks_sent: u64,
}

impl VoiceSender {
    /// Bind an ephemeral local port of the same family as `target`
    pub async fn connect(target: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket
            .connect(target)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", target, e)))?;
        Ok(Self {
            socket,
            target,
            blocks_sent: 0,
        })
    }

    pub async fn send_block(&mut self, pcm: &[u8]) -> Result<()> {
        self.socket.send(pcm).await?;
        self.blocks_sent += 1;
        Ok(())
    }

    pub fn blocks_sent(&self) -> u64 {
        self.blocks_sent
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// End the session with the `STOP_AUDIO` datagram
    pub async fn stop(self) -> Result<()> {
        self.socket.send(STOP_AUDIO).await?;
        tracing::info!("Sent STOP_AUDIO to {}", self.target);
        Ok(())
    }
}

/// Sine tone as PCM16 little-endian mono, block by block
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    frequency: f32,
    sample_rate: u32,
    frames_per_block: usize,
    amplitude: f32,
    position: u64,
}

impl ToneGenerator {
    pub fn new(frequency: f32, sample_rate: u32, frames_per_block: usize) -> Self {
        Self {
            frequency,
            sample_rate: sample_rate.max(1),
            frames_per_block: frames_per_block.max(1),
            amplitude: 0.25,
            position: 0,
        }
    }

    /// Tone in the stream format of the `[voice]` config section
    pub fn from_config(frequency: f32, config: &VoiceConfig) -> Self {
        Self::new(frequency, config.sample_rate, config.frames_per_block)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames_per_block(&self) -> usize {
        self.frames_per_block
    }

    /// Playback time of one block, i.e. the send interval
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_block as f64 / f64::from(self.sample_rate))
    }

    /// Next block, `2 * frames_per_block` bytes
    pub fn next_block(&mut self) -> Bytes {
        let frames = self.frames_per_block;
        let mut out = BytesMut::with_capacity(frames * 2);
        let step = std::f32::consts::TAU * self.frequency / self.sample_rate as f32;
        for _ in 0..frames {
            // wrap to keep the phase argument small
            let n = (self.position % self.sample_rate as u64) as f32;
            let sample = (n * step).sin() * self.amplitude * i16::MAX as f32;
            out.put_i16_le(sample as i16);
            self.position += 1;
        }
        out.freeze()
    }
}
