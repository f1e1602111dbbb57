//! Audio output devices
//!
//! The relay only needs something that accepts PCM16 mono blocks. Hardware
//! playback plugs in through [`AudioDevice`].

use bytes::Bytes;
use crossbeam_channel::Sender;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::AudioError;

/// Sink for raw PCM16 blocks, called from the playback thread
pub trait AudioDevice: Send {
    /// Human-readable name for logs
    fn name(&self) -> String;

    fn play(&mut self, pcm: &[u8]) -> Result<(), AudioError>;

    /// Called when the playback thread stops
    fn flush(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Drops every block
#[derive(Debug, Default)]
pub struct NullDevice;

impl AudioDevice for NullDevice {
    fn name(&self) -> String {
        "null".to_string()
    }

    fn play(&mut self, _pcm: &[u8]) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Forwards blocks to another thread
#[derive(Debug, Clone)]
pub struct ChannelDevice {
    tx: Sender<Bytes>,
}

impl ChannelDevice {
    pub fn new(tx: Sender<Bytes>) -> Self {
        Self { tx }
    }
}

impl AudioDevice for ChannelDevice {
    fn name(&self) -> String {
        "channel".to_string()
    }

    fn play(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        self.tx
            .send(Bytes::copy_from_slice(pcm))
            .map_err(|_| AudioError::Device("receiver dropped".to_string()))
    }
}

/// Appends raw samples to a file.
///
/// Play back with `aplay -f S16_LE -r 44100 -c 1 <file>`.
#[derive(Debug)]
pub struct RawFileDevice {
    path: PathBuf,
    out: BufWriter<File>,
}

impl RawFileDevice {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, AudioError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }
}

impl AudioDevice for RawFileDevice {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn play(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        self.out.write_all(pcm)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AudioError> {
        self.out.flush()?;
        Ok(())
    }
}
