//! Wire protocol shared by server and client
//!
//! TCP connections open with one mode byte; UDP datagrams are raw PCM16 or
//! the `STOP_AUDIO` control literal.

pub mod wire;

use std::fmt;

use crate::error::ProtocolError;

pub use wire::{FileHeader, FrameHeader};

/// Control datagram that ends a voice session
pub const STOP_AUDIO: &[u8] = b"STOP_AUDIO";

/// Handler selected by the leading byte of a TCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Mode {
    Chat = 1,
    File = 2,
    Video = 3,
}

impl Mode {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Mode {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Mode::Chat),
            2 => Ok(Mode::File),
            3 => Ok(Mode::Video),
            other => Err(ProtocolError::UnknownMode(other)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Chat => "chat",
            Mode::File => "file",
            Mode::Video => "video",
        })
    }
}

/// True if a datagram is the voice control literal
pub fn is_stop_audio(datagram: &[u8]) -> bool {
    datagram == STOP_AUDIO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_tags() {
        for mode in [Mode::Chat, Mode::File, Mode::Video] {
            assert_eq!(Mode::try_from(mode.tag()).unwrap(), mode);
        }
        assert_eq!(Mode::try_from(0), Err(ProtocolError::UnknownMode(0)));
        assert_eq!(Mode::try_from(4), Err(ProtocolError::UnknownMode(4)));
    }

    #[test]
    fn test_stop_audio_is_exact() {
        assert!(is_stop_audio(b"STOP_AUDIO"));
        assert!(!is_stop_audio(b"STOP_AUDIO\0"));
        assert!(!is_stop_audio(b"STOP_AUDI"));
        assert!(!is_stop_audio(b"stop_audio"));
    }
}
