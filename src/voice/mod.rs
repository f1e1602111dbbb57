//! Voice mode: PCM16 over UDP into an audio device

pub mod device;
pub mod playback;
pub mod relay;

pub use device::{AudioDevice, ChannelDevice, NullDevice, RawFileDevice};
pub use playback::{Playback, PlaybackStats};
pub use relay::{VoiceRelay, VoiceStats};
