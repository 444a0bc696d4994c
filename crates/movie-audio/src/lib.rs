//! Audio output pipeline for a movie player.
//!
//! Compressed packets are decoded, converted to one of four device PCM formats and streamed
//! through a small ring of device buffers. The session keeps a presentation clock that the
//! video side reads to stay in sync with what is actually being heard.

pub mod backlog;
pub mod clock;
pub mod codec;
pub mod config;
pub mod cpal_source;
pub mod decode;
pub mod demux;
pub mod device;
pub mod error;
pub mod format;
pub mod packet;
pub mod quit;
pub mod reader;
pub mod resample;
pub mod ring;
pub mod session;
pub mod status;

#[cfg(test)]
mod testing;

pub use config::PlaybackConfig;
pub use error::{CodecError, DeviceError, SetupError};
pub use quit::QuitFlag;
pub use session::AudioSession;
