//! Error types shared by the pipeline stages.
//!
//! Only [`SetupError`] ever reaches the caller of [`crate::session::AudioSession::start`].
//! [`CodecError`] carries the two control-flow outcomes (`NeedMore`, `EndOfStream`) next to
//! genuine backend failures, which are logged and skipped by the decode loop.

use thiserror::Error;

/// Outcome of a codec or packet-source call other than success.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The codec wants more input before it can emit a frame, or it cannot accept
    /// more input until its output has been drained.
    #[error("codec needs more data")]
    NeedMore,
    /// No more frames will be produced.
    #[error("end of stream")]
    EndOfStream,
    /// Backend failure (corrupt packet, conversion failure, ...).
    #[error("codec backend error: {0}")]
    Backend(String),
}

/// Error latched by an audio device.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("failed to open audio device: {0}")]
    Open(String),
    #[error("invalid device operation: {0}")]
    InvalidOperation(String),
    #[error("audio stream error: {0}")]
    Stream(String),
}

/// Failure while constructing a playback session. Nothing is played when this is returned.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("cannot determine a channel layout ({channels} channels reported)")]
    ChannelLayout { channels: usize },
    #[error("unsupported audio stream: {0}")]
    Source(String),
    #[error("resampler init failed: {0}")]
    Resampler(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("failed to spawn playback worker: {0}")]
    Spawn(#[from] std::io::Error),
}
