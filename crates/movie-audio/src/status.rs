use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::device::SourceState;
use crate::format::OutputFormat;

/// Underrun counters updated by the reader and read by status snapshots.
#[derive(Debug, Default)]
pub struct SessionCounters {
    underrun_events: AtomicU64,
    padded_frames: AtomicU64,
}

impl SessionCounters {
    pub fn record_padding(&self, frames: usize) {
        self.underrun_events.fetch_add(1, Ordering::Relaxed);
        self.padded_frames
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn underrun_events(&self) -> u64 {
        self.underrun_events.load(Ordering::Relaxed)
    }

    pub fn padded_frames(&self) -> u64 {
        self.padded_frames.load(Ordering::Relaxed)
    }
}

/// Why the playback loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// The stream was exhausted and the device could not be restarted.
    Eof,
    /// Quit was requested.
    Stopped,
    /// The device reported an error.
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
    pub clock_ms: u64,
    pub state: SourceState,
    pub buffers_queued: usize,
    pub ring_size: usize,
    pub output_format: OutputFormat,
    pub sample_rate: u32,
    pub underrun_events: u64,
    pub padded_frames: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<SessionEndReason>,
}
