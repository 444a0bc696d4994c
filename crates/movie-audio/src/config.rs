use std::time::Duration;

/// Playback tuning parameters shared by the decode, resample and device stages.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Nominal playback duration of one device buffer.
    pub buffer_time: Duration,
    /// Number of device buffers in the ring.
    pub buffer_count: usize,
    /// Rate converter input chunk size in frames (only used when the device rate differs).
    pub chunk_frames: usize,
    /// Max compressed packets held by a [`crate::packet::PacketQueue`].
    pub packet_queue_len: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            buffer_time: Duration::from_millis(20),
            buffer_count: 4,
            chunk_frames: 1024,
            packet_queue_len: 64,
        }
    }
}

impl PlaybackConfig {
    /// Whole frames in one device buffer at `sample_rate`.
    pub fn buffer_frames(&self, sample_rate: u32) -> usize {
        let frames = u128::from(sample_rate) * self.buffer_time.as_nanos() / 1_000_000_000;
        usize::try_from(frames).unwrap_or(usize::MAX).max(1)
    }

    /// How long the playback loop sleeps between polls: a third of one buffer.
    pub fn poll_interval(&self) -> Duration {
        self.buffer_time / 3
    }

    /// Ring size, never zero.
    pub fn ring_size(&self) -> usize {
        self.buffer_count.max(1)
    }
}
