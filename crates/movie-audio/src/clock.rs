use std::time::Duration;

use crate::device::{DeviceSnapshot, SourceState};

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Timestamp of the next sample to be produced by the decode side.
///
/// Reset from the pts of each decoded frame and advanced as frames are handed to the
/// device, so it always runs ahead of what the listener hears by roughly the queued audio.
/// [`PresentationClock::corrected`] subtracts that lead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PresentationClock {
    pts_ns: i64,
}

impl PresentationClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nanos(&self) -> i64 {
        self.pts_ns
    }

    pub fn reset_to(&mut self, pts_ns: i64) {
        self.pts_ns = pts_ns;
    }

    pub fn advance_frames(&mut self, frames: usize, sample_rate: u32) {
        if sample_rate == 0 {
            return;
        }
        let step = frames as i128 * NANOS_PER_SEC / i128::from(sample_rate);
        self.pts_ns = self
            .pts_ns
            .saturating_add(i64::try_from(step).unwrap_or(i64::MAX));
    }

    /// Position of the sample currently coming out of the device.
    ///
    /// When the source is not stopped, the queued buffers are subtracted and the device's
    /// sample offset within them added back. Never negative.
    pub fn corrected(
        &self,
        device: &DeviceSnapshot,
        buffer_time: Duration,
        sample_rate: u32,
    ) -> Duration {
        let mut ns = i128::from(self.pts_ns);
        if device.state != SourceState::Stopped {
            ns -= buffer_time.as_nanos() as i128 * device.queued as i128;
            if sample_rate > 0 {
                ns += device.sample_offset as i128 * NANOS_PER_SEC / i128::from(sample_rate);
            }
        }
        Duration::from_nanos(u64::try_from(ns.max(0)).unwrap_or(u64::MAX))
    }
}
