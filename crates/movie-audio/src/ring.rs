use crate::device::{BufferId, DeviceSource};
use crate::error::DeviceError;
use crate::format::TargetFormat;

/// Fixed set of device buffers filled in rotation.
///
/// Buffers are always queued in ring order and the device hands processed ones back from
/// the front of its queue, so the next slot in the rotation is always free once
/// [`BufferRing::reclaim`] has run.
pub struct BufferRing {
    ids: Vec<BufferId>,
    next: usize,
    scratch: Vec<u8>,
}

impl BufferRing {
    pub fn new<D: DeviceSource + ?Sized>(
        device: &mut D,
        count: usize,
        buffer_bytes: usize,
    ) -> Result<Self, DeviceError> {
        let ids = device.generate_buffers(count.max(1))?;
        Ok(Self {
            ids,
            next: 0,
            scratch: vec![0; buffer_bytes],
        })
    }

    /// Number of device buffers in the rotation.
    pub fn slots(&self) -> usize {
        self.ids.len()
    }

    /// Unqueue every buffer the device has finished with.
    pub fn reclaim<D: DeviceSource + ?Sized>(&mut self, device: &mut D) -> usize {
        let processed = device.buffers_processed();
        if processed == 0 {
            return 0;
        }
        device.unqueue_buffers(processed).len()
    }

    /// Queue buffers until the device holds a full ring, or `fill` reports a stall.
    ///
    /// `fill` writes one buffer's worth of PCM and returns `false` when nothing could be
    /// produced. Returns the number of buffers submitted.
    pub fn refill<D, F>(&mut self, device: &mut D, format: &TargetFormat, mut fill: F) -> usize
    where
        D: DeviceSource + ?Sized,
        F: FnMut(&mut [u8]) -> bool,
    {
        let mut submitted = 0;
        while device.buffers_queued() < self.ids.len() {
            if !fill(&mut self.scratch) {
                break;
            }
            let id = self.ids[self.next];
            device.buffer_data(id, format.output, &self.scratch);
            device.queue_buffer(id);
            self.next = (self.next + 1) % self.ids.len();
            submitted += 1;
        }
        submitted
    }

    /// Start playback from the head of the queue. Fails when nothing is queued.
    pub fn start<D: DeviceSource + ?Sized>(&self, device: &mut D) -> bool {
        if device.buffers_queued() == 0 {
            return false;
        }
        device.play();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SourceState;
    use crate::format::{OutputFormat, negotiate};
    use crate::testing::{FakeDevice, mono16_context};

    fn target() -> TargetFormat {
        negotiate(&mono16_context(8_000)).unwrap()
    }

    #[test]
    fn refill_queues_a_full_ring() {
        let mut device = FakeDevice::new(8_000);
        let mut ring = BufferRing::new(&mut device, 3, 4).unwrap();

        let mut n = 0u8;
        assert_eq!(ring.slots(), 3);
        let submitted = ring.refill(&mut device, &target(), |buf| {
            n += 1;
            buf.fill(n);
            true
        });
        assert_eq!(submitted, 3);
        assert_eq!(device.buffers_queued(), 3);

        let s = device.inspect();
        assert_eq!(s.submitted, vec![vec![1; 4], vec![2; 4], vec![3; 4]]);
        assert!(s.formats.iter().all(|f| *f == OutputFormat::Mono16));
    }

    #[test]
    fn refill_stops_on_stall() {
        let mut device = FakeDevice::new(8_000);
        let mut ring = BufferRing::new(&mut device, 4, 2).unwrap();

        let mut calls = 0;
        let submitted = ring.refill(&mut device, &target(), |_| {
            calls += 1;
            calls == 1
        });
        assert_eq!(submitted, 1);
        assert_eq!(calls, 2);
    }

    #[test]
    fn reclaimed_buffers_are_reused_in_rotation() {
        let mut device = FakeDevice::new(8_000);
        let mut ring = BufferRing::new(&mut device, 2, 2).unwrap();
        ring.refill(&mut device, &target(), |_| true);

        device.inspect().processed = 1;
        assert_eq!(ring.reclaim(&mut device), 1);
        assert_eq!(ring.refill(&mut device, &target(), |_| true), 1);

        assert!(device.take_error().is_none());
        assert_eq!(device.inspect().queue, [BufferId(1), BufferId(0)]);
    }

    #[test]
    fn start_requires_queued_buffers() {
        let mut device = FakeDevice::new(8_000);
        let mut ring = BufferRing::new(&mut device, 2, 2).unwrap();
        assert!(!ring.start(&mut device));
        assert_eq!(device.inspect().play_calls, 0);

        ring.refill(&mut device, &target(), |_| true);
        assert!(ring.start(&mut device));
        assert_eq!(device.state(), SourceState::Playing);
    }
}
