/// Scratch storage for the most recently decoded-and-converted frame.
///
/// Holds PCM already in the target format, a read cursor and a valid length, all counted
/// in frames. Invariant: `position <= length <= capacity`. Storage only ever grows, so
/// steady playback does not reallocate.
#[derive(Debug)]
pub struct SampleBacklog {
    data: Vec<u8>,
    frame_size: usize,
    capacity: usize,
    position: usize,
    length: usize,
}

impl SampleBacklog {
    pub fn new(frame_size: usize) -> Self {
        Self {
            data: Vec::new(),
            frame_size: frame_size.max(1),
            capacity: 0,
            position: 0,
            length: 0,
        }
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Valid frames currently held.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Unread frames.
    pub fn remaining(&self) -> usize {
        self.length - self.position
    }

    /// Replace the contents with `frames` new frames and return the bytes to write them into.
    ///
    /// Grows the storage when `frames` exceeds the current capacity.
    pub fn refill(&mut self, frames: usize) -> &mut [u8] {
        if frames > self.capacity {
            self.data.resize(frames * self.frame_size, 0);
            self.capacity = frames;
        }
        self.position = 0;
        self.length = frames;
        &mut self.data[..frames * self.frame_size]
    }

    /// Consume up to `max_frames` unread frames.
    pub fn take(&mut self, max_frames: usize) -> &[u8] {
        let n = max_frames.min(self.remaining());
        let start = self.position * self.frame_size;
        self.position += n;
        &self.data[start..start + n * self.frame_size]
    }
}
