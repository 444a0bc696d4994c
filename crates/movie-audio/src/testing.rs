//! In-crate fixtures: a scripted codec and a fake streaming device.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use symphonia::core::audio::Layout;
use symphonia::core::sample::SampleFormat;
use symphonia::core::units::TimeBase;

use crate::codec::{Codec, DecodedFrame, Packet};
use crate::device::{BufferId, DeviceSource, SourceState};
use crate::error::{CodecError, DeviceError};
use crate::format::{CodecContext, OutputFormat};

pub(crate) fn context(rate: u32, format: SampleFormat, channels: usize) -> CodecContext {
    let layout = if channels == 1 {
        Layout::Mono
    } else {
        Layout::Stereo
    };
    CodecContext {
        sample_rate: rate,
        sample_format: Some(format),
        bits_per_sample: None,
        channels: Some(layout.into_channels()),
        channel_count: channels,
        time_base: TimeBase::new(1, rate),
    }
}

pub(crate) fn mono16_context(rate: u32) -> CodecContext {
    context(rate, SampleFormat::S16, 1)
}

/// Packet whose payload is little-endian `i16` samples, interleaved.
pub(crate) fn pcm_packet(ts: u64, samples: &[i16]) -> Packet {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    Packet::new_from_slice(0, ts, samples.len() as u64, &bytes)
}

/// Codec decoding little-endian `i16` payloads. An empty payload is a corrupt packet.
pub(crate) struct ScriptedCodec {
    ctx: CodecContext,
    pending: VecDeque<DecodedFrame>,
    capacity: usize,
    flushed: bool,
    accepted: usize,
    timestamps: bool,
}

impl ScriptedCodec {
    pub(crate) fn new(ctx: CodecContext) -> Self {
        Self {
            ctx,
            pending: VecDeque::new(),
            capacity: 4,
            flushed: false,
            accepted: 0,
            timestamps: true,
        }
    }

    pub(crate) fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub(crate) fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    pub(crate) fn packets_accepted(&self) -> usize {
        self.accepted
    }

    pub(crate) fn is_flushed(&self) -> bool {
        self.flushed
    }
}

impl Codec for ScriptedCodec {
    fn context(&self) -> &CodecContext {
        &self.ctx
    }

    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<(), CodecError> {
        if self.flushed {
            return Err(CodecError::EndOfStream);
        }
        let Some(packet) = packet else {
            self.flushed = true;
            return Ok(());
        };
        if self.pending.len() >= self.capacity {
            return Err(CodecError::NeedMore);
        }
        if packet.buf().is_empty() {
            return Err(CodecError::Backend("corrupt packet".to_string()));
        }

        let channels = self.ctx.channel_count.max(1);
        let samples: Vec<f32> = packet
            .buf()
            .chunks_exact(2)
            .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32_768.0)
            .collect();
        self.pending.push_back(DecodedFrame {
            pts: self.timestamps.then(|| packet.ts() as i64),
            frames: samples.len() / channels,
            channels,
            samples,
        });
        self.accepted += 1;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodedFrame, CodecError> {
        match self.pending.pop_front() {
            Some(frame) => Ok(frame),
            None if self.flushed => Err(CodecError::EndOfStream),
            None => Err(CodecError::NeedMore),
        }
    }
}

/// Observable state of a [`FakeDevice`].
#[derive(Debug)]
pub(crate) struct FakeState {
    pub rate: u32,
    pub buffers: Vec<Vec<u8>>,
    pub queue: VecDeque<BufferId>,
    pub processed: usize,
    pub offset: usize,
    pub state: SourceState,
    pub error: Option<DeviceError>,
    /// `play` consumes every queued buffer at once and stops.
    pub complete_on_play: bool,
    /// Error latched by the next `play`.
    pub error_on_play: Option<DeviceError>,
    pub submitted: Vec<Vec<u8>>,
    pub formats: Vec<OutputFormat>,
    pub play_calls: usize,
    pub rewind_calls: usize,
    pub detach_calls: usize,
}

/// Scriptable [`DeviceSource`]. Clones share state so tests can inspect a device that was
/// moved into a session.
#[derive(Clone, Debug)]
pub(crate) struct FakeDevice {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    pub(crate) fn new(rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeState {
                rate,
                buffers: Vec::new(),
                queue: VecDeque::new(),
                processed: 0,
                offset: 0,
                state: SourceState::Stopped,
                error: None,
                complete_on_play: false,
                error_on_play: None,
                submitted: Vec::new(),
                formats: Vec::new(),
                play_calls: 0,
                rewind_calls: 0,
                detach_calls: 0,
            })),
        }
    }

    /// Device that "plays" instantly: every `play` marks the whole queue processed.
    pub(crate) fn instant(rate: u32) -> Self {
        let device = Self::new(rate);
        device.inspect().complete_on_play = true;
        device
    }

    pub(crate) fn inspect(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap()
    }
}

impl DeviceSource for FakeDevice {
    fn sample_rate(&self) -> u32 {
        self.inspect().rate
    }

    fn generate_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError> {
        let mut s = self.inspect();
        let start = s.buffers.len();
        s.buffers.resize(start + count, Vec::new());
        Ok((start..start + count).map(BufferId).collect())
    }

    fn buffer_data(&mut self, buffer: BufferId, format: OutputFormat, data: &[u8]) {
        let mut s = self.inspect();
        if s.queue.contains(&buffer) {
            s.error = Some(DeviceError::InvalidOperation("buffer is queued".to_string()));
            return;
        }
        s.buffers[buffer.0] = data.to_vec();
        s.submitted.push(data.to_vec());
        s.formats.push(format);
    }

    fn queue_buffer(&mut self, buffer: BufferId) {
        self.inspect().queue.push_back(buffer);
    }

    fn unqueue_buffers(&mut self, count: usize) -> Vec<BufferId> {
        let mut s = self.inspect();
        let n = count.min(s.processed);
        s.processed -= n;
        s.queue.drain(..n).collect()
    }

    fn buffers_queued(&self) -> usize {
        self.inspect().queue.len()
    }

    fn buffers_processed(&self) -> usize {
        self.inspect().processed
    }

    fn sample_offset(&self) -> usize {
        self.inspect().offset
    }

    fn state(&self) -> SourceState {
        self.inspect().state
    }

    fn play(&mut self) {
        let mut s = self.inspect();
        s.play_calls += 1;
        if let Some(err) = s.error_on_play.take() {
            s.error = Some(err);
        }
        if s.complete_on_play {
            s.processed = s.queue.len();
            s.offset = 0;
            s.state = SourceState::Stopped;
        } else {
            s.state = SourceState::Playing;
        }
    }

    fn pause(&mut self) {
        self.inspect().state = SourceState::Paused;
    }

    fn resume(&mut self) {
        let mut s = self.inspect();
        if s.state == SourceState::Paused {
            s.state = SourceState::Stopped;
        }
    }

    fn rewind(&mut self) {
        let mut s = self.inspect();
        s.rewind_calls += 1;
        s.processed = 0;
        s.offset = 0;
        if s.state != SourceState::Paused {
            s.state = SourceState::Stopped;
        }
    }

    fn detach_buffers(&mut self) {
        let mut s = self.inspect();
        s.detach_calls += 1;
        s.queue.clear();
        s.processed = 0;
    }

    fn take_error(&mut self) -> Option<DeviceError> {
        self.inspect().error.take()
    }
}
