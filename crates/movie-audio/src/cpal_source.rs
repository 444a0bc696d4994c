//! [`DeviceSource`] backed by a CPAL output stream.
//!
//! The stream is built, started and dropped on a dedicated thread because CPAL streams are
//! not `Send` on every host. The real-time callback and the playback loop share a
//! [`SourceRing`] that holds the buffer queue:
//! - queued buffers are played in order, converted from 8/16-bit PCM to the device format
//! - mono/stereo is mapped onto the device channel count
//! - a fully played buffer counts as processed; when the queue runs dry the source stops
//!
//! Stream errors reported by CPAL are latched and surface through
//! [`DeviceSource::take_error`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Sender, bounded};

use crate::device::{BufferId, DeviceSource, SourceState, pick_output_config};
use crate::error::DeviceError;
use crate::format::{OutputFormat, SampleWidth, TargetFormat};

pub struct CpalSource {
    shared: Arc<Mutex<SourceRing>>,
    sample_rate: u32,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSource {
    /// Open `device` as close to the target rate as it allows and start its stream.
    ///
    /// The stream runs from the start but outputs silence until [`DeviceSource::play`].
    pub fn open(device: cpal::Device, target: &TargetFormat) -> Result<Self, DeviceError> {
        let supported = pick_output_config(&device, Some(target.sample_rate))
            .map_err(|e| DeviceError::Open(format!("{e:#}")))?;
        let sample_format = supported.sample_format();
        let config = supported.config();
        let sample_rate = config.sample_rate;
        let device_name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());

        tracing::info!(
            device = %device_name,
            channels = config.channels,
            rate_hz = sample_rate,
            format = ?sample_format,
            requested = ?target.output,
            "opening audio output"
        );

        let shared = Arc::new(Mutex::new(SourceRing::new()));
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let shared_stream = shared.clone();
        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match build_output_stream(&device, &config, sample_format, shared_stream)
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(DeviceError::Open(format!("{e}"))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Parks until the sender is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| DeviceError::Open(format!("failed to spawn output thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                sample_rate,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(DeviceError::Open("audio output thread exited".to_string()))
            }
        }
    }

    fn ring(&self) -> MutexGuard<'_, SourceRing> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl DeviceSource for CpalSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn generate_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError> {
        Ok(self.ring().generate(count))
    }

    fn buffer_data(&mut self, buffer: BufferId, format: OutputFormat, data: &[u8]) {
        self.ring().upload(buffer, format, data);
    }

    fn queue_buffer(&mut self, buffer: BufferId) {
        self.ring().queue.push_back(buffer);
    }

    fn unqueue_buffers(&mut self, count: usize) -> Vec<BufferId> {
        self.ring().unqueue(count)
    }

    fn buffers_queued(&self) -> usize {
        self.ring().queue.len()
    }

    fn buffers_processed(&self) -> usize {
        self.ring().processed
    }

    fn sample_offset(&self) -> usize {
        self.ring().sample_offset()
    }

    fn state(&self) -> SourceState {
        self.ring().state
    }

    fn play(&mut self) {
        self.ring().play();
    }

    fn pause(&mut self) {
        let mut ring = self.ring();
        if ring.state == SourceState::Playing {
            ring.state = SourceState::Paused;
        }
    }

    fn resume(&mut self) {
        let mut ring = self.ring();
        if ring.state == SourceState::Paused {
            ring.state = SourceState::Stopped;
        }
    }

    fn rewind(&mut self) {
        self.ring().rewind();
    }

    fn detach_buffers(&mut self) {
        let mut ring = self.ring();
        ring.queue.clear();
        ring.processed = 0;
        ring.cursor = 0;
    }

    fn take_error(&mut self) -> Option<DeviceError> {
        self.ring().error.take()
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: Arc<Mutex<SourceRing>>,
) -> Result<cpal::Stream, DeviceError> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, shared),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, shared),
        other => Err(DeviceError::Open(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<Mutex<SourceRing>>,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = usize::from(config.channels);
    let shared_err = shared.clone();

    let err_fn = move |err: cpal::StreamError| {
        tracing::error!("stream error: {err}");
        shared_err
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .error = Some(DeviceError::Stream(err.to_string()));
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                shared
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .render(data, channels_out);
            },
            err_fn,
            None,
        )
        .map_err(|e| DeviceError::Open(format!("{e}")))
}

/// PCM uploaded into one device buffer, kept as interleaved `f32`.
#[derive(Default)]
struct Slot {
    channels: usize,
    samples: Vec<f32>,
}

impl Slot {
    fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }
}

/// Buffer queue shared between the playback loop and the CPAL callback.
struct SourceRing {
    slots: Vec<Slot>,
    queue: VecDeque<BufferId>,
    /// Fully played buffers at the front of `queue`.
    processed: usize,
    /// Next frame within `queue[processed]`.
    cursor: usize,
    state: SourceState,
    error: Option<DeviceError>,
}

impl SourceRing {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            queue: VecDeque::new(),
            processed: 0,
            cursor: 0,
            state: SourceState::Stopped,
            error: None,
        }
    }

    fn generate(&mut self, count: usize) -> Vec<BufferId> {
        let start = self.slots.len();
        self.slots.resize_with(start + count, Slot::default);
        (start..start + count).map(BufferId).collect()
    }

    fn upload(&mut self, buffer: BufferId, format: OutputFormat, data: &[u8]) {
        if self.queue.contains(&buffer) {
            self.error = Some(DeviceError::InvalidOperation(format!(
                "buffer {} is queued",
                buffer.0
            )));
            return;
        }
        let Some(slot) = self.slots.get_mut(buffer.0) else {
            self.error = Some(DeviceError::InvalidOperation(format!(
                "unknown buffer {}",
                buffer.0
            )));
            return;
        };
        slot.channels = format.layout().channels();
        slot.samples.clear();
        match format.width() {
            SampleWidth::U8 => slot
                .samples
                .extend(data.iter().map(|b| (f32::from(*b) - 128.0) / 128.0)),
            SampleWidth::S16 => slot.samples.extend(
                data.chunks_exact(2)
                    .map(|b| f32::from(i16::from_ne_bytes([b[0], b[1]])) / 32_768.0),
            ),
        }
    }

    fn unqueue(&mut self, count: usize) -> Vec<BufferId> {
        let n = count.min(self.processed);
        self.processed -= n;
        self.queue.drain(..n).collect()
    }

    fn sample_offset(&self) -> usize {
        let done: usize = self
            .queue
            .iter()
            .take(self.processed)
            .map(|id| self.slots[id.0].frames())
            .sum();
        done + self.cursor
    }

    fn play(&mut self) {
        if self.state == SourceState::Stopped {
            self.processed = 0;
            self.cursor = 0;
        }
        self.state = if self.queue.is_empty() {
            SourceState::Stopped
        } else {
            SourceState::Playing
        };
    }

    fn rewind(&mut self) {
        self.processed = 0;
        self.cursor = 0;
        if self.state != SourceState::Paused {
            self.state = SourceState::Stopped;
        }
    }

    fn render<T>(&mut self, data: &mut [T], channels_out: usize)
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
        for frame in data.chunks_mut(channels_out.max(1)) {
            if self.state != SourceState::Playing {
                frame.fill(silence);
                continue;
            }

            while let Some(&id) = self.queue.get(self.processed) {
                if self.slots[id.0].frames() > 0 {
                    break;
                }
                self.processed += 1;
            }
            let Some(&id) = self.queue.get(self.processed) else {
                self.state = SourceState::Stopped;
                frame.fill(silence);
                continue;
            };

            let slot = &self.slots[id.0];
            let base = self.cursor * slot.channels;
            let src = &slot.samples[base..base + slot.channels];
            for (ch, out) in frame.iter_mut().enumerate() {
                *out = <T as cpal::Sample>::from_sample::<f32>(map_channel(src, ch, channels_out));
            }

            let frames = slot.frames();
            self.cursor += 1;
            if self.cursor >= frames {
                self.processed += 1;
                self.cursor = 0;
                if self.processed >= self.queue.len() {
                    self.state = SourceState::Stopped;
                }
            }
        }
    }
}

/// Sample for output channel `ch` from one source frame.
fn map_channel(src: &[f32], ch: usize, dst_channels: usize) -> f32 {
    match (src.len(), dst_channels) {
        (1, _) => src[0],
        (2, 1) => 0.5 * (src[0] + src[1]),
        (n, _) => src[ch.min(n - 1)],
    }
}
