//! Audio session: owns the playback worker and exposes the audio clock.
//!
//! The worker runs the playback loop on its own thread:
//! 1. prefill the codec with packets
//! 2. every poll: reclaim processed buffers, refill the ring, start or re-arm the device
//! 3. on quit, end of stream or a device error: rewind and detach the source, then return
//!
//! The clock and the device sit behind one mutex. The worker holds it for the whole loop
//! body and releases it only while waiting for the next poll, so [`AudioSession::clock`]
//! always sees the clock and the device queue in a consistent state.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::clock::PresentationClock;
use crate::codec::Codec;
use crate::config::PlaybackConfig;
use crate::decode::FrameDecoder;
use crate::device::{DeviceSnapshot, DeviceSource, SourceState};
use crate::error::{DeviceError, SetupError};
use crate::format::{TargetFormat, negotiate};
use crate::packet::PacketSource;
use crate::quit::QuitFlag;
use crate::reader::AudioReader;
use crate::resample::Resampler;
use crate::ring::BufferRing;
use crate::status::{SessionCounters, SessionEndReason, SessionStatus};

/// Handle to one running audio stream.
pub struct AudioSession<D> {
    monitor: Arc<Monitor<D>>,
    quit: QuitFlag,
    buffer_time: Duration,
    ring_size: usize,
    target: TargetFormat,
    counters: Arc<SessionCounters>,
    worker: Option<JoinHandle<SessionEndReason>>,
    end_reason: Option<SessionEndReason>,
}

struct Monitor<D> {
    state: Mutex<SharedState<D>>,
    wake: Condvar,
}

struct SharedState<D> {
    clock: PresentationClock,
    device: D,
    end_reason: Option<SessionEndReason>,
    woken: bool,
}

impl<D> Monitor<D> {
    fn lock(&self) -> MutexGuard<'_, SharedState<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.lock().woken = true;
        self.wake.notify_all();
    }
}

impl<D: DeviceSource + 'static> AudioSession<D> {
    /// Negotiate the output format, open the device and spawn the playback worker.
    ///
    /// `open_device` receives the negotiated format at the source rate; the session adopts
    /// whatever rate the returned device reports. Nothing is played if this fails.
    pub fn start<C, S, F>(
        codec: C,
        source: S,
        config: PlaybackConfig,
        quit: QuitFlag,
        open_device: F,
    ) -> Result<Self, SetupError>
    where
        C: Codec + Send + 'static,
        S: PacketSource + Send + 'static,
        F: FnOnce(&TargetFormat) -> Result<D, DeviceError>,
    {
        let ctx = codec.context().clone();
        let requested = negotiate(&ctx)?;
        tracing::info!(
            format = ?requested.output,
            source_rate_hz = ctx.sample_rate,
            source_channels = ?ctx.source_channels(),
            "audio output format negotiated"
        );

        let mut device = open_device(&requested)?;
        let target = requested.with_sample_rate(device.sample_rate());
        let resampler = Resampler::new(&ctx, &target, config.chunk_frames)?;

        let buffer_frames = config.buffer_frames(target.sample_rate);
        let ring = BufferRing::new(
            &mut device,
            config.ring_size(),
            buffer_frames * target.frame_size,
        )?;
        let ring_size = ring.slots();
        tracing::info!(
            rate_hz = target.sample_rate,
            buffers = ring_size,
            buffer_frames,
            resampling = resampler.is_converting_rate(),
            "audio ring ready"
        );

        let counters = Arc::new(SessionCounters::default());
        let decoder = FrameDecoder::new(codec, source, resampler, quit.clone());
        let reader = AudioReader::new(decoder, target, counters.clone());

        let monitor = Arc::new(Monitor {
            state: Mutex::new(SharedState {
                clock: PresentationClock::new(),
                device,
                end_reason: None,
                woken: false,
            }),
            wake: Condvar::new(),
        });

        let playback = PlaybackLoop {
            monitor: monitor.clone(),
            reader,
            ring,
            target,
            quit: quit.clone(),
            poll_interval: config.poll_interval(),
        };
        let worker = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || playback.run())?;

        Ok(Self {
            monitor,
            quit,
            buffer_time: config.buffer_time,
            ring_size,
            target,
            counters,
            worker: Some(worker),
            end_reason: None,
        })
    }

    /// Position of the audio currently being heard.
    pub fn clock(&self) -> Duration {
        let state = self.monitor.lock();
        let snapshot = DeviceSnapshot::of(&state.device);
        state
            .clock
            .corrected(&snapshot, self.buffer_time, self.target.sample_rate)
    }

    pub fn pause(&self) {
        self.monitor.lock().device.pause();
        self.monitor.notify();
    }

    pub fn resume(&self) {
        self.monitor.lock().device.resume();
        self.monitor.notify();
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.monitor.lock();
        let snapshot = DeviceSnapshot::of(&state.device);
        let clock = state
            .clock
            .corrected(&snapshot, self.buffer_time, self.target.sample_rate);
        SessionStatus {
            clock_ms: u64::try_from(clock.as_millis()).unwrap_or(u64::MAX),
            state: snapshot.state,
            buffers_queued: snapshot.queued,
            ring_size: self.ring_size,
            output_format: self.target.output,
            sample_rate: self.target.sample_rate,
            underrun_events: self.counters.underrun_events(),
            padded_frames: self.counters.padded_frames(),
            end_reason: state.end_reason,
        }
    }
}

impl<D> AudioSession<D> {
    /// Wake the playback worker before its poll interval elapses.
    pub fn notify(&self) {
        self.monitor.notify();
    }

    pub fn target_format(&self) -> &TargetFormat {
        &self.target
    }

    pub fn quit_flag(&self) -> &QuitFlag {
        &self.quit
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Request quit and wait for the worker to clean up.
    pub fn stop(&mut self) -> SessionEndReason {
        self.quit.request();
        self.monitor.notify();
        self.wait()
    }

    /// Block until the worker returns.
    pub fn wait(&mut self) -> SessionEndReason {
        if let Some(worker) = self.worker.take() {
            let reason = worker.join().unwrap_or_else(|_| {
                tracing::error!("audio playback worker panicked");
                SessionEndReason::Error
            });
            self.end_reason = Some(reason);
        }
        self.end_reason.unwrap_or(SessionEndReason::Stopped)
    }
}

impl<D> Drop for AudioSession<D> {
    fn drop(&mut self) {
        self.quit.request();
        self.monitor.notify();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct PlaybackLoop<C, S, D> {
    monitor: Arc<Monitor<D>>,
    reader: AudioReader<C, S>,
    ring: BufferRing,
    target: TargetFormat,
    quit: QuitFlag,
    poll_interval: Duration,
}

impl<C: Codec, S: PacketSource, D: DeviceSource> PlaybackLoop<C, S, D> {
    fn run(mut self) -> SessionEndReason {
        let packets = self.reader.prefill();
        tracing::debug!(packets, "audio playback worker started");

        let monitor = self.monitor.clone();
        let mut guard = monitor.lock();
        let reason = loop {
            if self.quit.is_set() {
                break SessionEndReason::Stopped;
            }

            let state = &mut *guard;
            self.ring.reclaim(&mut state.device);

            // A paused source gets detached below, so nothing is decoded for it.
            if state.device.state() != SourceState::Paused {
                let reader = &mut self.reader;
                let clock = &mut state.clock;
                self.ring
                    .refill(&mut state.device, &self.target, |buf| reader.read_audio(buf, clock));
            }

            match state.device.state() {
                SourceState::Paused => {
                    state.device.rewind();
                    state.device.detach_buffers();
                }
                SourceState::Playing => {}
                SourceState::Stopped => {
                    if !self.ring.start(&mut state.device) {
                        break SessionEndReason::Eof;
                    }
                }
            }

            if let Some(err) = state.device.take_error() {
                tracing::error!(error = %err, "audio device error, stopping playback");
                break SessionEndReason::Error;
            }

            guard.woken = false;
            let (g, _) = monitor
                .wake
                .wait_timeout_while(guard, self.poll_interval, |s| !s.woken)
                .unwrap_or_else(PoisonError::into_inner);
            guard = g;
        };

        guard.device.rewind();
        guard.device.detach_buffers();
        guard.end_reason = Some(reason);
        drop(guard);

        tracing::info!(reason = ?reason, "audio playback finished");
        reason
    }
}
