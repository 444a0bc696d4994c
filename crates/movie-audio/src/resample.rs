//! Conversion of decoded frames into the negotiated target format.
//!
//! Three steps, in order:
//! 1. channel remix of interleaved `f32` to mono or stereo
//! 2. rate conversion with Rubato, only when the device opened at a rate other than the
//!    source rate
//! 3. quantization to unsigned 8-bit or signed 16-bit (native endian) into the backlog

use audioadapter_buffers::direct::InterleavedSlice;
use cpal::Sample;
use rubato::{
    Async, FixedAsync, Indexing, Resampler as _, SincInterpolationParameters,
    SincInterpolationType, WindowFunction, calculate_cutoff,
};

use crate::backlog::SampleBacklog;
use crate::codec::DecodedFrame;
use crate::error::{CodecError, SetupError};
use crate::format::{CodecContext, SampleWidth, TargetFormat};

/// Converts decoded PCM (any layout/rate) into [`TargetFormat`] bytes.
pub struct Resampler {
    target: TargetFormat,
    remixed: Vec<f32>,
    converted: Vec<f32>,
    rate: Option<RateConverter>,
}

impl Resampler {
    pub fn new(
        ctx: &CodecContext,
        target: &TargetFormat,
        chunk_frames: usize,
    ) -> Result<Self, SetupError> {
        let rate = if ctx.sample_rate == target.sample_rate {
            None
        } else {
            tracing::info!(
                from_hz = ctx.sample_rate,
                to_hz = target.sample_rate,
                "audio rate conversion enabled"
            );
            Some(RateConverter::new(
                ctx.sample_rate,
                target.sample_rate,
                target.channels(),
                chunk_frames,
            )?)
        };
        Ok(Self {
            target: *target,
            remixed: Vec::new(),
            converted: Vec::new(),
            rate,
        })
    }

    pub fn is_converting_rate(&self) -> bool {
        self.rate.is_some()
    }

    pub fn output_rate(&self) -> u32 {
        self.target.sample_rate
    }

    /// Input frames held by the rate converter that no output has been produced for yet.
    ///
    /// The next frames written to the backlog start this far before the next input frame.
    pub fn pending_frames(&self) -> usize {
        self.rate
            .as_ref()
            .map_or(0, |rate| rate.pending.len() / rate.channels)
    }

    /// Convert one frame into `backlog`, replacing its contents. Returns frames written.
    ///
    /// May return 0 while the rate converter is still collecting a full input chunk.
    pub fn convert(
        &mut self,
        frame: &DecodedFrame,
        backlog: &mut SampleBacklog,
    ) -> Result<usize, CodecError> {
        let dst_channels = self.target.channels();
        remix(
            &frame.samples,
            frame.channels.max(1),
            dst_channels,
            &mut self.remixed,
        );

        let pcm = match &mut self.rate {
            Some(rate) => {
                self.converted.clear();
                rate.process(&self.remixed, &mut self.converted)?;
                &self.converted
            }
            None => &self.remixed,
        };

        Ok(write_backlog(pcm, dst_channels, self.target.width, backlog))
    }

    /// Flush samples still held by the rate converter at end of stream.
    pub fn drain(&mut self, backlog: &mut SampleBacklog) -> Result<usize, CodecError> {
        let Some(rate) = &mut self.rate else {
            return Ok(0);
        };
        self.converted.clear();
        rate.flush(&mut self.converted)?;
        Ok(write_backlog(
            &self.converted,
            self.target.channels(),
            self.target.width,
            backlog,
        ))
    }
}

fn write_backlog(
    pcm: &[f32],
    channels: usize,
    width: SampleWidth,
    backlog: &mut SampleBacklog,
) -> usize {
    let frames = pcm.len() / channels;
    if frames == 0 {
        return 0;
    }
    let out = backlog.refill(frames);
    quantize(&pcm[..frames * channels], width, out);
    frames
}

/// Map interleaved `src` with `src_channels` onto `dst_channels` (1 or 2).
///
/// - mono → stereo: duplicate
/// - n → mono: average of all channels
/// - n → stereo: first two channels (front left/right)
fn remix(src: &[f32], src_channels: usize, dst_channels: usize, out: &mut Vec<f32>) {
    out.clear();
    out.reserve(src.len() / src_channels * dst_channels);
    for frame in src.chunks_exact(src_channels) {
        match (src_channels, dst_channels) {
            (s, d) if s == d => out.extend_from_slice(frame),
            (_, 1) => out.push(frame.iter().sum::<f32>() / src_channels as f32),
            (1, _) => out.extend(std::iter::repeat_n(frame[0], dst_channels)),
            _ => out.extend_from_slice(&frame[..2]),
        }
    }
}

fn quantize(samples: &[f32], width: SampleWidth, out: &mut [u8]) {
    match width {
        SampleWidth::U8 => {
            for (dst, s) in out.iter_mut().zip(samples) {
                *dst = <u8 as Sample>::from_sample::<f32>(s.clamp(-1.0, 1.0));
            }
        }
        SampleWidth::S16 => {
            for (dst, s) in out.chunks_exact_mut(2).zip(samples) {
                let v = <i16 as Sample>::from_sample::<f32>(s.clamp(-1.0, 1.0));
                dst.copy_from_slice(&v.to_ne_bytes());
            }
        }
    }
}

/// Streaming sinc rate converter over interleaved `f32`.
///
/// Rubato consumes fixed-size input chunks, so input is collected in `pending` until a
/// whole chunk is available. The partial tail is processed by [`RateConverter::flush`].
struct RateConverter {
    inner: Box<dyn rubato::Resampler<f32> + Send>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    out: Vec<f32>,
    indexing: Indexing,
}

impl RateConverter {
    fn new(
        src_rate: u32,
        dst_rate: u32,
        channels: usize,
        chunk_frames: usize,
    ) -> Result<Self, SetupError> {
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let chunk_frames = chunk_frames.max(1);
        let inner = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| SetupError::Resampler(format!("{e:#}")))?;

        let out_frames = (chunk_frames as f64 * f_ratio * 1.1).ceil() as usize + 64;
        Ok(Self {
            inner: Box::new(inner),
            channels,
            chunk_frames,
            pending: Vec::new(),
            out: vec![0.0; out_frames * channels],
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
        })
    }

    /// Append `input` and convert every complete chunk into `produced`.
    fn process(&mut self, input: &[f32], produced: &mut Vec<f32>) -> Result<(), CodecError> {
        self.pending.extend_from_slice(input);
        let chunk_samples = self.chunk_frames * self.channels;

        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk_samples {
            let chunk = &self.pending[consumed..consumed + chunk_samples];
            let frames = run_chunk(
                self.inner.as_mut(),
                &mut self.indexing,
                chunk,
                self.chunk_frames,
                self.channels,
                &mut self.out,
                None,
            )?;
            produced.extend_from_slice(&self.out[..frames * self.channels]);
            consumed += chunk_samples;
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    /// Convert whatever partial chunk is left.
    fn flush(&mut self, produced: &mut Vec<f32>) -> Result<(), CodecError> {
        let tail_frames = self.pending.len() / self.channels;
        if tail_frames == 0 {
            return Ok(());
        }
        let tail = std::mem::take(&mut self.pending);
        let frames = run_chunk(
            self.inner.as_mut(),
            &mut self.indexing,
            &tail[..tail_frames * self.channels],
            tail_frames,
            self.channels,
            &mut self.out,
            Some(tail_frames),
        )?;
        produced.extend_from_slice(&self.out[..frames * self.channels]);
        Ok(())
    }
}

fn run_chunk(
    resampler: &mut (dyn rubato::Resampler<f32> + Send),
    indexing: &mut Indexing,
    input: &[f32],
    frames: usize,
    channels: usize,
    out: &mut [f32],
    partial_len: Option<usize>,
) -> Result<usize, CodecError> {
    let input_adapter = InterleavedSlice::new(input, channels, frames)
        .map_err(|e| CodecError::Backend(format!("interleaved slice (input) error: {e:#}")))?;

    let out_capacity_frames = out.len() / channels;
    let mut output_adapter = InterleavedSlice::new_mut(out, channels, out_capacity_frames)
        .map_err(|e| CodecError::Backend(format!("interleaved slice (output) error: {e:#}")))?;

    indexing.input_offset = 0;
    indexing.output_offset = 0;
    indexing.partial_len = partial_len;

    let (_nbr_in, nbr_out) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(&*indexing))
        .map_err(|e| CodecError::Backend(format!("resampler process error: {e:#}")))?;
    Ok(nbr_out)
}
