//! Source stream parameters and output format negotiation.
//!
//! The playback device only accepts four PCM layouts (8/16-bit, mono/stereo). Negotiation
//! picks one of them from the codec parameters once per session:
//! - 8-bit sources stay 8-bit (unsigned), everything else becomes signed 16-bit
//! - mono stays mono, everything else is folded to stereo

use serde::Serialize;
use symphonia::core::audio::Channels;
use symphonia::core::codecs::CodecParameters;
use symphonia::core::sample::SampleFormat;
use symphonia::core::units::TimeBase;

use crate::error::SetupError;

/// Parameters of the audio stream the decoder was opened for.
///
/// Immutable for the lifetime of a session.
#[derive(Clone, Debug)]
pub struct CodecContext {
    /// Source sample rate in Hz.
    pub sample_rate: u32,
    /// Decoded sample format, when the codec reports one.
    pub sample_format: Option<SampleFormat>,
    /// Bits per (coded) sample, used when `sample_format` is unknown.
    pub bits_per_sample: Option<u32>,
    /// Explicit channel layout, when the codec reports one.
    pub channels: Option<Channels>,
    /// Channel count used to derive a default layout when `channels` is unset.
    pub channel_count: usize,
    /// Time base of packet/frame timestamps.
    pub time_base: TimeBase,
}

impl CodecContext {
    /// Build the context from symphonia track parameters.
    pub fn from_params(params: &CodecParameters) -> Result<Self, SetupError> {
        let sample_rate = params
            .sample_rate
            .filter(|rate| *rate > 0)
            .ok_or_else(|| SetupError::Source("unknown sample rate".to_string()))?;
        Ok(Self {
            sample_rate,
            sample_format: params.sample_format,
            bits_per_sample: params.bits_per_sample.or(params.bits_per_coded_sample),
            channels: params.channels,
            channel_count: params.channels.map(|c| c.count()).unwrap_or(0),
            time_base: params
                .time_base
                .unwrap_or_else(|| TimeBase::new(1, sample_rate)),
        })
    }

    /// Channel count of the source layout, or `None` when no layout can be determined.
    pub fn source_channels(&self) -> Option<usize> {
        self.channels
            .map(|c| c.count())
            .filter(|n| *n > 0)
            .or_else(|| Some(self.channel_count).filter(|n| *n > 0))
    }

    /// Convert a timestamp in stream time-base units to nanoseconds.
    pub fn timestamp_to_nanos(&self, ts: i64) -> i64 {
        let denom = i128::from(self.time_base.denom.max(1));
        let nanos = i128::from(ts) * i128::from(self.time_base.numer) * 1_000_000_000 / denom;
        nanos.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    fn is_eight_bit(&self) -> bool {
        match self.sample_format {
            Some(SampleFormat::U8 | SampleFormat::S8) => true,
            Some(_) => false,
            None => self.bits_per_sample == Some(8),
        }
    }
}

/// PCM sample width handed to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleWidth {
    /// Unsigned 8-bit, centered at `0x80`.
    U8,
    /// Signed 16-bit, native endian.
    S16,
}

impl SampleWidth {
    pub fn bytes(self) -> usize {
        match self {
            SampleWidth::U8 => 1,
            SampleWidth::S16 => 2,
        }
    }

    /// Byte value of digital silence.
    pub fn silence(self) -> u8 {
        match self {
            SampleWidth::U8 => 0x80,
            SampleWidth::S16 => 0x00,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

/// Device buffer format code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Mono8,
    Stereo8,
    Mono16,
    Stereo16,
}

impl OutputFormat {
    /// Fixed (bit depth, channel count) lookup.
    pub fn lookup(width: SampleWidth, layout: ChannelLayout) -> Self {
        match (width, layout) {
            (SampleWidth::U8, ChannelLayout::Mono) => OutputFormat::Mono8,
            (SampleWidth::U8, ChannelLayout::Stereo) => OutputFormat::Stereo8,
            (SampleWidth::S16, ChannelLayout::Mono) => OutputFormat::Mono16,
            (SampleWidth::S16, ChannelLayout::Stereo) => OutputFormat::Stereo16,
        }
    }

    pub fn width(self) -> SampleWidth {
        match self {
            OutputFormat::Mono8 | OutputFormat::Stereo8 => SampleWidth::U8,
            OutputFormat::Mono16 | OutputFormat::Stereo16 => SampleWidth::S16,
        }
    }

    pub fn layout(self) -> ChannelLayout {
        match self {
            OutputFormat::Mono8 | OutputFormat::Mono16 => ChannelLayout::Mono,
            OutputFormat::Stereo8 | OutputFormat::Stereo16 => ChannelLayout::Stereo,
        }
    }

    /// Bytes per frame.
    pub fn frame_size(self) -> usize {
        self.width().bytes() * self.layout().channels()
    }
}

/// Format every decoded frame is converted to before it reaches the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TargetFormat {
    pub width: SampleWidth,
    pub layout: ChannelLayout,
    /// Bytes per frame.
    pub frame_size: usize,
    pub output: OutputFormat,
    /// Output sample rate. Starts at the source rate; replaced by the rate the device opened at.
    pub sample_rate: u32,
}

impl TargetFormat {
    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn with_sample_rate(self, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..self
        }
    }
}

/// Pick the device format for a source stream. First match wins.
pub fn negotiate(ctx: &CodecContext) -> Result<TargetFormat, SetupError> {
    let channels = ctx
        .source_channels()
        .ok_or(SetupError::ChannelLayout {
            channels: ctx.channel_count,
        })?;

    let width = if ctx.is_eight_bit() {
        SampleWidth::U8
    } else {
        SampleWidth::S16
    };
    let layout = if channels == 1 {
        ChannelLayout::Mono
    } else {
        ChannelLayout::Stereo
    };

    Ok(TargetFormat {
        width,
        layout,
        frame_size: width.bytes() * layout.channels(),
        output: OutputFormat::lookup(width, layout),
        sample_rate: ctx.sample_rate,
    })
}
