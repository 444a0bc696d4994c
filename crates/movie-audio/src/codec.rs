//! Codec abstraction and the symphonia-backed implementation.
//!
//! The contract follows a send/receive model:
//! - `send_packet(Some(p))` submits compressed input, `send_packet(None)` flushes
//! - `receive_frame()` hands out one decoded frame at a time
//!
//! `NeedMore` from `send_packet` means "drain output first"; from `receive_frame` it means
//! "feed another packet". After a flush, `receive_frame` returns any buffered frames and
//! then `EndOfStream`.

use std::collections::VecDeque;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;

pub use symphonia::core::formats::Packet;

use crate::error::{CodecError, SetupError};
use crate::format::CodecContext;

/// Decoded frames the symphonia codec holds before refusing more input.
const MAX_PENDING_FRAMES: usize = 4;

/// One decoded frame of interleaved `f32` PCM.
#[derive(Clone, Debug, Default)]
pub struct DecodedFrame {
    /// Presentation timestamp in stream time-base units, when valid.
    pub pts: Option<i64>,
    /// Sample count per channel.
    pub frames: usize,
    pub channels: usize,
    /// Interleaved samples, `frames * channels` long.
    pub samples: Vec<f32>,
}

pub trait Codec {
    fn context(&self) -> &CodecContext;

    /// Submit one packet, or `None` to signal end of input.
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<(), CodecError>;

    fn receive_frame(&mut self) -> Result<DecodedFrame, CodecError>;
}

/// [`Codec`] over a symphonia decoder.
pub struct SymphoniaCodec {
    decoder: Box<dyn Decoder>,
    ctx: CodecContext,
    pending: VecDeque<DecodedFrame>,
    flushed: bool,
}

impl SymphoniaCodec {
    pub fn new(params: &CodecParameters) -> Result<Self, SetupError> {
        let ctx = CodecContext::from_params(params)?;
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| SetupError::Source(format!("{e}")))?;
        Ok(Self {
            decoder,
            ctx,
            pending: VecDeque::with_capacity(MAX_PENDING_FRAMES),
            flushed: false,
        })
    }

    fn decode(&mut self, packet: &Packet) -> Result<(), CodecError> {
        let err = match self.decoder.decode(packet) {
            Ok(decoded) => {
                let frames = decoded.frames();
                if frames == 0 {
                    return Ok(());
                }
                let spec = *decoded.spec();
                let mut sample_buf = SampleBuffer::<f32>::new(frames as u64, spec);
                sample_buf.copy_interleaved_ref(decoded);
                self.pending.push_back(DecodedFrame {
                    pts: i64::try_from(packet.ts()).ok(),
                    frames,
                    channels: spec.channels.count(),
                    samples: sample_buf.samples().to_vec(),
                });
                return Ok(());
            }
            Err(e) => e,
        };

        if let SymphoniaError::ResetRequired = err {
            self.decoder.reset();
            return Err(CodecError::Backend("decoder reset required".to_string()));
        }
        Err(CodecError::Backend(err.to_string()))
    }
}

impl Codec for SymphoniaCodec {
    fn context(&self) -> &CodecContext {
        &self.ctx
    }

    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<(), CodecError> {
        if self.flushed {
            return Err(CodecError::EndOfStream);
        }
        match packet {
            Some(packet) => {
                if self.pending.len() >= MAX_PENDING_FRAMES {
                    return Err(CodecError::NeedMore);
                }
                self.decode(packet)
            }
            None => {
                self.flushed = true;
                Ok(())
            }
        }
    }

    fn receive_frame(&mut self) -> Result<DecodedFrame, CodecError> {
        match self.pending.pop_front() {
            Some(frame) => Ok(frame),
            None if self.flushed => Err(CodecError::EndOfStream),
            None => Err(CodecError::NeedMore),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::audio::Layout;
    use symphonia::core::codecs::CODEC_TYPE_PCM_S16LE;
    use symphonia::core::sample::SampleFormat;

    fn pcm_params() -> CodecParameters {
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_PCM_S16LE)
            .with_sample_rate(8_000)
            .with_sample_format(SampleFormat::S16)
            .with_bits_per_sample(16)
            .with_bits_per_coded_sample(16)
            .with_channels(Layout::Mono.into_channels())
            .with_max_frames_per_packet(1024);
        params
    }

    fn pcm_packet(ts: u64, samples: &[i16]) -> Packet {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Packet::new_from_slice(0, ts, samples.len() as u64, &bytes)
    }

    #[test]
    fn decodes_pcm_packet_into_interleaved_frame() {
        let mut codec = SymphoniaCodec::new(&pcm_params()).unwrap();
        assert!(matches!(codec.receive_frame(), Err(CodecError::NeedMore)));

        codec
            .send_packet(Some(&pcm_packet(160, &[0, 16_384, -16_384, 0])))
            .unwrap();
        let frame = codec.receive_frame().unwrap();
        assert_eq!(frame.pts, Some(160));
        assert_eq!(frame.frames, 4);
        assert_eq!(frame.channels, 1);
        assert!((frame.samples[1] - 0.5).abs() < 1e-3);
        assert!((frame.samples[2] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn refuses_input_while_output_is_full() {
        let mut codec = SymphoniaCodec::new(&pcm_params()).unwrap();
        for ts in 0..MAX_PENDING_FRAMES as u64 {
            codec.send_packet(Some(&pcm_packet(ts, &[1, 2]))).unwrap();
        }
        assert!(matches!(
            codec.send_packet(Some(&pcm_packet(9, &[1, 2]))),
            Err(CodecError::NeedMore)
        ));
        codec.receive_frame().unwrap();
        assert!(codec.send_packet(Some(&pcm_packet(9, &[1, 2]))).is_ok());
    }

    #[test]
    fn flush_drains_pending_then_reports_end() {
        let mut codec = SymphoniaCodec::new(&pcm_params()).unwrap();
        codec.send_packet(Some(&pcm_packet(0, &[7, 7]))).unwrap();
        codec.send_packet(None).unwrap();

        assert!(codec.receive_frame().is_ok());
        assert!(matches!(codec.receive_frame(), Err(CodecError::EndOfStream)));
        assert!(matches!(codec.send_packet(None), Err(CodecError::EndOfStream)));
    }

    #[test]
    fn context_reflects_params() {
        let codec = SymphoniaCodec::new(&pcm_params()).unwrap();
        assert_eq!(codec.context().sample_rate, 8_000);
        assert_eq!(codec.context().source_channels(), Some(1));
    }
}
