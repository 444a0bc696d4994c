use std::sync::Arc;

use crate::backlog::SampleBacklog;
use crate::clock::PresentationClock;
use crate::codec::Codec;
use crate::decode::FrameDecoder;
use crate::format::TargetFormat;
use crate::packet::PacketSource;
use crate::status::SessionCounters;

/// Fills device buffers from decoded audio, padding with silence on underrun.
pub struct AudioReader<C, S> {
    decoder: FrameDecoder<C, S>,
    backlog: SampleBacklog,
    target: TargetFormat,
    counters: Arc<SessionCounters>,
}

impl<C: Codec, S: PacketSource> AudioReader<C, S> {
    pub fn new(
        decoder: FrameDecoder<C, S>,
        target: TargetFormat,
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            decoder,
            backlog: SampleBacklog::new(target.frame_size),
            target,
            counters,
        }
    }

    pub fn prefill(&mut self) -> usize {
        self.decoder.prefill()
    }

    /// Fill all of `out` with target-format PCM and advance `clock` by what was written.
    ///
    /// A short read is padded with silence and the clock still advances over the padding.
    /// Returns `false`, leaving `out` untouched, only when not a single frame was available.
    pub fn read_audio(&mut self, out: &mut [u8], clock: &mut PresentationClock) -> bool {
        let frame_size = self.target.frame_size;
        let rate = self.target.sample_rate;
        let wanted = out.len() / frame_size;

        let mut produced = 0;
        while produced < wanted {
            if self.backlog.remaining() == 0 {
                if self.decoder.decode_frame(clock, &mut self.backlog) == 0 {
                    break;
                }
                continue;
            }
            let chunk = self.backlog.take(wanted - produced);
            let frames = chunk.len() / frame_size;
            let start = produced * frame_size;
            out[start..start + chunk.len()].copy_from_slice(chunk);
            produced += frames;
            clock.advance_frames(frames, rate);
        }

        if produced == 0 && wanted > 0 {
            return false;
        }

        if produced < wanted {
            let missing = wanted - produced;
            tracing::debug!(missing_frames = missing, "audio underrun, padding with silence");
            self.counters.record_padding(missing);
            clock.advance_frames(missing, rate);
        }
        out[produced * frame_size..].fill(self.target.width.silence());
        true
    }
}
