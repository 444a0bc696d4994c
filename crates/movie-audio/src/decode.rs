//! Pulls packets through the codec and the resampler, one frame at a time.

use crate::backlog::SampleBacklog;
use crate::clock::PresentationClock;
use crate::codec::Codec;
use crate::error::CodecError;
use crate::packet::{PacketSource, SendStatus};
use crate::quit::QuitFlag;
use crate::resample::Resampler;

const NANOS_PER_SEC: i128 = 1_000_000_000;

pub struct FrameDecoder<C, S> {
    codec: C,
    source: S,
    resampler: Resampler,
    quit: QuitFlag,
    /// The packet source reported end of stream.
    source_ended: bool,
    /// The codec has no more frames to hand out.
    codec_ended: bool,
    rate_flushed: bool,
}

impl<C: Codec, S: PacketSource> FrameDecoder<C, S> {
    pub fn new(codec: C, source: S, resampler: Resampler, quit: QuitFlag) -> Self {
        Self {
            codec,
            source,
            resampler,
            quit,
            source_ended: false,
            codec_ended: false,
            rate_flushed: false,
        }
    }

    /// Prime the codec: feed packets until it stops accepting input or the source ends.
    ///
    /// Returns the number of packets accepted.
    pub fn prefill(&mut self) -> usize {
        let mut sent = 0;
        while !self.quit.is_set() {
            match self.source.send_to(&mut self.codec) {
                Ok(SendStatus::Sent) => sent += 1,
                Ok(SendStatus::NeedMore) => break,
                Ok(SendStatus::EndOfStream) => {
                    self.source_ended = true;
                    break;
                }
                Err(e) => tracing::warn!(error = %e, "packet rejected during prefill"),
            }
        }
        tracing::debug!(packets = sent, "codec prefilled");
        sent
    }

    /// Decode, convert and store the next frame in `backlog`.
    ///
    /// Returns the number of frames now held by the backlog, or 0 once the stream is
    /// exhausted or quit was requested. Re-anchors `clock` on the timestamp of the first
    /// frame now in the backlog when the decoded frame carries one.
    pub fn decode_frame(
        &mut self,
        clock: &mut PresentationClock,
        backlog: &mut SampleBacklog,
    ) -> usize {
        loop {
            if self.quit.is_set() {
                return 0;
            }
            if self.codec_ended {
                return self.drain_tail(backlog);
            }

            match self.codec.receive_frame() {
                Ok(frame) => {
                    if frame.frames == 0 {
                        continue;
                    }
                    let anchor = frame.pts.map(|pts| self.backlog_start_nanos(pts));
                    match self.resampler.convert(&frame, backlog) {
                        Ok(0) => continue,
                        Ok(n) => {
                            if let Some(anchor) = anchor {
                                self.sync_clock(clock, anchor);
                            }
                            return n;
                        }
                        Err(e) => tracing::warn!(error = %e, "dropping frame after conversion failure"),
                    }
                }
                Err(CodecError::NeedMore) => {
                    if self.source_ended {
                        // Source gave up without flushing the codec.
                        self.codec_ended = true;
                        continue;
                    }
                    self.send_one();
                }
                Err(CodecError::EndOfStream) => self.codec_ended = true,
                Err(e) => tracing::warn!(error = %e, "decode error, skipping"),
            }
        }
    }

    /// Timestamp of the first sample converted out of a frame stamped `pts`.
    ///
    /// Must be taken before the frame is handed to the resampler: input still held by the
    /// rate converter comes out ahead of the new frame.
    fn backlog_start_nanos(&self, pts: i64) -> i64 {
        let ctx = self.codec.context();
        let pts_ns = ctx.timestamp_to_nanos(pts);
        if ctx.sample_rate == 0 {
            return pts_ns;
        }
        let held =
            self.resampler.pending_frames() as i128 * NANOS_PER_SEC / i128::from(ctx.sample_rate);
        pts_ns.saturating_sub(i64::try_from(held).unwrap_or(i64::MAX))
    }

    /// Converted chunks round to whole output frames, so with rate conversion the running
    /// clock and the anchor may differ by a frame or so. Only larger gaps move the clock.
    fn sync_clock(&self, clock: &mut PresentationClock, anchor: i64) {
        if self.resampler.is_converting_rate() {
            let slack = 2 * NANOS_PER_SEC / i128::from(self.resampler.output_rate().max(1));
            if i128::from(clock.nanos().abs_diff(anchor)) <= slack {
                return;
            }
        }
        clock.reset_to(anchor);
    }

    fn send_one(&mut self) {
        match self.source.send_to(&mut self.codec) {
            Ok(SendStatus::Sent | SendStatus::NeedMore) => {}
            Ok(SendStatus::EndOfStream) => {
                tracing::debug!("packet source reached end of stream");
                self.source_ended = true;
            }
            Err(e) => tracing::warn!(error = %e, "packet send failed"),
        }
    }

    fn drain_tail(&mut self, backlog: &mut SampleBacklog) -> usize {
        if self.rate_flushed {
            return 0;
        }
        self.rate_flushed = true;
        match self.resampler.drain(backlog) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "rate converter flush failed");
                0
            }
        }
    }
}
