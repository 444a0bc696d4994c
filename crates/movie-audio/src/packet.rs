//! Packet source contract and a bounded packet queue implementing it.
//!
//! The demux side pushes compressed packets; the playback worker drains them into its codec
//! through [`PacketSource::send_to`]. A packet stays at the front of the queue while the
//! codec answers `NeedMore`, so nothing is lost when the codec's output is full.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::codec::{Codec, Packet};
use crate::error::CodecError;
use crate::quit::QuitFlag;

/// How long a blocked queue call sleeps before re-checking its cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Result of feeding one packet to a codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// A packet was accepted.
    Sent,
    /// The codec holds undrained output and accepts nothing right now.
    NeedMore,
    /// No packets are left and the codec has been flushed.
    EndOfStream,
}

/// Supplies compressed packets for one stream.
pub trait PacketSource {
    /// Feed the next packet to `codec`.
    ///
    /// Backend errors are returned as `Err`; the offending packet is dropped.
    fn send_to(&mut self, codec: &mut dyn Codec) -> Result<SendStatus, CodecError>;
}

/// Thread-safe bounded FIFO of compressed packets.
///
/// - Producers block in [`PacketQueue::push_blocking`] while the queue is full.
/// - [`PacketQueue::close`] marks the end of input and wakes all waiters; it is idempotent.
/// - An optional cancel flag bounds every wait.
pub struct PacketQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_packets: usize,
    cancel: Option<QuitFlag>,
}

struct QueueInner {
    packets: VecDeque<Packet>,
    finished: bool,
}

impl PacketQueue {
    pub fn new(max_packets: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                packets: VecDeque::new(),
                finished: false,
            }),
            cv: Condvar::new(),
            max_packets: max_packets.max(1),
            cancel: None,
        }
    }

    /// Queue whose blocking calls give up once `cancel` is set.
    pub fn with_cancel(max_packets: usize, cancel: QuitFlag) -> Self {
        Self {
            cancel: Some(cancel),
            ..Self::new(max_packets)
        }
    }

    /// Number of packets waiting.
    pub fn len(&self) -> usize {
        self.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().finished
    }

    /// Mark the end of input. Queued packets remain available.
    pub fn close(&self) {
        self.lock().finished = true;
        self.cv.notify_all();
    }

    /// Append a packet, waiting while the queue is full.
    ///
    /// Returns `false` (and drops the packet) if the queue was closed or cancelled.
    pub fn push_blocking(&self, packet: Packet) -> bool {
        let mut g = self.lock();
        while g.packets.len() >= self.max_packets && !g.finished {
            if self.cancelled() {
                return false;
            }
            g = self
                .cv
                .wait_timeout(g, CANCEL_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if g.finished {
            return false;
        }
        g.packets.push_back(packet);
        drop(g);
        self.cv.notify_all();
        true
    }

    fn send_front(&self, codec: &mut dyn Codec) -> Result<SendStatus, CodecError> {
        let mut g = self.lock();
        while g.packets.is_empty() && !g.finished {
            if self.cancelled() {
                return Ok(SendStatus::EndOfStream);
            }
            g = self
                .cv
                .wait_timeout(g, CANCEL_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let status = match g.packets.front() {
            Some(packet) => match codec.send_packet(Some(packet)) {
                Ok(()) => {
                    g.packets.pop_front();
                    Ok(SendStatus::Sent)
                }
                Err(CodecError::NeedMore) => Ok(SendStatus::NeedMore),
                Err(CodecError::EndOfStream) => Ok(SendStatus::EndOfStream),
                Err(e) => {
                    g.packets.pop_front();
                    Err(e)
                }
            },
            None => {
                match codec.send_packet(None) {
                    Ok(()) | Err(CodecError::EndOfStream) => {}
                    Err(e) => tracing::warn!(error = %e, "codec flush failed"),
                }
                Ok(SendStatus::EndOfStream)
            }
        };

        drop(g);
        self.cv.notify_all();
        status
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(QuitFlag::is_set)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PacketSource for PacketQueue {
    fn send_to(&mut self, codec: &mut dyn Codec) -> Result<SendStatus, CodecError> {
        self.send_front(codec)
    }
}

impl PacketSource for Arc<PacketQueue> {
    fn send_to(&mut self, codec: &mut dyn Codec) -> Result<SendStatus, CodecError> {
        self.as_ref().send_front(codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedCodec, mono16_context, pcm_packet};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn sent_packets_leave_the_queue() {
        let mut queue = PacketQueue::new(8);
        assert!(queue.push_blocking(pcm_packet(0, &[1, 2, 3])));
        let mut codec = ScriptedCodec::new(mono16_context(8_000));

        assert_eq!(queue.send_to(&mut codec).unwrap(), SendStatus::Sent);
        assert!(queue.is_empty());
        assert_eq!(codec.packets_accepted(), 1);
    }

    #[test]
    fn need_more_keeps_the_packet_queued() {
        let mut queue = PacketQueue::new(8);
        for ts in 0..3 {
            queue.push_blocking(pcm_packet(ts, &[1]));
        }
        let mut codec = ScriptedCodec::new(mono16_context(8_000)).with_capacity(2);

        assert_eq!(queue.send_to(&mut codec).unwrap(), SendStatus::Sent);
        assert_eq!(queue.send_to(&mut codec).unwrap(), SendStatus::Sent);
        assert_eq!(queue.send_to(&mut codec).unwrap(), SendStatus::NeedMore);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn backend_errors_drop_the_packet() {
        let mut queue = PacketQueue::new(8);
        queue.push_blocking(pcm_packet(0, &[]));
        queue.push_blocking(pcm_packet(1, &[5]));
        let mut codec = ScriptedCodec::new(mono16_context(8_000));

        assert!(matches!(
            queue.send_to(&mut codec),
            Err(CodecError::Backend(_))
        ));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.send_to(&mut codec).unwrap(), SendStatus::Sent);
    }

    #[test]
    fn closed_and_empty_flushes_codec() {
        let mut queue = PacketQueue::new(8);
        queue.close();
        let mut codec = ScriptedCodec::new(mono16_context(8_000));

        assert_eq!(queue.send_to(&mut codec).unwrap(), SendStatus::EndOfStream);
        assert!(codec.is_flushed());
        assert_eq!(queue.send_to(&mut codec).unwrap(), SendStatus::EndOfStream);
    }

    #[test]
    fn push_after_close_is_rejected() {
        let queue = PacketQueue::new(8);
        queue.close();
        assert!(!queue.push_blocking(pcm_packet(0, &[1])));
        assert!(queue.is_closed());
    }

    #[test]
    fn push_blocks_until_space_frees() {
        let queue = Arc::new(PacketQueue::new(1));
        queue.push_blocking(pcm_packet(0, &[1]));

        let producer = queue.clone();
        let handle = thread::spawn(move || producer.push_blocking(pcm_packet(1, &[2])));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.len(), 1);

        let mut consumer = queue.clone();
        let mut codec = ScriptedCodec::new(mono16_context(8_000));
        assert_eq!(consumer.send_to(&mut codec).unwrap(), SendStatus::Sent);

        assert!(handle.join().unwrap());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn send_waits_for_a_producer() {
        let queue = Arc::new(PacketQueue::new(4));
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push_blocking(pcm_packet(0, &[1, 2]));
        });

        let mut consumer = queue.clone();
        let mut codec = ScriptedCodec::new(mono16_context(8_000));
        assert_eq!(consumer.send_to(&mut codec).unwrap(), SendStatus::Sent);
        handle.join().unwrap();
    }

    #[test]
    fn cancel_unblocks_a_waiting_send() {
        let quit = QuitFlag::new();
        let mut queue = PacketQueue::with_cancel(4, quit.clone());
        let mut codec = ScriptedCodec::new(mono16_context(8_000));

        let canceller = quit.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.request();
        });

        let started = Instant::now();
        assert_eq!(queue.send_to(&mut codec).unwrap(), SendStatus::EndOfStream);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!codec.is_flushed());
        handle.join().unwrap();
    }
}
