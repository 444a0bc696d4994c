//! Streaming audio device contract plus output device discovery.
//!
//! A [`DeviceSource`] plays a queue of PCM buffers in order. Buffers move through
//! `queued -> processed -> unqueued` and are then refilled by the playback loop. The device
//! is the authority on how many buffers are pending; the loop never tracks that itself.
//!
//! Device errors are latched (like a GL-style error flag) and collected with
//! [`DeviceSource::take_error`] once per loop iteration.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::DeviceError;
use crate::format::OutputFormat;

/// Playback state reported by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    /// Not playing: never started, rewound, or the queue ran dry.
    Stopped,
    Playing,
    Paused,
}

/// Handle of one device-owned buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

pub trait DeviceSource: Send {
    /// Rate the device consumes buffers at.
    fn sample_rate(&self) -> u32;

    /// Allocate `count` device buffers.
    fn generate_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError>;

    /// Upload PCM into a buffer that is not currently queued.
    fn buffer_data(&mut self, buffer: BufferId, format: OutputFormat, data: &[u8]);

    /// Append a buffer to the play queue.
    fn queue_buffer(&mut self, buffer: BufferId);

    /// Remove up to `count` processed buffers from the front of the queue.
    fn unqueue_buffers(&mut self, count: usize) -> Vec<BufferId>;

    /// Buffers in the queue, processed ones included.
    fn buffers_queued(&self) -> usize;

    /// Buffers at the front of the queue that have been fully played.
    fn buffers_processed(&self) -> usize;

    /// Playback position in frames, counted from the start of the queue.
    fn sample_offset(&self) -> usize;

    fn state(&self) -> SourceState;

    /// Start (or restart from the head of the queue) playback.
    fn play(&mut self);

    fn pause(&mut self);

    /// Leave the paused state. The source is left stopped; the playback loop restarts it.
    fn resume(&mut self);

    /// Move the play position back to the head of the queue. A paused source stays paused,
    /// any other source becomes stopped.
    fn rewind(&mut self);

    /// Drop every queued buffer from the source.
    fn detach_buffers(&mut self);

    /// Return and clear the latched error, if any.
    fn take_error(&mut self) -> Option<DeviceError>;
}

/// Device readings the clock correction needs, taken together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub state: SourceState,
    pub queued: usize,
    pub sample_offset: usize,
}

impl DeviceSnapshot {
    pub fn of<D: DeviceSource + ?Sized>(device: &D) -> Self {
        Self {
            state: device.state(),
            queued: device.buffers_queued(),
            sample_offset: device.sample_offset(),
        }
    }
}

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default device.
///
/// Returns an error if no suitable device is found.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose the output config closest to `target_rate`.
///
/// Prefers the highest supported rate that is **<= target_rate**; if none is, the lowest
/// supported rate above it. Ties are broken by sample format preference.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();

    let mut best: Option<(bool, u32, u8, cpal::SupportedStreamConfig)> = None;

    for range in ranges {
        let min = range.min_sample_rate();
        let max = range.max_sample_rate();
        let rate = pick_rate_for_range(min, max, target_rate);
        let below = target_rate.map(|t| rate <= t).unwrap_or(true);
        let format_rank = sample_format_rank(range.sample_format());
        if format_rank >= UNSUPPORTED_RANK {
            continue;
        }
        let cfg = range.with_sample_rate(rate);
        let replace = match &best {
            None => true,
            Some((b_below, b_rate, b_rank, _)) => {
                is_better_candidate(below, rate, format_rank, *b_below, *b_rate, *b_rank)
            }
        };
        if replace {
            best = Some((below, rate, format_rank, cfg));
        }
    }

    best.map(|(_, _, _, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

const UNSUPPORTED_RANK: u8 = 10;

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => UNSUPPORTED_RANK,
    }
}

fn is_better_candidate(
    below: bool,
    rate: u32,
    format_rank: u8,
    best_below: bool,
    best_rate: u32,
    best_rank: u8,
) -> bool {
    if below != best_below {
        below && !best_below
    } else if rate != best_rate {
        if below { rate > best_rate } else { rate < best_rate }
    } else {
        format_rank < best_rank
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
    }

    #[test]
    fn pick_rate_for_range_clamps_to_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(22_050)), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
    }

    #[test]
    fn pick_rate_for_range_defaults_to_max() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn is_better_candidate_prefers_below_target() {
        assert!(is_better_candidate(true, 48_000, 1, false, 48_000, 1));
        assert!(!is_better_candidate(false, 48_000, 1, true, 44_100, 1));
    }

    #[test]
    fn is_better_candidate_prefers_rate_closest_to_target() {
        assert!(is_better_candidate(true, 44_100, 2, true, 32_000, 2));
        assert!(is_better_candidate(false, 48_000, 2, false, 96_000, 2));
    }

    #[test]
    fn is_better_candidate_prefers_lower_rank() {
        assert!(is_better_candidate(true, 48_000, 0, true, 48_000, 2));
    }

    #[test]
    fn unsupported_formats_rank_last() {
        assert_eq!(sample_format_rank(cpal::SampleFormat::F32), 0);
        assert_eq!(sample_format_rank(cpal::SampleFormat::U8), UNSUPPORTED_RANK);
    }
}
