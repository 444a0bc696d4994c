//! Container demuxing into a [`PacketQueue`].
//!
//! Uses Symphonia to:
//! - probe the input container
//! - pick the first decodable audio track
//! - push that track's packets into a bounded queue from a background thread
//!
//! The queue is closed on end of file, on a demux error, or when the cancel flag is set.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::packet::PacketQueue;
use crate::quit::QuitFlag;

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Source bit depth (best-effort).
    pub bit_depth: Option<u16>,
    /// Best-effort duration from container metadata.
    pub duration_ms: Option<u64>,
}

/// The audio track of an opened source.
pub struct DemuxedAudio {
    pub params: CodecParameters,
    pub info: SourceInfo,
    pub packets: Arc<PacketQueue>,
    pub handle: JoinHandle<()>,
}

/// Open a media file and start demuxing its audio track.
pub fn open_file(path: &Path, max_packets: usize, cancel: QuitFlag) -> Result<DemuxedAudio> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    open_media_source(Box::new(file), hint, max_packets, cancel)
}

/// Start demuxing from an arbitrary Symphonia [`MediaSource`].
pub fn open_media_source(
    source: Box<dyn MediaSource>,
    hint: Hint,
    max_packets: usize,
    cancel: QuitFlag,
) -> Result<DemuxedAudio> {
    let mss = MediaSourceStream::new(source, Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("probe media source")?;
    let format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .or_else(|| format.default_track())
        .ok_or_else(|| anyhow!("No audio track"))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let info = SourceInfo {
        codec: codec_name_from_params(&params),
        bit_depth: params
            .bits_per_sample
            .or(params.bits_per_coded_sample)
            .and_then(|v| u16::try_from(v).ok()),
        duration_ms: duration_ms_from_codec_params(&params),
    };
    tracing::debug!(track_id, rate_hz = ?params.sample_rate, "audio track selected");

    let packets = Arc::new(PacketQueue::with_cancel(max_packets, cancel.clone()));
    let packets_for_thread = packets.clone();
    let handle = thread::Builder::new()
        .name("demux".to_string())
        .spawn(move || {
            demux_loop(format, track_id, &packets_for_thread, &cancel);
            packets_for_thread.close();
        })
        .context("spawn demux thread")?;

    Ok(DemuxedAudio {
        params,
        info,
        packets,
        handle,
    })
}

fn demux_loop(
    mut format: Box<dyn FormatReader>,
    track_id: u32,
    packets: &PacketQueue,
    cancel: &QuitFlag,
) {
    let mut pushed = 0u64;
    while !cancel.is_set() {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => {
                tracing::error!("demux error: {e:#}");
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        if !packets.push_blocking(packet) {
            break;
        }
        pushed += 1;
    }
    tracing::debug!(packets = pushed, "demux finished");
}

/// Best-effort duration in milliseconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_U8 => "PCM_U8",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
