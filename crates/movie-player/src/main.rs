//! Movie Player: plays the audio track of a media file and reports the audio clock the
//! way a video scheduler would poll it.
//!
//! ## Pipeline
//! 1. **Demux**: a background thread pushes the audio track's packets into a bounded queue.
//! 2. **Decode/convert**: the playback worker decodes packets, remixes to mono/stereo and
//!    quantizes to 8/16-bit PCM, resampling only if the device runs at another rate.
//! 3. **Output**: a small ring of device buffers is kept queued on a CPAL output stream.

mod cli;

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use cpal::traits::DeviceTrait;
use movie_audio::codec::SymphoniaCodec;
use movie_audio::cpal_source::CpalSource;
use movie_audio::{AudioSession, PlaybackConfig, QuitFlag, demux, device};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,movie_audio=info,movie_player=info")
        }))
        .init();
    let host = cpal::default_host();

    if args.list_devices {
        device::list_devices(&host)?;
        return Ok(());
    }

    let Some(cli::Command::Play { path }) = &args.cmd else {
        return Err(anyhow!("nothing to play (try `play <path>` or --list-devices)"));
    };

    let quit = QuitFlag::new();
    let quit_for_signal = quit.clone();
    ctrlc::set_handler(move || quit_for_signal.request())
        .context("install Ctrl-C handler")?;

    let config = playback_config(&args);
    let demuxed = demux::open_file(path, config.packet_queue_len, quit.clone())?;
    tracing::info!(
        path = %path.display(),
        codec = demuxed.info.codec.as_deref().unwrap_or("unknown"),
        bit_depth = ?demuxed.info.bit_depth,
        duration_ms = ?demuxed.info.duration_ms,
        "audio track selected"
    );
    let codec = SymphoniaCodec::new(&demuxed.params).context("open audio decoder")?;

    let device = device::pick_device(&host, args.device.as_deref())?;
    tracing::info!(device = %device.description()?, "output device");

    let mut session = AudioSession::start(
        codec,
        demuxed.packets.clone(),
        config,
        quit.clone(),
        |format| CpalSource::open(device, format),
    )
    .context("start audio session")?;

    let interval = Duration::from_millis(args.clock_ms.max(10));
    while !session.is_finished() {
        thread::sleep(interval);
        let status = session.status();
        tracing::info!(
            clock_ms = status.clock_ms,
            state = ?status.state,
            queued = status.buffers_queued,
            "audio clock"
        );
    }

    let reason = session.wait();
    quit.request();
    if demuxed.handle.join().is_err() {
        tracing::warn!("demux thread panicked");
    }

    let status = session.status();
    tracing::info!(
        reason = ?reason,
        clock_ms = status.clock_ms,
        underrun_events = status.underrun_events,
        padded_frames = status.padded_frames,
        "playback finished"
    );
    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }
    Ok(())
}

fn playback_config(args: &cli::Args) -> PlaybackConfig {
    PlaybackConfig {
        buffer_time: Duration::from_millis(args.buffer_ms.max(1)),
        buffer_count: args.buffers,
        chunk_frames: args.chunk_frames,
        packet_queue_len: args.packet_queue,
    }
}
