use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "movie-player", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Playback duration of one device buffer, in milliseconds
    #[arg(long, default_value_t = 20)]
    pub buffer_ms: u64,

    /// Number of device buffers kept queued
    #[arg(long, default_value_t = 4)]
    pub buffers: usize,

    /// Resampler input chunk size in frames (only used when the device rate differs)
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Max compressed packets buffered between demuxer and decoder
    #[arg(long, default_value_t = 64)]
    pub packet_queue: usize,

    /// How often to log the audio clock, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub clock_ms: u64,

    /// Print the final session status as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play the audio track of a media file
    Play {
        /// Path to a media file
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_playback_config() {
        let args = Args::parse_from(["movie-player", "play", "movie.mkv"]);
        assert_eq!(args.buffer_ms, 20);
        assert_eq!(args.buffers, 4);
        assert_eq!(args.chunk_frames, 1024);
        assert!(matches!(args.cmd, Some(Command::Play { .. })));
    }

    #[test]
    fn list_devices_needs_no_subcommand() {
        let args = Args::parse_from(["movie-player", "--list-devices"]);
        assert!(args.list_devices);
        assert!(args.cmd.is_none());
    }
}
