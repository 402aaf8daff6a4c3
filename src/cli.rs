use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{StreamConfig, TuningProfile};

// Build version with pipeline info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Codec:  raw mesh (0x5257)\n",
    "HTTP:   reqwest (rustls) / rouille\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Streaming player for 4DS volumetric video
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging to file (default: fourds.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE", global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print sequence info and bloc index of a container
    Inspect {
        /// http(s):// URL or local path
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Stream, decode and play a container headlessly
    Play {
        /// http(s):// URL or local path
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Seconds to play
        #[arg(short = 's', long, value_name = "N", default_value_t = 10.0)]
        seconds: f64,

        #[command(flatten)]
        tuning: TuningArgs,
    },

    /// Serve a local file over HTTP with byte-range support
    Serve {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(short = 'p', long, default_value_t = 8040)]
        port: u16,

        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Write a synthetic container (raw mesh codec)
    Synth {
        #[arg(value_name = "OUT")]
        out: PathBuf,

        #[arg(short = 'n', long, default_value_t = 300)]
        frames: u32,

        #[arg(long, default_value_t = 30.0)]
        fps: f32,

        /// Frames per bloc
        #[arg(short = 'b', long = "bloc-size", default_value_t = 10)]
        bloc_size: usize,

        /// Texture bytes per frame
        #[arg(long = "texture", value_name = "BYTES", default_value_t = 4096)]
        texture_len: usize,
    },
}

/// Overrides on top of `fourds.json`.
#[derive(clap::Args, Debug, Default)]
pub struct TuningArgs {
    /// Device profile (default: detected from memory and cores)
    #[arg(long, value_enum)]
    pub profile: Option<TuningProfile>,

    /// Bytes per bulk window
    #[arg(long = "fetch-size", value_name = "BYTES")]
    pub fetch_size: Option<u64>,

    /// Frame cache cap
    #[arg(long = "cache-size", value_name = "N")]
    pub cache_size: Option<usize>,

    /// Concurrent range requests
    #[arg(long = "max-requests", value_name = "N")]
    pub max_requests: Option<usize>,

    /// Decode threads (0 = auto)
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Keep downloaded chunks and replay them instead of re-fetching
    #[arg(long = "keep-chunks")]
    pub keep_chunks: bool,

    /// Play once instead of looping
    #[arg(long = "no-loop")]
    pub no_loop: bool,
}

impl TuningArgs {
    /// Apply overrides. An explicit profile replaces the profile-driven fields
    /// of `base` before the individual flags.
    pub fn apply(&self, base: StreamConfig) -> StreamConfig {
        let mut cfg = base;
        if let Some(profile) = self.profile {
            cfg.fetch_size = profile.fetch_size();
            cfg.max_cached_frames = profile.max_cached_frames();
            cfg.max_requests = profile.max_requests();
        }
        if let Some(v) = self.fetch_size {
            cfg.fetch_size = v;
        }
        if let Some(v) = self.cache_size {
            cfg.max_cached_frames = v;
        }
        if let Some(v) = self.max_requests {
            cfg.max_requests = v;
        }
        if let Some(v) = self.workers {
            cfg.decode_workers = v;
        }
        if self.keep_chunks {
            cfg.keep_chunks_resident = true;
        }
        if self.no_loop {
            cfg.wrap = false;
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_play() {
        let args = Args::parse_from([
            "fourds",
            "-vv",
            "play",
            "http://cdn/seq.4ds",
            "--seconds",
            "2.5",
            "--profile",
            "mobile",
            "--cache-size",
            "12",
            "--no-loop",
        ]);
        assert_eq!(args.verbosity, 2);
        let Command::Play { source, seconds, tuning } = args.command else {
            panic!("expected play");
        };
        assert_eq!(source, "http://cdn/seq.4ds");
        assert_eq!(seconds, 2.5);

        let cfg = tuning.apply(StreamConfig::default());
        assert_eq!(cfg.fetch_size, TuningProfile::Mobile.fetch_size());
        assert_eq!(cfg.max_cached_frames, 12);
        assert!(!cfg.wrap);
    }

    #[test]
    fn test_parse_synth_defaults() {
        let args = Args::parse_from(["fourds", "synth", "out.4ds"]);
        let Command::Synth { frames, fps, bloc_size, .. } = args.command else {
            panic!("expected synth");
        };
        assert_eq!((frames, fps, bloc_size), (300, 30.0, 10));
    }

    #[test]
    fn test_log_flag_optional_value() {
        let args = Args::parse_from(["fourds", "inspect", "a.4ds", "--log"]);
        assert_eq!(args.log_file, Some(None));
        let args = Args::parse_from(["fourds", "inspect", "a.4ds", "-l", "x.log"]);
        assert_eq!(args.log_file, Some(Some(PathBuf::from("x.log"))));
    }
}
