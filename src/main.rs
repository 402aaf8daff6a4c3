use fourds::cli::{Args, Command, TuningArgs};
use fourds::config::{self, PathConfig, StreamConfig, TuningProfile};
use fourds::core::clock::{SilentAudio, TimeSource, WallClock};
use fourds::core::codec::{MeshFrame, RawMeshFactory};
use fourds::core::stream::{Renderer, Stream};
use fourds::format::sequence::{BlocInfo, SequenceInfo};
use fourds::format::writer::synthesize;
use fourds::net::source::open_source;
use fourds::server::RangeServer;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Renderer for headless playback: logs frames instead of drawing them.
#[derive(Default)]
struct LogRenderer {
    frames: u64,
}

impl Renderer for LogRenderer {
    fn init(&mut self, info: &SequenceInfo) {
        info!(
            "Renderer init: {} frames, {} blocs @ {} fps, max {} verts / {} tris, texture {}x{} (enc {})",
            info.frame_count,
            info.bloc_count,
            info.frame_rate,
            info.max_vertices,
            info.max_triangles,
            info.texture_width,
            info.texture_height,
            info.texture_encoding
        );
    }

    fn render(&mut self, frame: &MeshFrame) {
        self.frames += 1;
        if self.frames % 30 == 0 {
            info!("{} frames rendered, now at {} ({} bytes)", self.frames, frame.frame_index, frame.byte_size());
        }
        debug!(
            "frame {}: {} verts, {} faces, {} texture bytes",
            frame.frame_index,
            frame.vertex_count(),
            frame.face_count(),
            frame.texture.len()
        );
    }
}

#[derive(Serialize)]
struct Inspection<'a> {
    source: &'a str,
    info: &'a SequenceInfo,
    duration: f64,
    blocs: Vec<BlocView<'a>>,
}

#[derive(Serialize)]
struct BlocView<'a> {
    #[serde(flatten)]
    bloc: &'a BlocInfo,
    start: u64,
    end: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Create path configuration from CLI args and environment
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }

    init_logging(&args, &path_config)?;
    debug!("Command-line args: {:?}", args);
    info!("Config path: {}", config::config_file(config::CONFIG_FILE, &path_config).display());

    match args.command {
        Command::Inspect { source, json } => inspect(&source, json),
        Command::Play { source, seconds, tuning } => play(&source, seconds, &tuning, &path_config),
        Command::Serve { file, port, host } => RangeServer::new(&file)?.run(&format!("{}:{}", host, port)),
        Command::Synth {
            out,
            frames,
            fps,
            bloc_size,
            texture_len,
        } => synth(&out, frames, fps, bloc_size, texture_len),
    }
}

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| config::data_file(config::LOG_FILE, path_config));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .filter_module("rouille", log::LevelFilter::Warn)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .filter_module("rouille", log::LevelFilter::Warn)
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn open_stream(uri: &str, cfg: StreamConfig, clock: Arc<dyn TimeSource>) -> Result<Stream> {
    let source = open_source(uri).with_context(|| format!("Cannot open {}", uri))?;
    let mut stream = Stream::new(source, cfg, Arc::new(RawMeshFactory), clock);
    stream
        .open_blocking(OPEN_TIMEOUT)
        .with_context(|| format!("Failed to open {}", uri))?;
    Ok(stream)
}

fn inspect(uri: &str, json: bool) -> Result<()> {
    let stream = open_stream(uri, StreamConfig::default(), Arc::new(WallClock::new()))?;
    let index = stream
        .sequence_index()
        .context("sequence index missing after open")?;

    let blocs = index
        .blocs
        .iter()
        .enumerate()
        .map(|(i, bloc)| {
            let (start, end) = index.bloc_bounds(i);
            BlocView { bloc, start, end }
        })
        .collect();
    let report = Inspection {
        source: uri,
        info: &index.info,
        duration: index.duration(),
        blocs,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let i = report.info;
    println!("Source:    {}", uri);
    println!("Version:   {}", index.header.version);
    println!("Frames:    {} @ {} fps ({:.2}s)", i.frame_count, i.frame_rate, report.duration);
    println!("Blocs:     {}", i.bloc_count);
    println!("Limits:    {} vertices, {} triangles", i.max_vertices, i.max_triangles);
    println!("Texture:   {}x{} (encoding {})", i.texture_width, i.texture_height, i.texture_encoding);
    println!("Tracks:    {}", i.additional_tracks);
    println!();
    println!("{:>6} {:>8} {:>6} {:>12} {:>12}", "bloc", "key", "inter", "start", "bytes");
    for (n, b) in report.blocs.iter().enumerate() {
        println!(
            "{:>6} {:>8} {:>6} {:>12} {:>12}",
            n,
            b.bloc.key_frame_id,
            b.bloc.inter_frame_count,
            b.start,
            b.end - b.start
        );
    }
    Ok(())
}

fn play(uri: &str, seconds: f64, tuning: &TuningArgs, path_config: &PathConfig) -> Result<()> {
    let mut base = StreamConfig::load_or_default(path_config)?;
    if tuning.profile.is_none() && !config::config_file(config::CONFIG_FILE, path_config).exists() {
        base = StreamConfig::for_profile(TuningProfile::detect());
    }
    let cfg = tuning.apply(base);
    info!(
        "Tuning: fetch {} bytes, cache {} frames, {} requests, resident {}",
        cfg.fetch_size, cfg.max_cached_frames, cfg.max_requests, cfg.keep_chunks_resident
    );

    let clock: Arc<dyn TimeSource> = Arc::new(WallClock::new());
    let mut stream = open_stream(uri, cfg, Arc::clone(&clock))?;
    stream.attach_renderer(LogRenderer::default());
    stream.attach_audio(SilentAudio::new(clock));
    if !stream.config().play_on_load {
        stream.play()?;
    }

    stream.run_for(Duration::from_secs_f64(seconds.max(0.0)))?;

    let stats = stream.stats();
    stream.destroy();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn synth(out: &Path, frames: u32, fps: f32, bloc_size: usize, texture_len: usize) -> Result<()> {
    let container = synthesize(frames, fps, bloc_size, texture_len)?;
    std::fs::write(out, &container.bytes).with_context(|| format!("Failed to write {}", out.display()))?;
    println!(
        "Wrote {}: {} frames in {} blocs, {} bytes",
        out.display(),
        container.info.frame_count,
        container.info.bloc_count,
        container.len()
    );
    Ok(())
}
