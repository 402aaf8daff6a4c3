//! Tuning configuration and config file paths.
//!
//! Fetch size, frame cache cap and request concurrency have no single right
//! value: they depend on device memory and network. [`TuningProfile`] bundles
//! sensible presets; every field can still be overridden from `fourds.json` or
//! the command line.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::System;

use crate::net::assembler::SplitPolicy;
use crate::net::scheduler::SchedulerConfig;

pub const CONFIG_FILE: &str = "fourds.json";
pub const LOG_FILE: &str = "fourds.log";
pub const CONFIG_DIR_ENV: &str = "FOURDS_CONFIG_DIR";

const MIB: u64 = 1024 * 1024;

/// Device/network class presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TuningProfile {
    Desktop,
    Mobile,
    Constrained,
}

impl TuningProfile {
    /// Bytes per bulk window.
    pub fn fetch_size(self) -> u64 {
        match self {
            TuningProfile::Desktop => 6 * MIB,
            TuningProfile::Mobile => 2 * MIB,
            TuningProfile::Constrained => 512 * 1024,
        }
    }

    pub fn max_cached_frames(self) -> usize {
        match self {
            TuningProfile::Desktop => 45,
            TuningProfile::Mobile => 20,
            TuningProfile::Constrained => 15,
        }
    }

    pub fn max_requests(self) -> usize {
        match self {
            TuningProfile::Desktop | TuningProfile::Mobile => 3,
            TuningProfile::Constrained => 2,
        }
    }

    /// Pick a profile from total memory and core count.
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let total_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpus = num_cpus::get();

        let profile = if total_gb < 2.0 || cpus <= 2 {
            TuningProfile::Constrained
        } else if total_gb < 6.0 || cpus <= 4 {
            TuningProfile::Mobile
        } else {
            TuningProfile::Desktop
        };
        debug!("Detected {:.1} GB RAM, {} CPUs -> {:?} profile", total_gb, cpus, profile);
        profile
    }
}

/// Everything that tunes one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Target bytes per bulk window.
    pub fetch_size: u64,
    /// Frame cache cap.
    pub max_cached_frames: usize,
    /// Range requests in flight at once.
    pub max_requests: usize,
    /// Keep downloaded chunks for replay instead of re-fetching on loop.
    pub keep_chunks_resident: bool,
    /// Windows above this size are split into concurrent sub-ranges.
    pub parallel_threshold: u64,
    pub max_part_size: u64,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    /// 0 = one per core, at most 8.
    pub decode_workers: usize,
    /// Chunks dispatched per decode tick.
    pub chunks_per_tick: usize,
    /// Decode ticks per frame period.
    pub decode_ticks_per_frame: u32,
    /// Loop the stream back to the first bloc.
    pub wrap: bool,
    /// Start playing as soon as the frame cache first fills.
    pub play_on_load: bool,
    /// Show the first frame when ready, without playing.
    pub show_placeholder: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::for_profile(TuningProfile::Desktop)
    }
}

impl StreamConfig {
    pub fn for_profile(profile: TuningProfile) -> Self {
        Self {
            fetch_size: profile.fetch_size(),
            max_cached_frames: profile.max_cached_frames(),
            max_requests: profile.max_requests(),
            keep_chunks_resident: false,
            parallel_threshold: MIB,
            max_part_size: MIB,
            request_timeout_ms: 30_000,
            max_retries: 3,
            decode_workers: 0,
            chunks_per_tick: 6,
            decode_ticks_per_frame: 6,
            wrap: true,
            play_on_load: true,
            show_placeholder: false,
        }
    }

    /// Load from a JSON file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(cfg)
    }

    /// Load `fourds.json` from the config dir if present, else defaults.
    pub fn load_or_default(paths: &PathConfig) -> Result<Self> {
        let path = config_file(CONFIG_FILE, paths);
        if path.exists() {
            Self::load(&path)
        } else {
            debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Decode dispatch period: `1000 / (fps x ticks_per_frame)` ms.
    pub fn decode_tick(&self, frame_rate: f32) -> Duration {
        let per_second = frame_rate.max(1.0) as f64 * self.decode_ticks_per_frame.max(1) as f64;
        Duration::from_secs_f64(1.0 / per_second)
    }

    /// Playback period: one frame.
    pub fn playback_tick(&self, frame_rate: f32) -> Duration {
        Duration::from_secs_f64(1.0 / frame_rate.max(1.0) as f64)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_in_flight: self.max_requests.max(1),
            max_retries: self.max_retries,
            timeout: self.request_timeout(),
        }
    }

    pub fn split_policy(&self) -> SplitPolicy {
        SplitPolicy {
            parallel_threshold: self.parallel_threshold,
            max_part: self.max_part_size.max(1),
            parallelism: self.max_requests.max(1),
        }
    }
}

/// Overrides for default application paths.
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args -> ENV var (FOURDS_CONFIG_DIR) -> None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Path to a configuration or log file.
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. FOURDS_CONFIG_DIR environment variable
/// 3. Local folder IF fourds.json or fourds.log exist there
/// 4. Platform config directory from dirs-next (e.g. ~/.config/fourds)
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    config_dir(config).join(name)
}

/// Path to a data file (logs). Same priority, with the platform data directory last.
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    data_dir(config).join(name)
}

pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = config_dir(config);
    let data_dir = data_dir(config);
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    }
    if data_dir != config_dir && !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }
    Ok(())
}

fn has_local_config_files(dir: &Path) -> bool {
    [CONFIG_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

fn config_dir(config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::config_dir())
}

fn data_dir(config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::data_dir())
}

fn resolve_dir(config: &PathConfig, platform: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Ok(current_dir) = std::env::current_dir() {
        if has_local_config_files(&current_dir) {
            return current_dir;
        }
    }
    match platform {
        Some(dir) => dir.join("fourds"),
        None => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles() {
        let d = StreamConfig::for_profile(TuningProfile::Desktop);
        assert_eq!(d.fetch_size, 6 * MIB);
        assert_eq!(d.max_cached_frames, 45);
        let c = StreamConfig::for_profile(TuningProfile::Constrained);
        assert_eq!(c.fetch_size, 512 * 1024);
        assert_eq!(c.max_cached_frames, 15);
        assert_eq!(c.max_requests, 2);
    }

    #[test]
    fn test_decode_tick() {
        let cfg = StreamConfig::default();
        // 1000 / (30 x 6) ms
        let tick = cfg.decode_tick(30.0);
        assert!((tick.as_secs_f64() * 1000.0 - 5.5555).abs() < 0.01);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: StreamConfig = serde_json::from_str(r#"{"max_cached_frames": 5, "wrap": false}"#).unwrap();
        assert_eq!(cfg.max_cached_frames, 5);
        assert!(!cfg.wrap);
        assert_eq!(cfg.chunks_per_tick, 6);
        assert_eq!(cfg.max_retries, 3);
    }

    #[test]
    fn test_save_load() {
        let dir = std::env::temp_dir().join(format!("fourds-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);

        let mut cfg = StreamConfig::for_profile(TuningProfile::Mobile);
        cfg.keep_chunks_resident = true;
        cfg.save(&path).unwrap();
        assert_eq!(StreamConfig::load(&path).unwrap(), cfg);

        let paths = PathConfig {
            config_dir: Some(dir.clone()),
        };
        assert_eq!(StreamConfig::load_or_default(&paths).unwrap(), cfg);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_config_file_with_custom_dir() {
        let config = PathConfig {
            config_dir: Some(PathBuf::from("/custom")),
        };
        assert_eq!(config_file("fourds.json", &config), PathBuf::from("/custom/fourds.json"));
        assert_eq!(data_file("fourds.log", &config), PathBuf::from("/custom/fourds.log"));
    }
}
