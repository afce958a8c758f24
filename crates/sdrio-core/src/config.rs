//! Configuration system for sdrio.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SDRIO_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/sdrio/config.toml
//!   3. ~/.config/sdrio/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::MAX_SAMPLES_PER_FRAME;

/// Half a second of buffering at the maximum sample rate. BSD kernels
/// refuse large resizes, so they get a smaller default.
#[cfg(not(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd")))]
pub const DEFAULT_RECV_BUFF_SIZE: usize = 0x200_0000;
#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
pub const DEFAULT_RECV_BUFF_SIZE: usize = 0x10_0000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SdrConfig {
    pub clock: ClockConfig,
    pub streaming: StreamingConfig,
    pub events: EventsConfig,
    pub modules: ModulesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Master clock (tick) rate applied to every mainboard at startup, Hz.
    pub tick_rate: f64,
    /// Host sample rate applied to every DDC and DUC at startup, Hz.
    pub default_samp_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Samples per frame. Clamped to the wire maximum.
    pub samples_per_frame: usize,
    /// Re-pull rounds before an aggregated receive gives up on alignment.
    pub align_attempts: usize,
    /// Default timeouts used by callers that do not pass their own.
    pub recv_timeout_ms: u64,
    pub send_timeout_ms: u64,
    /// Frames buffered per direction by loopback transports.
    pub loopback_depth: usize,
    /// Kernel receive buffer requested for UDP links, bytes.
    pub recv_buff_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Async event queue capacity. Oldest events are dropped beyond this.
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    /// Files or directories (searched recursively) of modules to load.
    pub paths: Vec<PathBuf>,
    /// Files, or directories of files, listing one module path per line.
    pub list_paths: Vec<PathBuf>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_rate: 200e6,
            default_samp_rate: 1e6,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            samples_per_frame: MAX_SAMPLES_PER_FRAME,
            align_attempts: 8,
            recv_timeout_ms: 100,
            send_timeout_ms: 100,
            loopback_depth: 64,
            recv_buff_size: DEFAULT_RECV_BUFF_SIZE,
        }
    }
}

impl StreamingConfig {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            paths: vec![data_dir().join("modules")],
            list_paths: vec![config_dir().join("modules.d")],
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("sdrio")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("sdrio")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SdrConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            SdrConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config document. Missing sections take their defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SDRIO_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&SdrConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Samples per frame after clamping to what the wire can carry.
    pub fn effective_samples_per_frame(&self) -> usize {
        self.streaming.samples_per_frame.clamp(1, MAX_SAMPLES_PER_FRAME)
    }

    /// Apply SDRIO_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SDRIO_MODULE_PATH") {
            self.modules.paths.extend(split_path_list(&v));
        }
        if let Ok(v) = std::env::var("SDRIO_EVENTS__CAPACITY") {
            if let Ok(n) = v.parse() {
                self.events.capacity = n;
            }
        }
        if let Ok(v) = std::env::var("SDRIO_CLOCK__TICK_RATE") {
            if let Ok(rate) = v.parse() {
                self.clock.tick_rate = rate;
            }
        }
        if let Ok(v) = std::env::var("SDRIO_STREAMING__SAMPLES_PER_FRAME") {
            if let Ok(n) = v.parse() {
                self.streaming.samples_per_frame = n;
            }
        }
    }
}

/// Split a `:`-separated search path, skipping empty segments.
pub fn split_path_list(value: &str) -> Vec<PathBuf> {
    value
        .split(':')
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .collect()
}
