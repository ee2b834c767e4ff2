use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::frame::{PixelFormat, WindowHandle};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the capture bridge serving `/windows/{handle}/frame`.
    pub base_url: String,
    pub window: WindowHandle,
    #[serde(default)]
    pub pixel_format: PixelFormat,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Minimum period between two captures.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// Captures required before the first diff is computed.
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u64,
    #[serde(default = "default_frame_history")]
    pub frame_history: usize,
    #[serde(default = "default_diff_history")]
    pub diff_history: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// A diff byte counts as changed when it is strictly above this value.
    #[serde(default)]
    pub change_threshold: u8,
    /// Log a summary every N polls even when nothing flipped.
    #[serde(default = "default_report_every")]
    pub report_every: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            warmup_frames: default_warmup_frames(),
            frame_history: default_frame_history(),
            diff_history: default_diff_history(),
        }
    }
}

impl DetectorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "detector.sample_interval_ms must be > 0".into(),
            ));
        }
        if self.frame_history < 2 {
            return Err(ConfigError::Invalid(
                "detector.frame_history must hold at least 2 frames".into(),
            ));
        }
        if self.diff_history < 1 {
            return Err(ConfigError::Invalid(
                "detector.diff_history must be >= 1".into(),
            ));
        }
        if self.warmup_frames < 2 {
            return Err(ConfigError::Invalid(
                "detector.warmup_frames must be >= 2".into(),
            ));
        }
        Ok(())
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            change_threshold: 0,
            report_every: default_report_every(),
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.detector.validate()?;
        if self.watch.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "watch.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.watch.report_every == 0 {
            return Err(ConfigError::Invalid("watch.report_every must be > 0".into()));
        }
        if self.source.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "source.request_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_request_timeout_ms() -> u64 {
    2000
}
fn default_sample_interval_ms() -> u64 {
    50
}
fn default_warmup_frames() -> u64 {
    21
}
fn default_frame_history() -> usize {
    2
}
fn default_diff_history() -> usize {
    1
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_report_every() -> u64 {
    20
}
fn default_log_level() -> String {
    "info".into()
}
