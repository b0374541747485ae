use serde::Deserialize;
use std::path::Path;

/// Upper bound on frames per mosaic.
pub const MAX_SLOTS: u32 = 16;
/// Lower bound on frames per mosaic.
pub const MIN_SLOTS: u32 = 1;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub input: InputConfig,
    #[serde(default)]
    pub bucket: BucketConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Raw video arriving on stdin.
#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_slots")]
    pub slots: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            prefix: default_prefix(),
            slots: default_slots(),
            poll_interval_ms: default_poll_interval_ms(),
            jpeg_quality: default_jpeg_quality(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Minimum wall-clock spacing between two ingested keyframes.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
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
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.width == 0 || self.input.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "input dimensions must be positive, got {}x{}",
                self.input.width, self.input.height
            )));
        }
        if !(self.input.fps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "input fps must be positive, got {}",
                self.input.fps
            )));
        }
        if self.bucket.capacity == 0 {
            return Err(ConfigError::Invalid("bucket capacity must be positive".into()));
        }
        if !(MIN_SLOTS..=MAX_SLOTS).contains(&self.bucket.slots) {
            return Err(ConfigError::Invalid(format!(
                "bucket slots must be within {MIN_SLOTS}..={MAX_SLOTS}, got {}",
                self.bucket.slots
            )));
        }
        if self.bucket.jpeg_quality == 0 || self.bucket.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "jpeg quality must be within 1..=100, got {}",
                self.bucket.jpeg_quality
            )));
        }
        if !(self.gate.min_interval_secs >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "gate interval must not be negative, got {}",
                self.gate.min_interval_secs
            )));
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
fn default_fps() -> f64 {
    30.0
}
fn default_capacity() -> usize {
    20
}
fn default_prefix() -> String {
    "thumbnail".into()
}
fn default_slots() -> u32 {
    9
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_jpeg_quality() -> u8 {
    95
}
fn default_join_timeout_ms() -> u64 {
    2000
}
fn default_min_interval_secs() -> f64 {
    8.0
}
fn default_log_level() -> String {
    "info".into()
}
