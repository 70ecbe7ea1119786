//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Frame filename pattern used by the scanner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanConfig {
    /// Literal text before the frame number (default "P")
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Literal text after the frame number, usually the extension (default ".JPG")
    #[serde(default = "default_suffix")]
    pub suffix: String,
}

fn default_prefix() -> String {
    "P".to_string()
}

fn default_suffix() -> String {
    ".JPG".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            suffix: default_suffix(),
        }
    }
}

/// External tool locations and supervisor timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    #[serde(default = "default_nvidia_smi_path")]
    pub nvidia_smi_path: PathBuf,
    /// Seconds to wait for the encoder to exit once its output closes (default 120)
    #[serde(default = "default_exit_timeout_secs")]
    pub exit_timeout_secs: u64,
    /// Grace window between the quit request and a forced kill (default 3000)
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Upper bound on a single progress read before cancellation is rechecked (default 250)
    #[serde(default = "default_read_poll_ms")]
    pub read_poll_ms: u64,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_nvidia_smi_path() -> PathBuf {
    PathBuf::from("nvidia-smi")
}

fn default_exit_timeout_secs() -> u64 {
    120
}

fn default_cancel_grace_ms() -> u64 {
    3000
}

fn default_read_poll_ms() -> u64 {
    250
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            nvidia_smi_path: default_nvidia_smi_path(),
            exit_timeout_secs: default_exit_timeout_secs(),
            cancel_grace_ms: default_cancel_grace_ms(),
            read_poll_ms: default_read_poll_ms(),
        }
    }
}

/// Where rendered videos are written
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("timelapses_output")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
        }
    }
}

/// Encoder safety configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EncoderSafetyConfig {
    /// Refuse GPU encoder variants even when requested (default false)
    #[serde(default)]
    pub disallow_hardware_encoding: bool,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub encoder_safety: EncoderSafetyConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - TIMELAPSE_PREFIX -> scan.prefix
    /// - TIMELAPSE_SUFFIX -> scan.suffix
    /// - TIMELAPSE_FFMPEG -> encoder.ffmpeg_path
    /// - TIMELAPSE_FFPROBE -> encoder.ffprobe_path
    /// - TIMELAPSE_EXIT_TIMEOUT_SECS -> encoder.exit_timeout_secs
    /// - TIMELAPSE_OUTPUT_DIR -> output.directory
    /// - TIMELAPSE_DISALLOW_HARDWARE_ENCODING -> encoder_safety.disallow_hardware_encoding
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("TIMELAPSE_PREFIX") {
            self.scan.prefix = val;
        }

        if let Ok(val) = env::var("TIMELAPSE_SUFFIX") {
            self.scan.suffix = val;
        }

        if let Ok(val) = env::var("TIMELAPSE_FFMPEG") {
            if !val.is_empty() {
                self.encoder.ffmpeg_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("TIMELAPSE_FFPROBE") {
            if !val.is_empty() {
                self.encoder.ffprobe_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("TIMELAPSE_EXIT_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.encoder.exit_timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("TIMELAPSE_OUTPUT_DIR") {
            if !val.is_empty() {
                self.output.directory = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("TIMELAPSE_DISALLOW_HARDWARE_ENCODING") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.encoder_safety.disallow_hardware_encoding = true,
                "false" | "0" | "no" => self.encoder_safety.disallow_hardware_encoding = false,
                _ => {} // Invalid value, keep existing
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    ///
    /// Environment overrides are applied in both cases. Any other read or
    /// parse failure is still returned.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load_from_file(path) {
            Ok(mut config) => {
                config.apply_env_overrides();
                Ok(config)
            }
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut config = Config::default();
                config.apply_env_overrides();
                Ok(config)
            }
            Err(e) => Err(e),
        }
    }
}
