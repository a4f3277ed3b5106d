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
    /// Configuration parsed but violates an invariant
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

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

/// What a scan does with a file whose metadata could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataErrorPolicy {
    /// Log the failure and still run the command decider on default metadata.
    #[default]
    Decide,
    /// Log the failure and skip the file for this scan.
    Skip,
}

impl std::str::FromStr for MetadataErrorPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "decide" => Ok(Self::Decide),
            "skip" => Ok(Self::Skip),
            _ => Err(()),
        }
    }
}

/// Scheduler loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Polling cadence of the scheduler loop in milliseconds (default 1000)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Maximum library scans running at once (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent_scans: u32,
    /// Behaviour when a file's metadata cannot be read
    #[serde(default)]
    pub metadata_error_policy: MetadataErrorPolicy,
    /// Number of logical cores (auto-detected if None)
    #[serde(default)]
    pub logical_cores: Option<u32>,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_concurrent_scans: 0,
            metadata_error_policy: MetadataErrorPolicy::default(),
            logical_cores: None,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StoreConfig {
    /// JSON state file; state is kept in memory only when unset
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

/// Status server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Whether to serve the read-only status endpoints (default true)
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,
    /// Listen address (default 127.0.0.1:7879)
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_server_enabled() -> bool {
    true
}

fn default_bind() -> String {
    "127.0.0.1:7879".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            bind: default_bind(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// tracing `EnvFilter` directive used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// Command decider settings for a seeded library
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeciderConfig {
    /// Codec every video stream should end up in (default "hevc")
    #[serde(default = "default_target_video_codec")]
    pub target_video_codec: String,
    /// Add a stereo downmix when the source only has surround audio
    #[serde(default)]
    pub create_stereo_audio: bool,
    /// Leave HDR sources untouched (default true)
    #[serde(default = "default_skip_hdr")]
    pub skip_hdr: bool,
}

fn default_target_video_codec() -> String {
    "hevc".to_string()
}

fn default_skip_hdr() -> bool {
    true
}

impl Default for DeciderConfig {
    fn default() -> Self {
        Self {
            target_video_codec: default_target_video_codec(),
            create_stereo_audio: false,
            skip_hdr: default_skip_hdr(),
        }
    }
}

/// A library to add to an empty store on startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryConfig {
    /// Root folder scanned for video files
    pub folder: PathBuf,
    /// Higher priority libraries hand out jobs first
    #[serde(default)]
    pub priority: i32,
    /// Minimum seconds between two scans (default 900)
    #[serde(default = "default_fs_check_interval_secs")]
    pub fs_check_interval_secs: u64,
    /// Substrings excluding matching paths
    #[serde(default)]
    pub path_masks: Vec<String>,
    #[serde(default)]
    pub decider: DeciderConfig,
}

fn default_fs_check_interval_secs() -> u64 {
    900
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub libraries: Vec<LibraryConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
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
    /// - SCHEDULER_TICK_INTERVAL_MS -> scheduler.tick_interval_ms
    /// - SCHEDULER_MAX_CONCURRENT_SCANS -> scheduler.max_concurrent_scans
    /// - SCHEDULER_METADATA_ERROR_POLICY -> scheduler.metadata_error_policy
    /// - STORE_STATE_FILE -> store.state_file
    /// - SERVER_ENABLED -> server.enabled
    /// - SERVER_BIND -> server.bind
    /// - LOG_FILTER -> logging.filter
    ///
    /// Values that fail to parse leave the existing setting in place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SCHEDULER_TICK_INTERVAL_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.scheduler.tick_interval_ms = ms;
            }
        }

        if let Ok(val) = env::var("SCHEDULER_MAX_CONCURRENT_SCANS") {
            if let Ok(scans) = val.parse::<u32>() {
                self.scheduler.max_concurrent_scans = scans;
            }
        }

        if let Ok(val) = env::var("SCHEDULER_METADATA_ERROR_POLICY") {
            if let Ok(policy) = val.parse::<MetadataErrorPolicy>() {
                self.scheduler.metadata_error_policy = policy;
            }
        }

        if let Ok(val) = env::var("STORE_STATE_FILE") {
            if !val.trim().is_empty() {
                self.store.state_file = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("SERVER_ENABLED") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.server.enabled = true,
                "false" | "0" | "no" => self.server.enabled = false,
                _ => {}
            }
        }

        if let Ok(val) = env::var("SERVER_BIND") {
            if !val.trim().is_empty() {
                self.server.bind = val;
            }
        }

        if let Ok(val) = env::var("LOG_FILTER") {
            if !val.trim().is_empty() {
                self.logging.filter = val;
            }
        }
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.tick_interval_ms must be greater than zero".to_string(),
            ));
        }

        for (index, lib) in self.libraries.iter().enumerate() {
            if lib.folder.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "libraries[{}].folder must not be empty",
                    index
                )));
            }
            if lib.fs_check_interval_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "libraries[{}].fs_check_interval_secs must be greater than zero",
                    index
                )));
            }
        }

        Ok(())
    }

    /// Load configuration from file, apply environment overrides, and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
