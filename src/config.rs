//! Configuration module for the scopecast server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::generator::SampleRange;
use crate::policy::PolicyKind;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the streaming server
#[derive(Parser, Debug, Default)]
#[command(name = "scopecast")]
#[command(author = "scopecast authors")]
#[command(version = "0.1.0")]
#[command(about = "Streams float32 sample frames to browser charts over WebSocket", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of concurrent sessions
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Flow-control policy: demand, interval or adaptive
    #[arg(short = 'p', long, value_enum)]
    pub policy: Option<PolicyKind>,

    /// Samples per requested group (channels per frame)
    #[arg(long)]
    pub group_width: Option<usize>,

    /// Initial group count (fixed frame size for the interval policy)
    #[arg(short = 'g', long = "groups")]
    pub default_groups: Option<usize>,

    /// Largest group count a client may request
    #[arg(long)]
    pub max_groups: Option<usize>,

    /// Push interval in milliseconds for the interval policy
    #[arg(short = 'i', long)]
    pub interval_ms: Option<u64>,

    /// Close sessions that send nothing for this many seconds
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Lower bound of generated samples
    #[arg(long, allow_negative_numbers = true)]
    pub min: Option<f32>,

    /// Upper bound (exclusive) of generated samples
    #[arg(long, allow_negative_numbers = true)]
    pub max: Option<f32>,

    /// Fixed seed for the sample generator
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of concurrent sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
        }
    }
}

/// Flow-control related configuration
#[derive(Debug, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub policy: PolicyKind,
    #[serde(default = "default_group_width")]
    pub group_width: usize,
    #[serde(default = "default_groups")]
    pub default_groups: usize,
    #[serde(default = "default_max_groups")]
    pub max_groups: usize,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            group_width: default_group_width(),
            default_groups: default_groups(),
            max_groups: default_max_groups(),
            interval_ms: default_interval_ms(),
            idle_timeout_secs: None,
        }
    }
}

/// Sample generator configuration
#[derive(Debug, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub min: f32,
    #[serde(default = "default_max_sample")]
    pub max: f32,
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: default_max_sample(),
            seed: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_group_width() -> usize {
    5
}

fn default_groups() -> usize {
    1000
}

fn default_max_groups() -> usize {
    100_000
}

fn default_interval_ms() -> u64 {
    33 // ~30 frames per second
}

fn default_max_sample() -> f32 {
    50.0
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Upper bound on samples in one frame (64 MiB on the wire).
pub const MAX_FRAME_SAMPLES: usize = 16 * 1024 * 1024;

/// Per-session parameters, cloned into every connection.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub policy: PolicyKind,
    pub group_width: usize,
    pub default_groups: usize,
    pub max_groups: usize,
    pub interval: Duration,
    pub idle_timeout: Option<Duration>,
    pub range: SampleRange,
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let stream = StreamConfig::default();
        let generator = GeneratorConfig::default();
        Self {
            policy: stream.policy,
            group_width: stream.group_width,
            default_groups: stream.default_groups,
            max_groups: stream.max_groups,
            interval: Duration::from_millis(stream.interval_ms),
            idle_timeout: None,
            range: SampleRange::new(generator.min, generator.max),
            seed: None,
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub max_connections: usize,
    pub session: SessionConfig,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let TomlConfig {
            server,
            stream,
            generator,
            logging,
        } = toml_config;

        let session = SessionConfig {
            policy: cli.policy.unwrap_or(stream.policy),
            group_width: cli.group_width.unwrap_or(stream.group_width),
            default_groups: cli.default_groups.unwrap_or(stream.default_groups),
            max_groups: cli.max_groups.unwrap_or(stream.max_groups),
            interval: Duration::from_millis(cli.interval_ms.unwrap_or(stream.interval_ms)),
            idle_timeout: cli
                .idle_timeout_secs
                .or(stream.idle_timeout_secs)
                .map(Duration::from_secs),
            range: SampleRange::new(
                cli.min.unwrap_or(generator.min),
                cli.max.unwrap_or(generator.max),
            ),
            seed: cli.seed.or(generator.seed),
        };

        let config = Config {
            listen: cli.listen.unwrap_or(server.listen),
            max_connections: cli.max_connections.unwrap_or(server.max_connections),
            session,
            log_level: cli.log_level.unwrap_or(logging.level),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let session = &self.session;
        if session.group_width == 0 {
            return Err(ConfigError::Invalid("group_width must be at least 1".into()));
        }
        match session.max_groups.checked_mul(session.group_width) {
            Some(samples) if samples <= MAX_FRAME_SAMPLES => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "max_groups ({}) x group_width ({}) exceeds {} samples per frame",
                    session.max_groups, session.group_width, MAX_FRAME_SAMPLES
                )));
            }
        }
        if session.interval.is_zero() {
            return Err(ConfigError::Invalid("interval_ms must be at least 1".into()));
        }
        if session.default_groups > session.max_groups {
            return Err(ConfigError::Invalid(format!(
                "default_groups ({}) exceeds max_groups ({})",
                session.default_groups, session.max_groups
            )));
        }
        if !session.range.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "sample range [{}, {}) is empty or not finite",
                session.range.min, session.range.max
            )));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1".into()));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
