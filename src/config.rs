use log::{debug, warn};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ExporterError, Result};
use crate::partition::PartitionLayout;

/// Prefix for environment overrides, e.g. `SLURM_EXPORTER__LISTEN_ADDRESS`
pub const ENV_PREFIX: &str = "SLURM_EXPORTER";

/// Exporter configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExporterConfig {
    /// Address the HTTP endpoint binds to
    pub listen_address: String,
    /// Path the metrics are served on
    pub metrics_path: String,
    /// Logging level
    pub log_level: LogLevel,
    /// Upper bound on a single sinfo/squeue invocation, in seconds
    pub command_timeout_secs: u64,
    /// Column layout requested from sinfo
    pub layout: PartitionLayout,
    /// Partition-state command
    pub sinfo: CommandConfig,
    /// Job-queue command
    pub squeue: CommandConfig,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            metrics_path: "/metrics".to_string(),
            log_level: LogLevel::default(),
            command_timeout_secs: 10,
            layout: PartitionLayout::default(),
            sinfo: CommandConfig::program("sinfo"),
            squeue: CommandConfig::program("squeue"),
        }
    }
}

impl ExporterConfig {
    /// Timeout applied to each external command
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Parse the listen address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_address.parse().map_err(|e| {
            ExporterError::Config(format!(
                "Invalid listen address {}: {}",
                self.listen_address, e
            ))
        })
    }

    /// Check values that deserialization alone cannot
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if !self.metrics_path.starts_with('/') {
            return Err(ExporterError::Config(format!(
                "Metrics path must start with '/': {}",
                self.metrics_path
            )));
        }

        if self.command_timeout_secs == 0 {
            return Err(ExporterError::Config(
                "command_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// An external command and an optional replacement for its default arguments
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CommandConfig {
    /// Program to execute, looked up on `PATH` unless absolute
    pub program: String,
    /// Replaces the built-in arguments when set
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

impl CommandConfig {
    fn program(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: None,
        }
    }
}

/// Logging level
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

/// Source of configuration
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path (TOML format)
    File(PathBuf),
    /// Environment variables with a prefix
    Environment(String),
    /// TOML string
    Toml(String),
}

/// Load configuration from the given sources, later sources overriding earlier ones
pub fn load_config(sources: Vec<ConfigSource>) -> Result<ExporterConfig> {
    let mut builder = config::Config::builder();

    for source in sources {
        match source {
            ConfigSource::File(path) => {
                if !path.exists() {
                    return Err(ExporterError::Config(format!(
                        "Configuration file not found: {}",
                        path.display()
                    )));
                }

                debug!("Loading TOML configuration from file: {}", path.display());
                builder = builder.add_source(
                    config::File::from(path.as_path()).format(config::FileFormat::Toml),
                );
            }
            ConfigSource::Environment(prefix) => {
                debug!("Loading configuration from environment with prefix: {}", prefix);
                builder = builder.add_source(
                    config::Environment::with_prefix(&prefix)
                        .separator("__")
                        .try_parsing(true),
                );
            }
            ConfigSource::Toml(toml_str) => {
                debug!("Loading configuration from TOML string");
                builder = builder
                    .add_source(config::File::from_str(&toml_str, config::FileFormat::Toml));
            }
        }
    }

    let config = builder
        .build()
        .map_err(|e| ExporterError::Config(format!("Failed to build configuration: {}", e)))?;

    let result: ExporterConfig = config
        .try_deserialize()
        .map_err(|e| ExporterError::Config(format!("Failed to deserialize configuration: {}", e)))?;

    result.validate()?;
    debug!("Configuration loaded successfully: {:?}", result);

    Ok(result)
}

/// Configuration builder
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    sources: Vec<ConfigSource>,
}

impl ConfigBuilder {
    /// Create a new config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a TOML file source
    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sources.push(ConfigSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// Add a TOML file source if one was given
    pub fn add_optional_file<P: AsRef<Path>>(self, path: Option<P>) -> Self {
        match path {
            Some(path) => self.add_file(path),
            None => {
                warn!("No configuration file given, using defaults");
                self
            }
        }
    }

    /// Add environment variables
    pub fn add_env(mut self, prefix: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Environment(prefix.into()));
        self
    }

    /// Add TOML string
    pub fn add_toml(mut self, toml: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Toml(toml.into()));
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ExporterConfig> {
        load_config(self.sources)
    }
}
