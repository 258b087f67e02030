//! Configuration system for the CloudEvent bridge
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation that fails fast at startup, never at request time

use crate::events::CeIdentity;
use crate::filter::ReasonFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CE_BRIDGE_CONFIG";

const CONFIG_DIR_NAME: &str = "cloudevent-bridge";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// `|`-delimited list of event reasons to keep, or `*`
    pub filter: String,

    /// Process settings
    pub bridge: BridgeSettings,

    /// CloudEvent identity
    pub ce: CloudEventSpec,

    /// HTTP delivery settings
    pub export: ExportSettings,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            filter: crate::filter::FILTER_ALLOW_ALL.to_string(),
            bridge: BridgeSettings::default(),
            ce: CloudEventSpec::default(),
            export: ExportSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Validate the settings shared by every role
    pub fn validate(&self) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.bridge.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.bridge.log_level, valid_levels
            )));
        }

        self.ce.validate()?;
        ReasonFilter::parse(&self.filter)?;

        Ok(())
    }

    /// The reason filter described by `filter`
    pub fn reason_filter(&self) -> ConfigResult<ReasonFilter> {
        ReasonFilter::parse(&self.filter)
    }

    /// Identity stamped on every envelope
    pub fn identity(&self) -> CeIdentity {
        CeIdentity::new(
            self.ce.source.clone(),
            self.ce.spec_version.clone(),
            self.ce.append_type.clone(),
        )
    }
}

/// Process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// CloudEvent identity settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CloudEventSpec {
    /// Only the first character is used in the event type (`1.0` → `v1`)
    pub spec_version: String,

    /// Event type prefix; must not contain whitespace
    pub append_type: String,

    /// Opaque source identity
    pub source: String,
}

impl Default for CloudEventSpec {
    fn default() -> Self {
        Self {
            spec_version: "1.0".to_string(),
            append_type: String::new(),
            source: String::new(),
        }
    }
}

impl CloudEventSpec {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.spec_version.is_empty() {
            return Err(ConfigError::ValidationError(
                "spec_version field can not be empty".to_string(),
            ));
        }

        if self.append_type.is_empty() {
            return Err(ConfigError::ValidationError(
                "append_type field can not be empty".to_string(),
            ));
        }
        if self.append_type.chars().any(char::is_whitespace) {
            return Err(ConfigError::ValidationError(
                "append_type value can't have spaces".to_string(),
            ));
        }

        if self.source.is_empty() {
            return Err(ConfigError::ValidationError(
                "source field can not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// HTTP delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Sink URL
    pub endpoint: String,

    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,

    /// Capacity of the delivery queue
    pub queue_size: usize,

    /// Cap on concurrent delivery attempts (0 = unbounded)
    pub max_concurrent_deliveries: usize,

    /// How long shutdown waits for in-flight deliveries, in milliseconds
    pub shutdown_timeout_ms: u64,

    /// Accept gzip-compressed responses
    pub compression: bool,

    /// User-Agent header
    pub user_agent: String,

    /// Static headers added to every request
    pub headers: HashMap<String, String>,

    /// Throttling retry policy
    pub retry_on_failure: RetrySettings,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/events".to_string(),
            timeout_ms: 30_000,
            queue_size: crate::DEFAULT_QUEUE_SIZE,
            max_concurrent_deliveries: 0,
            shutdown_timeout_ms: 5_000,
            compression: false,
            user_agent: format!("cloudevent-bridge/{}", env!("CARGO_PKG_VERSION")),
            headers: HashMap::new(),
            retry_on_failure: RetrySettings::default(),
        }
    }
}

impl ExportSettings {
    /// Validate the settings only the exporter role needs
    pub fn validate(&self) -> ConfigResult<()> {
        let url = url::Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::ValidationError(format!(
                "endpoint must be a valid URL ({}): {}",
                self.endpoint, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "endpoint must use http or https, got: {}",
                url.scheme()
            )));
        }

        if self.queue_size == 0 {
            return Err(ConfigError::ValidationError(
                "queue_size must be greater than 0".to_string(),
            ));
        }

        self.retry_on_failure.validate()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Retry policy for throttled deliveries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySettings {
    /// Re-attempt throttled deliveries
    pub enabled: bool,

    /// First backoff in milliseconds; doubles per attempt
    pub initial_interval_ms: u64,

    /// Upper bound on any single wait, in milliseconds
    pub max_interval_ms: u64,

    /// Total attempts per envelope, including the first
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_interval_ms: 5_000,
            max_interval_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl RetrySettings {
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry_on_failure.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.initial_interval_ms > self.max_interval_ms {
            return Err(ConfigError::ValidationError(format!(
                "retry_on_failure.initial_interval_ms ({}) exceeds max_interval_ms ({})",
                self.initial_interval_ms, self.max_interval_ms
            )));
        }
        Ok(())
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. CE_BRIDGE_CONFIG environment variable
    /// 3. ~/.config/cloudevent-bridge/config.toml
    /// 4. /etc/cloudevent-bridge/config.toml
    /// 5. Default values
    ///
    /// Environment overrides are applied on top, then the result is
    /// validated.
    pub fn load(&self) -> ConfigResult<BridgeConfig> {
        let mut config = match self.find_config_file()? {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                BridgeConfig::default()
            }
        };

        Self::apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Find the config file to use.
    ///
    /// An explicit CLI path that does not exist is an error rather than a
    /// silent fall back to defaults.
    fn find_config_file(&self) -> ConfigResult<Option<PathBuf>> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
            return Err(ConfigError::NotFound(path.clone()));
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok(Some(path));
            }
            warn!("{} path does not exist: {}", CONFIG_ENV_VAR, env_path);
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Ok(Some(path));
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc")
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME);
            if path.exists() {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> ConfigResult<BridgeConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `CE_BRIDGE_*` environment variable overrides
    pub fn apply_env_overrides(config: &mut BridgeConfig) {
        Self::apply_overrides(config, |key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(config: &mut BridgeConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("CE_BRIDGE_LOG_LEVEL") {
            config.bridge.log_level = val;
        }
        if let Some(val) = lookup("CE_BRIDGE_FILTER") {
            config.filter = val;
        }

        if let Some(val) = lookup("CE_BRIDGE_SPEC_VERSION") {
            config.ce.spec_version = val;
        }
        if let Some(val) = lookup("CE_BRIDGE_APPEND_TYPE") {
            config.ce.append_type = val;
        }
        if let Some(val) = lookup("CE_BRIDGE_SOURCE") {
            config.ce.source = val;
        }

        if let Some(val) = lookup("CE_BRIDGE_ENDPOINT") {
            config.export.endpoint = val;
        }
        if let Some(val) = lookup("CE_BRIDGE_QUEUE_SIZE") {
            match val.parse() {
                Ok(size) => config.export.queue_size = size,
                Err(_) => warn!("Ignoring invalid CE_BRIDGE_QUEUE_SIZE: {}", val),
            }
        }
        if let Some(val) = lookup("CE_BRIDGE_RETRY_ENABLED") {
            config.export.retry_on_failure.enabled = val
                .parse()
                .unwrap_or(config.export.retry_on_failure.enabled);
        }
    }

    /// Save configuration to a file
    pub fn save(config: &BridgeConfig, path: &Path) -> ConfigResult<()> {
        let content = to_toml(config)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a configuration as TOML
pub fn to_toml(config: &BridgeConfig) -> ConfigResult<String> {
    toml::to_string_pretty(config)
        .map_err(|e| ConfigError::ValidationError(format!("Failed to serialize config: {}", e)))
}

/// Helper module for platform-specific directories
mod dirs {
    use std::path::PathBuf;

    /// Get the user's config directory
    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }

        #[cfg(not(target_os = "windows"))]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
