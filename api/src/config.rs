//! Configuration module for the gateway
//!
//! Loaded from a TOML file, then overlaid with `VCENTER_*` environment variables.

use serde::Deserialize;
use std::path::Path;

use vcenter::VcenterConfig;

/// Gateway configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// vCenter endpoint and credentials
    #[serde(default)]
    pub vcenter: VcenterConfig,
}

/// Server-specific configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Host address to bind to (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on (default: 5000)
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level filter (default: "gateway=info,vcenter=info,tower_http=info")
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_log_level() -> String {
    "gateway=info,vcenter=info,tower_http=info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
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
    /// Load configuration from a TOML file
    ///
    /// If the file doesn't exist, returns default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.display().to_string(), e.to_string()))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.display().to_string(), e.to_string()))
    }

    /// Overlay `VCENTER_HOST`, `VCENTER_USER`, `VCENTER_PASSWORD` and `VERIFY_SSL`.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from `lookup`; unset keys keep the file value.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("VCENTER_HOST") {
            self.vcenter.host = host;
        }
        if let Some(user) = lookup("VCENTER_USER") {
            self.vcenter.user = user;
        }
        if let Some(password) = lookup("VCENTER_PASSWORD") {
            self.vcenter.password = password;
        }
        if let Some(verify) = lookup("VERIFY_SSL") {
            self.vcenter.verify_ssl = parse_flag(&verify);
        }
    }

    /// Fail fast when the vCenter section cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.vcenter
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// `true` and `1` (any case) enable a flag; anything else disables it.
pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    ReadError(String, String),
    ParseError(String, String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, err) => {
                write!(f, "Failed to read config file '{}': {}", path, err)
            }
            ConfigError::ParseError(path, err) => {
                write!(f, "Failed to parse config file '{}': {}", path, err)
            }
            ConfigError::Invalid(err) => write!(f, "Invalid configuration: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}
