//! Connection settings for a vCenter endpoint.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::error::{Result, VcError};
use crate::task::TaskWaitConfig;

/// vCenter endpoint configuration. Built once at startup and shared read-only.
#[derive(Clone, Deserialize)]
pub struct VcenterConfig {
    /// Host name or address. A value with a scheme (`http://...`) is used as the base URL.
    #[serde(default)]
    pub host: String,

    /// HTTPS port (default: 443)
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Verify the server certificate (default: false)
    #[serde(default)]
    pub verify_ssl: bool,

    /// Per-request HTTP timeout (default: 30s)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Interval between power task polls (default: 500ms)
    #[serde(default = "default_task_poll_interval_ms")]
    pub task_poll_interval_ms: u64,

    /// Give up on a power task after this long (default: 300s)
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

fn default_port() -> u16 {
    443
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_task_poll_interval_ms() -> u64 {
    500
}

fn default_task_timeout_secs() -> u64 {
    300
}

impl Default for VcenterConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            user: String::new(),
            password: String::new(),
            verify_ssl: false,
            request_timeout_secs: default_request_timeout_secs(),
            task_poll_interval_ms: default_task_poll_interval_ms(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

impl fmt::Debug for VcenterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VcenterConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("verify_ssl", &self.verify_ssl)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("task_poll_interval_ms", &self.task_poll_interval_ms)
            .field("task_timeout_secs", &self.task_timeout_secs)
            .finish()
    }
}

impl VcenterConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Base URL for REST calls, without a trailing slash.
    pub fn base_url(&self) -> String {
        if self.host.contains("://") {
            self.host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}:{}", self.host, self.port)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn task_wait(&self) -> TaskWaitConfig {
        TaskWaitConfig::with_timeout(Duration::from_secs(self.task_timeout_secs))
            .with_poll_interval(Duration::from_millis(self.task_poll_interval_ms))
    }

    /// Check that the settings can open a session at all.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(VcError::InvalidConfig("vCenter host is not set".into()));
        }
        if self.user.trim().is_empty() {
            return Err(VcError::InvalidConfig("vCenter user is not set".into()));
        }
        if self.task_timeout_secs == 0 {
            return Err(VcError::InvalidConfig(
                "task_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
