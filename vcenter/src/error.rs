//! Error types for vCenter operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VcError {
    #[error("Failed to connect to vCenter: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Inventory query failed: {0}")]
    QueryFailed(String),

    #[error("VM not found: {0}")]
    VmNotFound(String),

    #[error("Guest tools not running or not installed on VM: {0}")]
    ToolsNotReady(String),

    #[error("Power action failed: {0}")]
    ActionFailed(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Timeout waiting for task: {0}")]
    Timeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid operation '{0}'. Supported operations: start, shutdown, restart, poweroff")]
    InvalidOperation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON serialization error: {0}")]
    JsonError(String),
}

/// Outcome class seen at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    OperationFailed,
}

impl VcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VcError::VmNotFound(_) => ErrorKind::NotFound,
            VcError::InvalidOperation(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::OperationFailed,
        }
    }
}

pub type Result<T> = std::result::Result<T, VcError>;

impl From<serde_json::Error> for VcError {
    fn from(e: serde_json::Error) -> Self {
        VcError::JsonError(e.to_string())
    }
}

impl From<reqwest::Error> for VcError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            VcError::Timeout(format!("HTTP request timed out: {e}"))
        } else if e.is_decode() {
            VcError::JsonError(e.to_string())
        } else {
            VcError::ConnectionFailed(e.to_string())
        }
    }
}
