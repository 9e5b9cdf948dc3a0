//! API error type and status mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use vcenter::{ErrorKind, VcError};

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Map a client error. Operation failures are logged in full and reported
    /// to the caller as `fallback`.
    pub fn from_client(err: VcError, fallback: &str) -> Self {
        match err.kind() {
            ErrorKind::NotFound => {
                let message = match &err {
                    VcError::VmNotFound(name) => format!("VM '{}' not found", name),
                    other => other.to_string(),
                };
                Self::new(StatusCode::NOT_FOUND, message)
            }
            ErrorKind::InvalidInput => Self::bad_request(err.to_string()),
            ErrorKind::OperationFailed => {
                tracing::error!(error = %err, "{}", fallback);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, fallback)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_mapping() {
        let err = ApiError::from_client(VcError::VmNotFound("web-01".into()), "unused");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "VM 'web-01' not found");
    }

    #[test]
    fn test_invalid_operation_mapping() {
        let err = ApiError::from_client(VcError::InvalidOperation("bogus".into()), "unused");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            err.message,
            "Invalid operation 'bogus'. Supported operations: start, shutdown, restart, poweroff"
        );
    }

    #[test]
    fn test_operation_failure_hides_detail() {
        let err = ApiError::from_client(
            VcError::ConnectionFailed("tls handshake eof".into()),
            "Failed to retrieve virtual machines",
        );
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Failed to retrieve virtual machines");
    }
}
