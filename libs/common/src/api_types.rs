//! Response envelopes shared by the service APIs
//!
//! Every endpoint answers `{"success": true, "data": ...}` or
//! `{"success": false, "error": {"code": ..., "message": ..., "fault": ...}}`.

use serde::{Deserialize, Serialize};

/// Envelope of a successful call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Envelope of a failed call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub success: bool,
    pub error: ErrorInfo,
}

/// Error body: HTTP status, client-safe message and an optional fault tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: u16,
    pub message: String,
    /// Device fault class (`connection`, `timeout`, ...) when a device failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

/// Liveness report for `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

/// Handler error rendered as an [`ErrorResponse`] with its status
#[cfg(feature = "axum")]
#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub error: ErrorInfo,
}

#[cfg(feature = "axum")]
impl AppError {
    /// Unknown codes become 500
    pub fn from_code(code: u16, message: impl Into<String>) -> Self {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            error: ErrorInfo {
                code: status.as_u16(),
                message: message.into(),
                fault: None,
            },
        }
    }

    pub fn with_fault(mut self, fault: impl Into<String>) -> Self {
        self.error.fault = Some(fault.into());
        self
    }
}

#[cfg(feature = "axum")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                success: false,
                error: self.error,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_serializes_envelope() {
        let body = serde_json::to_value(SuccessResponse::new(42)).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], 42);
    }

    #[cfg(feature = "axum")]
    #[test]
    fn app_error_maps_unknown_code_to_internal() {
        let err = AppError::from_code(42, "odd");
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error.code, 500);

        let err = AppError::from_code(504, "No response from the device").with_fault("timeout");
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.error.fault.as_deref(), Some("timeout"));
    }

    #[cfg(feature = "axum")]
    #[test]
    fn fault_tag_is_omitted_when_absent() {
        let body = serde_json::to_value(AppError::from_code(404, "No device trm999").error).unwrap();
        assert_eq!(body["code"], 404);
        assert!(body.get("fault").is_none());
    }
}
