//! Error handling for the acquisition service
//!
//! One error enum for the whole service. Field-device failures carry one of the
//! four transport-level tags in [`FaultKind`]; callers switch on the tag instead
//! of inspecting messages.

use serde::Serialize;
use thiserror::Error;

/// Classification of a failed device transaction, produced at the transport boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Transport unreachable (refused, reset, broken pipe)
    Connection,
    /// Connect or register transaction exceeded its bound
    Timeout,
    /// Malformed response, exception reply, unknown device id, bad address
    Protocol,
    /// Raw payload shape does not fit the declared encoding
    Decode,
}

impl FaultKind {
    /// Whether the transport session must be discarded after this fault
    pub fn poisons_session(self) -> bool {
        matches!(self, FaultKind::Connection | FaultKind::Timeout)
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FaultKind::Connection => "connection",
            FaultKind::Timeout => "timeout",
            FaultKind::Protocol => "protocol",
            FaultKind::Decode => "decode",
        };
        f.write_str(name)
    }
}

/// Acquisition Service Error Type
#[derive(Error, Debug, Clone)]
pub enum AcqError {
    /// Transport unreachable
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Connect or transaction timeout
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Protocol-level failure reported by or about the device
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Raw words do not fit the declared encoding
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Persistence errors
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Unknown device id
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Unknown function on a known device
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// Invalid request value
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Device lock could not be acquired within its bound
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the acquisition service
pub type Result<T> = std::result::Result<T, AcqError>;

impl AcqError {
    pub fn connection(msg: impl Into<String>) -> Self {
        AcqError::ConnectionError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        AcqError::TimeoutError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        AcqError::ProtocolError(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        AcqError::DecodeError(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        AcqError::ConfigError(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        AcqError::StorageError(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AcqError::ValidationError(msg.into())
    }

    pub fn device_not_found(id: impl std::fmt::Display) -> Self {
        AcqError::DeviceNotFound(id.to_string())
    }

    pub fn function_not_found(device: impl std::fmt::Display, function: &str) -> Self {
        AcqError::FunctionNotFound(format!("{} on {}", function, device))
    }

    /// Transport-level tag, if this is a device transaction failure
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            AcqError::ConnectionError(_) => Some(FaultKind::Connection),
            AcqError::TimeoutError(_) => Some(FaultKind::Timeout),
            AcqError::ProtocolError(_) => Some(FaultKind::Protocol),
            AcqError::DecodeError(_) => Some(FaultKind::Decode),
            _ => None,
        }
    }

    /// Stable HTTP status for the on-demand layer
    pub fn status_code(&self) -> u16 {
        match self {
            AcqError::ValidationError(_) => 400,
            AcqError::DeviceNotFound(_) | AcqError::FunctionNotFound(_) => 404,
            AcqError::ConnectionError(_)
            | AcqError::ProtocolError(_)
            | AcqError::DecodeError(_) => 502,
            AcqError::DeviceBusy(_) => 503,
            AcqError::TimeoutError(_) => 504,
            AcqError::ConfigError(_) | AcqError::StorageError(_) | AcqError::InternalError(_) => {
                500
            },
        }
    }

    /// Message safe to show to API clients (no transport internals)
    pub fn public_message(&self) -> String {
        match self {
            AcqError::ConnectionError(_) => "No connection to the device".to_string(),
            AcqError::TimeoutError(_) => "No response from the device".to_string(),
            AcqError::ProtocolError(_) => "Device rejected or garbled the request".to_string(),
            AcqError::DecodeError(_) => "Device returned data of an unexpected shape".to_string(),
            AcqError::DeviceBusy(_) => "Device is busy, try again later".to_string(),
            AcqError::DeviceNotFound(id) => format!("No device {}", id),
            AcqError::FunctionNotFound(what) => format!("No function {}", what),
            AcqError::ValidationError(msg) => msg.clone(),
            AcqError::ConfigError(_) | AcqError::StorageError(_) | AcqError::InternalError(_) => {
                "Internal service error".to_string()
            },
        }
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<std::io::Error> for AcqError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => AcqError::TimeoutError(err.to_string()),
            ErrorKind::InvalidData | ErrorKind::InvalidInput | ErrorKind::UnexpectedEof => {
                AcqError::ProtocolError(err.to_string())
            },
            _ => AcqError::ConnectionError(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for AcqError {
    fn from(err: sqlx::Error) -> Self {
        AcqError::StorageError(err.to_string())
    }
}

impl From<figment::Error> for AcqError {
    fn from(err: figment::Error) -> Self {
        AcqError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for AcqError {
    fn from(err: serde_json::Error) -> Self {
        AcqError::InternalError(format!("JSON: {err}"))
    }
}

impl From<AcqError> for common::AppError {
    fn from(err: AcqError) -> Self {
        let app_error = common::AppError::from_code(err.status_code(), err.public_message());
        match err.fault_kind() {
            Some(kind) => app_error.with_fault(kind.to_string()),
            None => app_error,
        }
    }
}
