//! Shared basic library for the acquisition services
//!
//! Provides functions shared by all services, including:
//! - logging bootstrap and log retention
//! - shutdown signal handling
//! - HTTP API response envelopes

pub mod api_types;
pub mod logging;
pub mod shutdown;

// Re-export commonly used API types
pub use api_types::{ErrorInfo, ErrorResponse, HealthStatus, SuccessResponse};

// Re-export AppError when axum feature is enabled
#[cfg(feature = "axum")]
pub use api_types::AppError;

/// Default bind host for service APIs
pub const DEFAULT_API_HOST: &str = "127.0.0.1";
