//! Field Device Acquisition Service (`acqsrv`)
//!
//! Periodically polls register-based field devices, decodes their values,
//! persists the latest good reading per parameter and the availability of
//! each unit. A threshold interlock can drive an actuator into a safe state,
//! and an HTTP API exposes on-demand reads and writes that share the same
//! per-device locks as the poll cycle.

pub mod api;
pub mod config;
pub mod control;
pub mod core;
pub mod error;
pub mod runtime;
pub mod storage;

// Test utilities (for use in test code only)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{AcqError, FaultKind, Result};
pub use runtime::AcquisitionService;
