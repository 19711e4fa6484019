//! Configuration document types
//!
//! Every section has serde defaults so a minimal file only needs the device
//! tree. Durations are stored as plain numbers and turned into `Duration`
//! through the accessor methods.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::decoder::Encoding;
use crate::core::register_map::RegisterType;
use crate::error::{AcqError, Result};

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    /// Units keyed by unit id, each owning a set of devices
    #[serde(default)]
    pub units: BTreeMap<String, UnitConfig>,

    /// Optional threshold-triggered protection sequence
    #[serde(default)]
    pub interlock: Option<InterlockConfig>,
}

/// Service identity and HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    #[serde(default)]
    pub api: ApiConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            api: ApiConfig::default(),
        }
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
        }
    }
}

/// SQLite location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_dir")]
    pub dir: String,

    /// Days a log file is kept before the daily sweep removes it
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
            retention_days: default_retention_days(),
        }
    }
}

/// What to do when a device attempt fails within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicyKind {
    #[default]
    FailFast,
    BoundedRetry,
}

/// Polling cadence, timeouts and fault policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default)]
    pub interval_minutes: u64,

    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Upper bound on waiting for another holder of a device lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default)]
    pub fault_policy: FaultPolicyKind,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,

    /// Poll devices of a cycle concurrently instead of one after another
    #[serde(default = "default_true")]
    pub concurrent_devices: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 0,
            interval_seconds: default_interval_seconds(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            fault_policy: FaultPolicyKind::default(),
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay_seconds(),
            concurrent_devices: true,
        }
    }
}

impl PollingConfig {
    /// Cycle period, `interval_minutes * 60 + interval_seconds`
    pub fn interval(&self) -> Result<Duration> {
        self.interval_minutes
            .checked_mul(60)
            .and_then(|secs| secs.checked_add(self.interval_seconds))
            .map(Duration::from_secs)
            .ok_or_else(|| {
                AcqError::config(format!(
                    "polling interval of {} min {} s is out of range",
                    self.interval_minutes, self.interval_seconds
                ))
            })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

/// A unit groups devices for availability reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitConfig {
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,
}

/// One field device reachable over the register transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub slave_id: u8,

    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,

    #[serde(default)]
    pub controls: Vec<ControlConfig>,
}

/// A named readable value on a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterConfig {
    pub name: String,

    pub address: u16,

    #[serde(default)]
    pub register_type: RegisterType,

    pub encoding: Encoding,

    /// Register count; defaults to the encoding's natural width
    #[serde(default)]
    pub count: Option<u16>,

    /// Function name exposed for on-demand reads
    #[serde(default)]
    pub function: Option<String>,

    /// Include in the periodic cycle
    #[serde(default = "default_true")]
    pub poll: bool,
}

/// A named writable register on a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub function: String,

    pub register: u16,

    /// Written when a request carries no value
    #[serde(default)]
    pub default_value: Option<u16>,
}

/// Threshold-triggered protective write sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterlockConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub monitored_device: String,

    pub monitored_parameter: String,

    /// Fires when the decoded value is strictly greater than this
    pub threshold: f64,

    pub actuator_device: String,

    pub override_register: u16,

    pub command_register: u16,

    pub safe_value: u16,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default = "default_override_enabled_value")]
    pub override_enabled_value: u16,

    #[serde(default)]
    pub override_cleared_value: u16,
}

impl InterlockConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_service_name() -> String {
    "acqsrv".to_string()
}

fn default_bind_address() -> String {
    format!("{}:6010", common::DEFAULT_API_HOST)
}

fn default_database_path() -> String {
    "data/params.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_retention_days() -> u32 {
    7
}

fn default_interval_seconds() -> u64 {
    30
}

fn default_connect_timeout_ms() -> u64 {
    500
}

fn default_read_timeout_ms() -> u64 {
    300
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    1
}

fn default_port() -> u16 {
    502
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_override_enabled_value() -> u16 {
    1
}
