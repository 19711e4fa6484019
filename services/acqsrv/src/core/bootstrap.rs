//! Service bootstrap
//!
//! Command-line arguments, logging setup and configuration validation.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use crate::config::{self, AppConfig};
use crate::core::interlock::SafetyInterlock;
use crate::core::poller::PollSettings;
use crate::core::register_map::RegisterMap;
use crate::error::{AcqError, Result};

/// Command-line arguments for acqsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "acqsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Field Device Acquisition Service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML, JSON or TOML)
    #[arg(short = 'c', long, env = "ACQSRV_CONFIG", default_value = "config/acqsrv.yaml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Bind address for API server; overrides the config file
    #[arg(short = 'b', long)]
    pub bind_address: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

/// Load the configuration file and apply command-line overrides
pub fn load_configuration(args: &Args) -> Result<AppConfig> {
    let mut config = config::load(&args.config)?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(bind) = &args.bind_address {
        config.service.api.bind_address = bind.clone();
    }
    Ok(config)
}

/// Run every startup check without touching devices or storage
pub fn validate_configuration(config: &AppConfig) -> Result<RegisterMap> {
    let map = RegisterMap::from_config(config)?;
    PollSettings::from_config(&config.polling)?;
    if let Some(interlock) = &config.interlock {
        SafetyInterlock::validate(interlock, &map)?;
    }
    if config.service.api.enabled {
        config
            .service
            .api
            .bind_address
            .parse::<std::net::SocketAddr>()
            .map_err(|e| {
                AcqError::config(format!(
                    "bind address {}: {}",
                    config.service.api.bind_address, e
                ))
            })?;
    }

    info!(
        "Configuration valid: {} unit(s), {} device(s)",
        map.units().len(),
        map.len()
    );
    Ok(map)
}

/// Initialize console and rolling file logging from configuration
///
/// Log directory priority:
/// 1. ACQ_LOG_DIR environment variable
/// 2. logging.dir from the config file
pub fn initialize_logging(config: &AppConfig, no_color: bool) -> Result<common::logging::LogConfig> {
    let log_config = common::logging::LogConfig {
        service_name: config.service.name.clone(),
        log_dir: common::logging::resolve_log_dir(&config.logging.dir),
        level: common::logging::parse_level(&config.logging.level),
        retention_days: config.logging.retention_days,
        ansi: !no_color,
    };

    common::logging::init_with_config(&log_config)
        .map_err(|e| AcqError::config(format!("Failed to initialize logging: {}", e)))?;
    Ok(log_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_overrides() {
        let args = Args::parse_from([
            "acqsrv",
            "--config",
            "plant.yaml",
            "-l",
            "debug",
            "--bind-address",
            "0.0.0.0:6010",
            "--validate",
        ]);
        assert_eq!(args.config, PathBuf::from("plant.yaml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.bind_address.as_deref(), Some("0.0.0.0:6010"));
        assert!(args.validate);
        assert!(!args.no_color);
    }

    #[test]
    fn validation_catches_bad_bind_address() {
        let mut config = config::from_yaml_str("units: {}").unwrap();
        assert!(validate_configuration(&config).is_ok());

        config.service.api.bind_address = "not-an-address".to_string();
        assert!(validate_configuration(&config).is_err());
    }
}
