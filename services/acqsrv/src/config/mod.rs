//! Configuration loading
//!
//! A single YAML, JSON or TOML file merged with `ACQSRV_` environment
//! variables. Nested keys use a double underscore:
//! `ACQSRV_POLLING__INTERVAL_SECONDS=10`.

pub mod types;

pub use types::*;

use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use std::path::Path;
use tracing::debug;

use crate::error::{AcqError, Result};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "ACQSRV_";

/// Load configuration from `path`, then apply environment overrides
pub fn load(path: &Path) -> Result<AppConfig> {
    if !path.is_file() {
        return Err(AcqError::config(format!(
            "config file {} not found",
            path.display()
        )));
    }

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| AcqError::config("Invalid file extension"))?;

    let figment = match extension {
        "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
        "json" => Figment::new().merge(Json::file(path)),
        "toml" => Figment::new().merge(Toml::file(path)),
        _ => {
            return Err(AcqError::config(format!(
                "Unsupported config format: {}",
                extension
            )))
        },
    };

    debug!("Loading configuration from {}", path.display());
    extract(figment)
}

/// Parse a YAML document with environment overrides applied
pub fn from_yaml_str(content: &str) -> Result<AppConfig> {
    extract(Figment::new().merge(Yaml::string(content)))
}

fn extract(figment: Figment) -> Result<AppConfig> {
    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| AcqError::config(format!("Failed to parse config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decoder::{Encoding, WordOrder};
    use crate::core::register_map::RegisterType;

    const MINIMAL: &str = r#"
units:
  "1":
    devices:
      pressure_sensor:
        host: 10.2.147.7
        slave_id: 16
        parameters:
          - name: DP
            address: 4105
            encoding: { type: float32 }
"#;

    #[test]
    fn minimal_document_gets_defaults() {
        let config = from_yaml_str(MINIMAL).unwrap();

        assert_eq!(config.service.name, "acqsrv");
        assert!(config.service.api.enabled);
        assert_eq!(config.polling.interval().unwrap().as_secs(), 30);
        assert_eq!(config.polling.fault_policy, FaultPolicyKind::FailFast);
        assert!(config.interlock.is_none());

        let device = &config.units["1"].devices["pressure_sensor"];
        assert_eq!(device.port, 502);
        let param = &device.parameters[0];
        assert_eq!(param.register_type, RegisterType::Holding);
        assert_eq!(
            param.encoding,
            Encoding::Float32 {
                word_order: WordOrder::HighFirst
            }
        );
        assert!(param.poll);
        assert!(param.count.is_none());
    }

    #[test]
    fn interval_combines_minutes_and_seconds() {
        let polling = PollingConfig {
            interval_minutes: 2,
            interval_seconds: 5,
            ..PollingConfig::default()
        };
        assert_eq!(polling.interval().unwrap().as_secs(), 125);
    }

    #[test]
    fn load_rejects_missing_and_unknown_files() {
        let err = load(Path::new("/nonexistent/acqsrv.yaml")).unwrap_err();
        assert!(matches!(err, AcqError::ConfigError(_)));

        let dir = tempfile::tempdir().unwrap();
        let ini = dir.path().join("acqsrv.ini");
        std::fs::write(&ini, "x=1").unwrap();
        assert!(load(&ini).is_err());
    }

    #[test]
    fn load_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acqsrv.json");
        std::fs::write(
            &path,
            r#"{"polling": {"interval_minutes": 1, "interval_seconds": 0, "fault_policy": "bounded_retry"}}"#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.polling.interval().unwrap().as_secs(), 60);
        assert_eq!(config.polling.fault_policy, FaultPolicyKind::BoundedRetry);
        assert!(config.units.is_empty());
    }
}
