//! Register map
//!
//! Static catalogue of units, devices, readable parameters and writable
//! controls, built once from configuration and read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::{AppConfig, DeviceConfig};
use crate::core::decoder::Encoding;
use crate::error::{AcqError, Result};

/// Register bank a parameter is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterType {
    #[default]
    Holding,
    Input,
}

/// Network location of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub slave_id: u8,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}#{}", self.host, self.port, self.slave_id)
    }
}

/// Readable value on a device
#[derive(Debug, Clone, Serialize)]
pub struct Parameter {
    pub name: String,
    pub address: u16,
    pub count: u16,
    pub register_type: RegisterType,
    pub encoding: Encoding,
    pub function: Option<String>,
    pub poll: bool,
}

/// Writable register on a device
#[derive(Debug, Clone, Serialize)]
pub struct Control {
    pub function: String,
    pub register: u16,
    pub default_value: Option<u16>,
}

/// Field device with its parameters and controls
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub id: String,
    pub unit: String,
    pub endpoint: Endpoint,
    pub parameters: Vec<Parameter>,
    pub controls: Vec<Control>,
}

impl Device {
    /// Parameters included in the periodic cycle, in declaration order
    pub fn polled_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.poll)
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Parameter exposed for on-demand reads under `function`, or named so
    pub fn read_function(&self, function: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|p| p.function.as_deref() == Some(function))
            .or_else(|| self.parameter(function))
    }

    /// Control exposed for on-demand writes under `function`
    pub fn control(&self, function: &str) -> Option<&Control> {
        self.controls.iter().find(|c| c.function == function)
    }
}

/// Immutable catalogue of all configured devices
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    devices: Vec<Device>,
    index: HashMap<String, usize>,
    units: BTreeMap<String, Vec<String>>,
}

impl RegisterMap {
    /// Build and validate the map from configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut map = RegisterMap::default();
        let mut parameter_names: HashSet<String> = HashSet::new();

        for (unit_id, unit) in &config.units {
            let members = map.units.entry(unit_id.clone()).or_default();

            for (device_id, device_config) in &unit.devices {
                if map.index.contains_key(device_id) {
                    return Err(AcqError::config(format!(
                        "device {} is declared more than once",
                        device_id
                    )));
                }

                let device = build_device(unit_id, device_id, device_config)?;
                for parameter in &device.parameters {
                    // Persisted rows are keyed by parameter name
                    if !parameter_names.insert(parameter.name.clone()) {
                        return Err(AcqError::config(format!(
                            "parameter name {} is used more than once",
                            parameter.name
                        )));
                    }
                }

                members.push(device_id.clone());
                map.index.insert(device_id.clone(), map.devices.len());
                map.devices.push(device);
            }
        }

        Ok(map)
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.index.get(id).map(|&i| &self.devices[i])
    }

    /// Like [`RegisterMap::device`] but with a not-found error
    pub fn require_device(&self, id: &str) -> Result<&Device> {
        self.device(id).ok_or_else(|| AcqError::device_not_found(id))
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|d| d.id.as_str())
    }

    /// Unit id to member device ids
    pub fn units(&self) -> &BTreeMap<String, Vec<String>> {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn build_device(unit_id: &str, device_id: &str, config: &DeviceConfig) -> Result<Device> {
    if config.host.trim().is_empty() {
        return Err(AcqError::config(format!("device {}: empty host", device_id)));
    }
    if config.port == 0 {
        return Err(AcqError::config(format!("device {}: port 0", device_id)));
    }
    if config.slave_id > 247 {
        return Err(AcqError::config(format!(
            "device {}: slave id {} out of range 0-247",
            device_id, config.slave_id
        )));
    }

    let mut seen = HashSet::new();
    let mut parameters = Vec::with_capacity(config.parameters.len());
    for p in &config.parameters {
        if !seen.insert(p.name.as_str()) {
            return Err(AcqError::config(format!(
                "device {}: duplicate parameter {}",
                device_id, p.name
            )));
        }

        let count = p.count.unwrap_or_else(|| p.encoding.default_width());
        if !p.encoding.accepts_width(count) {
            return Err(AcqError::config(format!(
                "device {}: parameter {} uses {} register(s), {} needs {}",
                device_id,
                p.name,
                count,
                p.encoding.name(),
                p.encoding.default_width()
            )));
        }
        if let Encoding::ScaledInt { divisor, .. } = p.encoding {
            if divisor == 0.0 || !divisor.is_finite() {
                return Err(AcqError::config(format!(
                    "device {}: parameter {} has divisor {}",
                    device_id, p.name, divisor
                )));
            }
        }

        parameters.push(Parameter {
            name: p.name.clone(),
            address: p.address,
            count,
            register_type: p.register_type,
            encoding: p.encoding,
            function: p.function.clone(),
            poll: p.poll,
        });
    }

    let mut functions = HashSet::new();
    for function in parameters.iter().filter_map(|p| p.function.as_deref()) {
        if !functions.insert(function) {
            return Err(AcqError::config(format!(
                "device {}: read function {} is declared twice",
                device_id, function
            )));
        }
    }

    let mut controls = Vec::with_capacity(config.controls.len());
    for c in &config.controls {
        if controls.iter().any(|existing: &Control| existing.function == c.function) {
            return Err(AcqError::config(format!(
                "device {}: control {} is declared twice",
                device_id, c.function
            )));
        }
        controls.push(Control {
            function: c.function.clone(),
            register: c.register,
            default_value: c.default_value,
        });
    }

    Ok(Device {
        id: device_id.to_string(),
        unit: unit_id.to_string(),
        endpoint: Endpoint {
            host: config.host.clone(),
            port: config.port,
            slave_id: config.slave_id,
        },
        parameters,
        controls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    const PLANT: &str = r#"
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
            function: get_pressure
        controls:
          - function: release
            register: 8
            default_value: 1
      trm202:
        host: 10.2.147.7
        slave_id: 2
        parameters:
          - name: T
            address: 4105
            encoding: { type: scaled_int, divisor: 10 }
            function: get_temp
  "2":
    devices:
      sensor:
        host: 10.2.147.8
        port: 1502
        slave_id: 1
        parameters:
          - name: U
            address: 0
            register_type: input
            encoding: { type: raw }
            poll: false
"#;

    #[test]
    fn builds_units_and_lookups() {
        let map = RegisterMap::from_config(&config::from_yaml_str(PLANT).unwrap()).unwrap();

        assert_eq!(map.len(), 3);
        assert_eq!(map.units()["1"], vec!["pressure_sensor", "trm202"]);
        assert_eq!(map.units()["2"], vec!["sensor"]);

        let ps = map.device("pressure_sensor").unwrap();
        assert_eq!(ps.unit, "1");
        assert_eq!(ps.endpoint.slave_id, 16);
        assert_eq!(ps.parameter("DP").unwrap().count, 2);
        assert_eq!(ps.read_function("get_pressure").unwrap().name, "DP");
        assert_eq!(ps.read_function("DP").unwrap().address, 4105);
        assert!(ps.read_function("release").is_none());
        assert_eq!(ps.control("release").unwrap().register, 8);
        assert!(ps.control("open").is_none());

        let sensor = map.device("sensor").unwrap();
        assert_eq!(sensor.polled_parameters().count(), 0);
        assert_eq!(sensor.parameters[0].register_type, RegisterType::Input);

        assert!(matches!(
            map.require_device("trm999"),
            Err(AcqError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn rejects_duplicate_device_across_units() {
        let yaml = r#"
units:
  a:
    devices:
      d1: { host: h, slave_id: 1 }
  b:
    devices:
      d1: { host: h, slave_id: 2 }
"#;
        let err = RegisterMap::from_config(&config::from_yaml_str(yaml).unwrap()).unwrap_err();
        assert!(err.to_string().contains("d1"));
    }

    #[test]
    fn rejects_width_that_does_not_fit_encoding() {
        let yaml = r#"
units:
  a:
    devices:
      d1:
        host: h
        slave_id: 1
        parameters:
          - { name: X, address: 0, count: 1, encoding: { type: float32 } }
"#;
        assert!(RegisterMap::from_config(&config::from_yaml_str(yaml).unwrap()).is_err());
    }

    #[test]
    fn rejects_shared_parameter_names() {
        let yaml = r#"
units:
  a:
    devices:
      d1:
        host: h
        slave_id: 1
        parameters:
          - { name: T, address: 0, encoding: { type: raw } }
      d2:
        host: h
        slave_id: 2
        parameters:
          - { name: T, address: 0, encoding: { type: raw } }
"#;
        assert!(RegisterMap::from_config(&config::from_yaml_str(yaml).unwrap()).is_err());
    }

    #[test]
    fn rejects_zero_divisor_and_bad_slave() {
        let zero = r#"
units:
  a:
    devices:
      d1:
        host: h
        slave_id: 1
        parameters:
          - { name: T, address: 0, encoding: { type: scaled_int, divisor: 0 } }
"#;
        assert!(RegisterMap::from_config(&config::from_yaml_str(zero).unwrap()).is_err());

        let slave = r#"
units:
  a:
    devices:
      d1: { host: h, slave_id: 250 }
"#;
        assert!(RegisterMap::from_config(&config::from_yaml_str(slave).unwrap()).is_err());
    }
}
