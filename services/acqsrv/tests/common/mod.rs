//! Shared fixtures for acqsrv integration tests
#![allow(dead_code)]

use std::sync::Arc;

use acqsrv::config::{self, AppConfig};
use acqsrv::storage::SqliteStore;
use acqsrv::test_utils::SimulatedBus;
use acqsrv::AcquisitionService;

pub const PRESSURE: u8 = 16;
pub const TRM202: u8 = 2;
pub const TRM200: u8 = 3;
pub const TRM210: u8 = 4;
pub const PUMP: u8 = 1;

/// Two polled units plus an actuator-only unit
pub const PLANT: &str = r#"
polling:
  interval_seconds: 1
  connect_timeout_ms: 100
  read_timeout_ms: 100
  lock_timeout_ms: 1000
units:
  "1":
    devices:
      pressure_sensor:
        host: sim
        slave_id: 16
        parameters:
          - { name: DP, address: 4105, encoding: { type: float32 }, function: get_pressure }
        controls:
          - { function: release, register: 8, default_value: 1 }
      trm202:
        host: sim
        slave_id: 2
        parameters:
          - { name: T, address: 4105, encoding: { type: scaled_int, divisor: 10 }, function: get_temp }
  "2":
    devices:
      trm200:
        host: sim
        slave_id: 3
        parameters:
          - { name: T1, address: 4105, encoding: { type: float32 } }
          - { name: T2, address: 4107, encoding: { type: float32 } }
      trm210:
        host: sim
        slave_id: 4
        parameters:
          - { name: DPy, address: 4105, encoding: { type: float32 } }
          - { name: Tn, address: 4107, encoding: { type: float32 } }
  "3":
    devices:
      pump:
        host: sim
        slave_id: 1
        controls:
          - { function: set_pump, register: 7 }
          - { function: open_valve, register: 2, default_value: 1000 }
"#;

/// Bus with every plant device answering sensible values
pub fn plant_bus() -> SimulatedBus {
    let bus = SimulatedBus::new();
    bus.set_float32(PRESSURE, 4105, 1500.0);
    bus.set_holding(TRM202, 4105, &[250]);
    bus.set_float32(TRM200, 4105, 21.5);
    bus.set_float32(TRM200, 4107, 22.25);
    bus.set_float32(TRM210, 4105, 0.5);
    bus.set_float32(TRM210, 4107, 40.0);
    bus.add_device(PUMP);
    bus
}

pub struct Harness {
    pub bus: SimulatedBus,
    pub store: Arc<SqliteStore>,
    pub service: AcquisitionService,
}

pub fn config_with(extra: &str) -> AppConfig {
    config::from_yaml_str(&format!("{}{}", PLANT, extra)).unwrap()
}

pub async fn harness_with_config(bus: SimulatedBus, config: &AppConfig) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let service = AcquisitionService::build(config, Arc::new(bus.clone()), store.clone()).unwrap();
    Harness {
        bus,
        store,
        service,
    }
}

pub async fn harness(bus: SimulatedBus) -> Harness {
    harness_with_config(bus, &config_with("")).await
}
