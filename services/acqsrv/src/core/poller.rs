//! Periodic acquisition cycle
//!
//! One cycle visits every configured device. Per device the attempt walks
//! through the phases in [`DevicePhase`] while holding that device's lock:
//! connect, then for each polled parameter read and decode. A parameter that
//! fails is skipped; the device counts as successful when it connected and at
//! least one parameter decoded. Only successful values are persisted, so a
//! failed read never replaces the last good value.
//!
//! Persistence and availability are written once, after every device finished.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{FaultPolicyKind, PollingConfig};
use crate::core::availability::{self, DeviceStatus};
use crate::core::decoder;
use crate::core::interlock::SafetyInterlock;
use crate::core::locks::LockRegistry;
use crate::core::register_map::{Device, Parameter, RegisterMap};
use crate::core::transport::{Connector, Timeouts, TransportSession};
use crate::error::{AcqError, FaultKind, Result};
use crate::storage::{AcquisitionStore, StoredParameter};

/// Reaction to a failed device attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Record the failure and move on to the next device
    FailFast,
    /// Retry the whole device attempt, releasing its lock between attempts
    BoundedRetry { max_retries: u32, delay: Duration },
}

impl FaultPolicy {
    fn max_attempts(self) -> u32 {
        match self {
            FaultPolicy::FailFast => 1,
            FaultPolicy::BoundedRetry { max_retries, .. } => max_retries.saturating_add(1),
        }
    }
}

/// Cycle tuning derived from the polling section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub timeouts: Timeouts,
    pub lock_timeout: Duration,
    pub policy: FaultPolicy,
    pub concurrent: bool,
}

impl PollSettings {
    pub fn from_config(config: &PollingConfig) -> Result<Self> {
        if config.interval()?.is_zero() {
            return Err(AcqError::config("polling interval must be greater than zero"));
        }
        if config.connect_timeout_ms == 0 || config.read_timeout_ms == 0 {
            return Err(AcqError::config("transport timeouts must be greater than zero"));
        }

        let policy = match config.fault_policy {
            FaultPolicyKind::FailFast => FaultPolicy::FailFast,
            FaultPolicyKind::BoundedRetry => FaultPolicy::BoundedRetry {
                max_retries: config.max_retries,
                delay: config.retry_delay(),
            },
        };

        Ok(Self {
            timeouts: Timeouts {
                connect: config.connect_timeout(),
                io: config.read_timeout(),
            },
            lock_timeout: config.lock_timeout(),
            policy,
            concurrent: config.concurrent_devices,
        })
    }
}

/// Where a device attempt currently is, or where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePhase {
    Locking,
    Connecting,
    Reading,
    Decoding,
    Done,
}

/// Result of one parameter in one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadOutcome {
    pub parameter: String,
    pub address: u16,
    pub type_tag: i64,
    pub value: Option<f64>,
    pub fault: Option<FaultKind>,
}

impl ReadOutcome {
    fn success(parameter: &Parameter, value: f64) -> Self {
        Self {
            parameter: parameter.name.clone(),
            address: parameter.address,
            type_tag: parameter.encoding.type_tag(),
            value: Some(value),
            fault: None,
        }
    }

    fn failure(parameter: &Parameter, fault: FaultKind) -> Self {
        Self {
            parameter: parameter.name.clone(),
            address: parameter.address,
            type_tag: parameter.encoding.type_tag(),
            value: None,
            fault: Some(fault),
        }
    }

    pub fn is_success(&self) -> bool {
        self.value.is_some()
    }
}

/// Result of one device in one cycle
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub device: String,
    pub unit: String,
    pub success: bool,
    pub attempts: u32,
    /// Phase the last attempt ended in
    pub phase: DevicePhase,
    /// Fault that ended the last attempt early, if any
    pub fault: Option<FaultKind>,
    pub outcomes: Vec<ReadOutcome>,
}

/// Result of a whole cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub devices: Vec<DeviceReport>,
    pub availability: BTreeMap<String, bool>,
    /// Parameter rows written this cycle
    pub persisted: usize,
}

impl CycleReport {
    pub fn device(&self, id: &str) -> Option<&DeviceReport> {
        self.devices.iter().find(|d| d.device == id)
    }
}

// Outcome of a single attempt before retry bookkeeping
struct Attempt {
    phase: DevicePhase,
    fault: Option<FaultKind>,
    outcomes: Vec<ReadOutcome>,
    connected: bool,
}

impl Attempt {
    fn aborted(device: &Device, phase: DevicePhase, fault: FaultKind) -> Self {
        Self {
            phase,
            fault: Some(fault),
            outcomes: device
                .polled_parameters()
                .map(|p| ReadOutcome::failure(p, fault))
                .collect(),
            connected: false,
        }
    }

    fn success(&self, polled: usize) -> bool {
        self.connected && (polled == 0 || self.outcomes.iter().any(ReadOutcome::is_success))
    }
}

/// Drives acquisition cycles over the register map
pub struct PollCoordinator {
    map: Arc<RegisterMap>,
    locks: Arc<LockRegistry>,
    connector: Arc<dyn Connector>,
    store: Arc<dyn AcquisitionStore>,
    interlock: Option<Arc<SafetyInterlock>>,
    settings: PollSettings,
}

impl PollCoordinator {
    pub fn new(
        map: Arc<RegisterMap>,
        locks: Arc<LockRegistry>,
        connector: Arc<dyn Connector>,
        store: Arc<dyn AcquisitionStore>,
        settings: PollSettings,
    ) -> Self {
        Self {
            map,
            locks,
            connector,
            store,
            interlock: None,
            settings,
        }
    }

    pub fn with_interlock(mut self, interlock: Option<Arc<SafetyInterlock>>) -> Self {
        self.interlock = interlock;
        self
    }

    /// Run one full cycle: poll, aggregate, persist
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = Utc::now();
        let started = Instant::now();

        let devices: Vec<DeviceReport> = if self.settings.concurrent {
            join_all(self.map.devices().map(|d| self.poll_device(d))).await
        } else {
            let mut reports = Vec::with_capacity(self.map.len());
            for device in self.map.devices() {
                reports.push(self.poll_device(device).await);
            }
            reports
        };

        let status: DeviceStatus = devices
            .iter()
            .map(|d| (d.device.clone(), d.success))
            .collect();
        let availability = availability::aggregate(&self.map, &status);

        let persisted = self.persist(&devices).await;
        if let Err(e) = self.store.replace_availability(&availability).await {
            error!("Availability write failed: {}", e);
        }

        let report = CycleReport {
            started_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            devices,
            availability,
            persisted,
        };

        let ok = report.devices.iter().filter(|d| d.success).count();
        info!(
            "Cycle done: {}/{} devices ok, {} values stored, {}ms",
            ok,
            report.devices.len(),
            report.persisted,
            report.duration_ms
        );
        report
    }

    async fn persist(&self, devices: &[DeviceReport]) -> usize {
        let mut persisted = 0;
        for device in devices {
            for outcome in &device.outcomes {
                let Some(value) = outcome.value else {
                    continue;
                };
                let row = StoredParameter {
                    param_name: outcome.parameter.clone(),
                    type_tag: outcome.type_tag,
                    value,
                    unit_id: device.unit.clone(),
                };
                match self.store.upsert_parameter(&row).await {
                    Ok(()) => persisted += 1,
                    Err(e) => error!("Store {} failed: {}", row.param_name, e),
                }
            }
        }
        persisted
    }

    /// Poll one device under its fault policy
    pub async fn poll_device(&self, device: &Device) -> DeviceReport {
        let polled = device.polled_parameters().count();
        let max_attempts = self.settings.policy.max_attempts();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let attempt = self.attempt_device(device).await;
            let success = attempt.success(polled);

            if success || attempts >= max_attempts {
                if !success {
                    warn!(
                        "{}: failed after {} attempt(s) in {:?}",
                        device.id, attempts, attempt.phase
                    );
                }
                return DeviceReport {
                    device: device.id.clone(),
                    unit: device.unit.clone(),
                    success,
                    attempts,
                    phase: attempt.phase,
                    fault: attempt.fault,
                    outcomes: attempt.outcomes,
                };
            }

            if let FaultPolicy::BoundedRetry { delay, .. } = self.settings.policy {
                debug!(
                    "{}: attempt {}/{} failed, retrying in {:?}",
                    device.id, attempts, max_attempts, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn attempt_device(&self, device: &Device) -> Attempt {
        let _guard = match self
            .locks
            .acquire_timeout(&device.id, self.settings.lock_timeout)
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                warn!("{}: {}", device.id, e);
                return Attempt::aborted(device, DevicePhase::Locking, FaultKind::Timeout);
            },
        };

        let mut session =
            match TransportSession::open(self.connector.clone(), device, self.settings.timeouts)
                .await
            {
                Ok(session) => session,
                Err(e) => {
                    let fault = e.fault_kind().unwrap_or(FaultKind::Connection);
                    error!("{}: connect failed [{}]: {}", device.id, fault, e);
                    return Attempt::aborted(device, DevicePhase::Connecting, fault);
                },
            };

        let mut attempt = Attempt {
            phase: DevicePhase::Reading,
            fault: None,
            outcomes: Vec::new(),
            connected: true,
        };

        let parameters: Vec<&Parameter> = device.polled_parameters().collect();
        for (index, parameter) in parameters.iter().enumerate() {
            if !session.is_open() {
                attempt.phase = DevicePhase::Connecting;
                if let Err(e) = session.reopen().await {
                    let fault = e.fault_kind().unwrap_or(FaultKind::Connection);
                    error!("{}: reconnect failed [{}]: {}", device.id, fault, e);
                    attempt.fault = Some(fault);
                    attempt
                        .outcomes
                        .extend(parameters[index..].iter().map(|p| ReadOutcome::failure(p, fault)));
                    break;
                }
            }

            attempt.phase = DevicePhase::Reading;
            let words = match session.read(parameter).await {
                Ok(words) => words,
                Err(e) => {
                    let fault = e.fault_kind().unwrap_or(FaultKind::Protocol);
                    error!(
                        "{}: read {}@{} failed [{}]: {}",
                        device.id, parameter.name, parameter.address, fault, e
                    );
                    attempt.outcomes.push(ReadOutcome::failure(parameter, fault));
                    continue;
                },
            };

            attempt.phase = DevicePhase::Decoding;
            let value = match decoder::decode(&words, &parameter.encoding) {
                Ok(value) => value,
                Err(e) => {
                    error!("{}: {} {:04X?}: {}", device.id, parameter.name, words, e);
                    attempt
                        .outcomes
                        .push(ReadOutcome::failure(parameter, FaultKind::Decode));
                    continue;
                },
            };

            info!("{}: {} = {}", device.id, parameter.name, value);
            attempt.outcomes.push(ReadOutcome::success(parameter, value));

            if let Some(interlock) = &self.interlock {
                if interlock.monitors(&device.id, &parameter.name) {
                    let outcome = interlock.evaluate(value, &mut session, &self.locks).await;
                    debug!("{}: interlock {:?}", device.id, outcome);
                }
            }
        }

        session.close().await;
        if attempt.fault.is_none() {
            attempt.phase = DevicePhase::Done;
        }
        attempt
    }
}
