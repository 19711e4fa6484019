//! Threshold-triggered protection sequence
//!
//! When the monitored parameter decodes above its threshold, a fixed four-step
//! write sequence runs against the actuator device:
//!
//! 1. set the override flag (automatic control off)
//! 2. zero the actuator command
//! 3. wait for the settle period, then restore the safe command value
//! 4. clear the override flag
//!
//! Execution is best-effort: a failed step is logged and the next one still runs.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::InterlockConfig;
use crate::core::locks::LockRegistry;
use crate::core::register_map::{Device, RegisterMap};
use crate::core::transport::{Connector, Timeouts, TransportSession};
use crate::error::{AcqError, Result};

/// One write in the protection sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterlockStep {
    pub label: &'static str,
    pub register: u16,
    pub value: u16,
}

/// Result of evaluating one decoded value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InterlockOutcome {
    /// Value at or below the threshold, nothing written
    Idle,
    /// Sequence ran; `failed` steps did not complete
    Executed { attempted: usize, failed: usize },
    /// Actuator has no lock entry, nothing written
    Skipped { reason: String },
}

/// Protection rule bound to one monitored parameter and one actuator
pub struct SafetyInterlock {
    monitored_device: String,
    monitored_parameter: String,
    threshold: f64,
    actuator: Device,
    override_register: u16,
    command_register: u16,
    safe_value: u16,
    override_enabled_value: u16,
    override_cleared_value: u16,
    settle: Duration,
    connector: Arc<dyn Connector>,
    timeouts: Timeouts,
}

impl std::fmt::Debug for SafetyInterlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyInterlock")
            .field("monitored_device", &self.monitored_device)
            .field("monitored_parameter", &self.monitored_parameter)
            .field("threshold", &self.threshold)
            .field("actuator", &self.actuator.id)
            .finish()
    }
}

impl SafetyInterlock {
    /// Build from configuration; `Ok(None)` when disabled
    pub fn from_config(
        config: &InterlockConfig,
        map: &RegisterMap,
        connector: Arc<dyn Connector>,
        timeouts: Timeouts,
    ) -> Result<Option<Self>> {
        Self::validate(config, map)?;
        if !config.enabled {
            info!("Safety interlock disabled");
            return Ok(None);
        }

        let actuator = map.require_device(&config.actuator_device)?.clone();
        Ok(Some(Self {
            monitored_device: config.monitored_device.clone(),
            monitored_parameter: config.monitored_parameter.clone(),
            threshold: config.threshold,
            actuator,
            override_register: config.override_register,
            command_register: config.command_register,
            safe_value: config.safe_value,
            override_enabled_value: config.override_enabled_value,
            override_cleared_value: config.override_cleared_value,
            settle: config.settle(),
            connector,
            timeouts,
        }))
    }

    /// Check that every name in the rule resolves against the map
    pub fn validate(config: &InterlockConfig, map: &RegisterMap) -> Result<()> {
        let monitored = map.device(&config.monitored_device).ok_or_else(|| {
            AcqError::config(format!(
                "interlock monitors unknown device {}",
                config.monitored_device
            ))
        })?;
        let parameter = monitored
            .parameter(&config.monitored_parameter)
            .ok_or_else(|| {
                AcqError::config(format!(
                    "interlock monitors unknown parameter {} on {}",
                    config.monitored_parameter, config.monitored_device
                ))
            })?;
        if !parameter.poll {
            return Err(AcqError::config(format!(
                "interlock parameter {} is not polled",
                parameter.name
            )));
        }
        if !config.threshold.is_finite() {
            return Err(AcqError::config("interlock threshold must be finite"));
        }
        if map.device(&config.actuator_device).is_none() {
            return Err(AcqError::config(format!(
                "interlock actuator {} is not a configured device",
                config.actuator_device
            )));
        }
        Ok(())
    }

    pub fn monitors(&self, device: &str, parameter: &str) -> bool {
        self.monitored_device == device && self.monitored_parameter == parameter
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn actuator(&self) -> &str {
        &self.actuator.id
    }

    pub fn is_triggered(&self, value: f64) -> bool {
        value > self.threshold
    }

    /// Writes before the settle wait
    fn disengage_steps(&self) -> [InterlockStep; 2] {
        [
            InterlockStep {
                label: "enable override",
                register: self.override_register,
                value: self.override_enabled_value,
            },
            InterlockStep {
                label: "zero command",
                register: self.command_register,
                value: 0,
            },
        ]
    }

    /// Writes after the settle wait
    fn restore_steps(&self) -> [InterlockStep; 2] {
        [
            InterlockStep {
                label: "restore command",
                register: self.command_register,
                value: self.safe_value,
            },
            InterlockStep {
                label: "clear override",
                register: self.override_register,
                value: self.override_cleared_value,
            },
        ]
    }

    /// Full sequence in execution order
    pub fn sequence(&self) -> Vec<InterlockStep> {
        self.disengage_steps()
            .into_iter()
            .chain(self.restore_steps())
            .collect()
    }

    /// Evaluate a freshly decoded value of the monitored parameter
    ///
    /// `trigger` is the open session of the monitored device, whose lock the
    /// caller holds. It is reused when the actuator is the same device;
    /// otherwise the actuator's own lock is taken for the whole sequence.
    /// That wait is unbounded: every other holder is bounded by the transport
    /// timeouts, and the interlock is the only caller holding two locks.
    pub async fn evaluate(
        &self,
        value: f64,
        trigger: &mut TransportSession,
        locks: &LockRegistry,
    ) -> InterlockOutcome {
        if !self.is_triggered(value) {
            return InterlockOutcome::Idle;
        }

        warn!(
            "Interlock: {}.{} = {} exceeds {}, protecting {}",
            self.monitored_device,
            self.monitored_parameter,
            value,
            self.threshold,
            self.actuator.id
        );

        if trigger.device() == self.actuator.id {
            return self.execute(trigger).await;
        }

        if locks.is_held(&self.actuator.id) {
            debug!("Interlock: waiting for actuator {} lock", self.actuator.id);
        }
        let _guard = match locks.acquire(&self.actuator.id).await {
            Ok(guard) => guard,
            Err(e) => {
                error!("Interlock: actuator {} unavailable: {}", self.actuator.id, e);
                return InterlockOutcome::Skipped {
                    reason: e.to_string(),
                };
            },
        };

        let mut session = TransportSession::new(self.connector.clone(), &self.actuator, self.timeouts);
        let outcome = self.execute(&mut session).await;
        session.close().await;
        outcome
    }

    async fn execute(&self, session: &mut TransportSession) -> InterlockOutcome {
        let mut failed = 0;
        for step in self.disengage_steps() {
            if !self.write_step(session, step).await {
                failed += 1;
            }
        }

        tokio::time::sleep(self.settle).await;

        for step in self.restore_steps() {
            if !self.write_step(session, step).await {
                failed += 1;
            }
        }

        if failed == 0 {
            info!("Interlock: sequence on {} completed", self.actuator.id);
        } else {
            error!(
                "Interlock: sequence on {} finished with {} failed step(s)",
                self.actuator.id, failed
            );
        }
        InterlockOutcome::Executed {
            attempted: 4,
            failed,
        }
    }

    async fn write_step(&self, session: &mut TransportSession, step: InterlockStep) -> bool {
        if !session.is_open() {
            if let Err(e) = session.reopen().await {
                error!(
                    "Interlock: {} ({}={}) on {} not sent: {} [{}]",
                    step.label,
                    step.register,
                    step.value,
                    self.actuator.id,
                    e,
                    e.fault_kind().map(|k| k.to_string()).unwrap_or_default()
                );
                return false;
            }
        }

        match session.write(step.register, step.value).await {
            Ok(()) => {
                info!(
                    "Interlock: {} ({}={}) on {}",
                    step.label, step.register, step.value, self.actuator.id
                );
                true
            },
            Err(e) => {
                error!(
                    "Interlock: {} ({}={}) on {} failed: {} [{}]",
                    step.label,
                    step.register,
                    step.value,
                    self.actuator.id,
                    e,
                    e.fault_kind().map(|k| k.to_string()).unwrap_or_default()
                );
                false
            },
        }
    }
}
