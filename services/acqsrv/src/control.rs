//! On-demand device access
//!
//! Single reads and writes addressed by device and function name. Each call
//! takes the device lock (bounded by the lock timeout), opens its own session
//! and closes it before returning, whatever the outcome.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::core::decoder;
use crate::core::locks::LockRegistry;
use crate::core::register_map::{Device, RegisterMap};
use crate::core::transport::{Connector, Timeouts, TransportSession};
use crate::error::{AcqError, Result};

/// Decoded value returned by an on-demand read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadResult {
    pub device: String,
    pub function: String,
    pub parameter: String,
    pub address: u16,
    pub value: f64,
}

/// Confirmation of an on-demand write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    pub device: String,
    pub function: String,
    pub register: u16,
    pub value: u16,
}

/// Read and write entry point shared by the HTTP layer
pub struct ControlService {
    map: Arc<RegisterMap>,
    locks: Arc<LockRegistry>,
    connector: Arc<dyn Connector>,
    timeouts: Timeouts,
    lock_timeout: Duration,
}

impl ControlService {
    pub fn new(
        map: Arc<RegisterMap>,
        locks: Arc<LockRegistry>,
        connector: Arc<dyn Connector>,
        timeouts: Timeouts,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            map,
            locks,
            connector,
            timeouts,
            lock_timeout,
        }
    }

    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    /// Read the parameter exposed as `function` on `device`
    pub async fn read(&self, device_id: &str, function: &str) -> Result<ReadResult> {
        let device = self.map.require_device(device_id)?;
        let parameter = device
            .read_function(function)
            .ok_or_else(|| AcqError::function_not_found(device_id, function))?;

        let words = self
            .with_session(device, |mut session| async move {
                let words = session.read(parameter).await;
                (session, words)
            })
            .await
            .inspect_err(|e| error!("{}/{}: read failed: {}", device_id, function, e))?;

        let value = decoder::decode(&words, &parameter.encoding).inspect_err(|e| {
            error!(
                "{}/{}: {}@{} {:04X?} not decodable: {}",
                device_id, function, parameter.name, parameter.address, words, e
            )
        })?;
        info!("{}/{}: {} = {}", device_id, function, parameter.name, value);

        Ok(ReadResult {
            device: device_id.to_string(),
            function: function.to_string(),
            parameter: parameter.name.clone(),
            address: parameter.address,
            value,
        })
    }

    /// Write `value` (or the control's default) to the register behind `function`
    pub async fn write(
        &self,
        device_id: &str,
        function: &str,
        value: Option<u16>,
    ) -> Result<WriteResult> {
        let device = self.map.require_device(device_id)?;
        let control = device
            .control(function)
            .ok_or_else(|| AcqError::function_not_found(device_id, function))?;
        let value = value.or(control.default_value).ok_or_else(|| {
            AcqError::validation(format!("{} on {} needs a value", function, device_id))
        })?;

        let register = control.register;
        self.with_session(device, |mut session| async move {
            let result = session.write(register, value).await;
            (session, result)
        })
        .await
        .inspect_err(|e| error!("{}/{}: write failed: {}", device_id, function, e))?;

        info!("{}/{}: {} <- {}", device_id, function, register, value);
        Ok(WriteResult {
            device: device_id.to_string(),
            function: function.to_string(),
            register,
            value,
        })
    }

    // Lock, open, run `op`, close; the lock is released on every path
    async fn with_session<T, F, Fut>(&self, device: &Device, op: F) -> Result<T>
    where
        F: FnOnce(TransportSession) -> Fut,
        Fut: std::future::Future<Output = (TransportSession, Result<T>)>,
    {
        let _guard = self
            .locks
            .acquire_timeout(&device.id, self.lock_timeout)
            .await?;
        let session = TransportSession::open(self.connector.clone(), device, self.timeouts).await?;
        let (mut session, result) = op(session).await;
        session.close().await;
        result
    }
}
