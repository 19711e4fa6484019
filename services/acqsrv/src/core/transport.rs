//! Register transport
//!
//! [`Connector`] and [`RegisterLink`] are the seam to the wire client. Every
//! call made through a [`TransportSession`] is bounded by the configured
//! timeouts, and failures come back tagged with a [`FaultKind`].
//!
//! A session that hit a connection or timeout fault drops its link; the caller
//! reopens it before the next transaction.

pub mod modbus_tcp;

pub use modbus_tcp::ModbusTcpConnector;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::register_map::{Device, Endpoint, Parameter, RegisterType};
use crate::error::{AcqError, FaultKind, Result};

/// Opens links to devices
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RegisterLink>>;
}

/// An open link to one device
#[async_trait]
pub trait RegisterLink: Send {
    async fn read(&mut self, register_type: RegisterType, address: u16, count: u16)
        -> Result<Vec<u16>>;

    async fn write(&mut self, address: u16, value: u16) -> Result<()>;

    async fn close(&mut self);
}

/// Bounds applied to connect and register transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub io: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(500),
            io: Duration::from_millis(300),
        }
    }
}

/// Bounded session with one device
pub struct TransportSession {
    device: String,
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    timeouts: Timeouts,
    link: Option<Box<dyn RegisterLink>>,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("device", &self.device)
            .field("endpoint", &self.endpoint)
            .field("open", &self.link.is_some())
            .finish()
    }
}

impl TransportSession {
    /// Session that is not yet connected
    pub fn new(connector: Arc<dyn Connector>, device: &Device, timeouts: Timeouts) -> Self {
        Self {
            device: device.id.clone(),
            endpoint: device.endpoint.clone(),
            connector,
            timeouts,
            link: None,
        }
    }

    /// Connect within the connect timeout
    pub async fn open(
        connector: Arc<dyn Connector>,
        device: &Device,
        timeouts: Timeouts,
    ) -> Result<Self> {
        let mut session = Self::new(connector, device, timeouts);
        session.reopen().await?;
        Ok(session)
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Drop any current link and connect again
    pub async fn reopen(&mut self) -> Result<()> {
        self.close().await;

        let connect = self.connector.connect(&self.endpoint);
        let link = match tokio::time::timeout(self.timeouts.connect, connect).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(AcqError::timeout(format!(
                    "connect to {} ({}) exceeded {:?}",
                    self.device, self.endpoint, self.timeouts.connect
                )))
            },
        };

        debug!("Connected to {} at {}", self.device, self.endpoint);
        self.link = Some(link);
        Ok(())
    }

    /// Read the registers backing `parameter`
    pub async fn read(&mut self, parameter: &Parameter) -> Result<Vec<u16>> {
        self.read_registers(parameter.register_type, parameter.address, parameter.count)
            .await
    }

    pub async fn read_registers(
        &mut self,
        register_type: RegisterType,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let io_timeout = self.timeouts.io;
        let device = self.device.clone();
        let link = self.link_mut()?;
        let words = bounded(
            io_timeout,
            link.read(register_type, address, count),
            || format!("read {}@{} on {}", count, address, device),
        )
        .await;
        let words = self.settle(words)?;

        if words.len() != usize::from(count) {
            return Err(AcqError::protocol(format!(
                "{} answered {} word(s) for {} requested at {}",
                self.device,
                words.len(),
                count,
                address
            )));
        }
        Ok(words)
    }

    /// Write one holding register
    pub async fn write(&mut self, address: u16, value: u16) -> Result<()> {
        let io_timeout = self.timeouts.io;
        let device = self.device.clone();
        let link = self.link_mut()?;
        let result = bounded(io_timeout, link.write(address, value), || {
            format!("write {}={} on {}", address, value, device)
        })
        .await;
        self.settle(result)
    }

    /// Close the link if one is open
    pub async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close().await;
            debug!("Closed session with {}", self.device);
        }
    }

    fn link_mut(&mut self) -> Result<&mut Box<dyn RegisterLink>> {
        match self.link.as_mut() {
            Some(link) => Ok(link),
            None => Err(AcqError::connection(format!(
                "no open session with {}",
                self.device
            ))),
        }
    }

    // Faults that leave the link in an unknown state discard it
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.fault_kind().is_some_and(FaultKind::poisons_session) {
                debug!("Discarding session with {} after {}", self.device, e);
                self.link = None;
            }
        }
        result
    }
}

async fn bounded<T, F, M>(limit: Duration, fut: F, describe: M) -> Result<T>
where
    F: Future<Output = Result<T>>,
    M: FnOnce() -> String,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AcqError::timeout(format!(
            "{} exceeded {:?}",
            describe(),
            limit
        ))),
    }
}
