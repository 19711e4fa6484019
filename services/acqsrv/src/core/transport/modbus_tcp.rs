//! Modbus TCP link backed by tokio-modbus

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::debug;

use super::{Connector, RegisterLink};
use crate::core::register_map::{Endpoint, RegisterType};
use crate::error::{AcqError, Result};

/// Connects over Modbus TCP, one TCP connection per session
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusTcpConnector;

#[async_trait]
impl Connector for ModbusTcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RegisterLink>> {
        let peer = resolve(endpoint).await?;
        let ctx = tcp::connect_slave(peer, Slave(endpoint.slave_id))
            .await
            .map_err(|e| match AcqError::from(e) {
                AcqError::ProtocolError(msg) => AcqError::connection(msg),
                other => other,
            })?;
        Ok(Box::new(ModbusTcpLink { ctx, peer }))
    }
}

async fn resolve(endpoint: &Endpoint) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|e| AcqError::connection(format!("resolve {}: {}", endpoint.host, e)))?;
    addrs
        .next()
        .ok_or_else(|| AcqError::connection(format!("no address for {}", endpoint.host)))
}

struct ModbusTcpLink {
    ctx: Context,
    peer: SocketAddr,
}

#[async_trait]
impl RegisterLink for ModbusTcpLink {
    async fn read(
        &mut self,
        register_type: RegisterType,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let response = match register_type {
            RegisterType::Holding => self.ctx.read_holding_registers(address, count).await,
            RegisterType::Input => self.ctx.read_input_registers(address, count).await,
        };
        flatten(response)
    }

    async fn write(&mut self, address: u16, value: u16) -> Result<()> {
        flatten(self.ctx.write_single_register(address, value).await)
    }

    async fn close(&mut self) {
        if let Err(e) = self.ctx.disconnect().await {
            debug!("Disconnect from {} failed: {:?}", self.peer, e);
        }
    }
}

/// Split the nested tokio-modbus result into one tagged error
fn flatten<T>(response: tokio_modbus::Result<T>) -> Result<T> {
    match response {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(exception)) => Err(AcqError::protocol(format!("exception reply: {}", exception))),
        Err(tokio_modbus::Error::Transport(e)) => Err(AcqError::from(e)),
        Err(tokio_modbus::Error::Protocol(e)) => Err(AcqError::protocol(e.to_string())),
    }
}
