//! In-process device bus for tests
//!
//! [`SimulatedBus`] implements [`Connector`] over a table of simulated
//! devices keyed by slave id. Register contents, delays and failures are set
//! per device, and every transaction is logged with start and end instants so
//! tests can check ordering and overlap.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::register_map::{Endpoint, RegisterType};
use crate::core::transport::{Connector, RegisterLink};
use crate::error::{AcqError, Result};

/// Kind of a logged transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Read,
    Write,
}

/// One register transaction as seen by the simulated device
#[derive(Debug, Clone)]
pub struct Transaction {
    pub slave_id: u8,
    pub kind: TransactionKind,
    pub address: u16,
    /// Written value, or `None` for reads
    pub value: Option<u16>,
    pub ok: bool,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Debug, Default)]
struct SimDevice {
    holding: HashMap<u16, u16>,
    input: HashMap<u16, u16>,
    connect_delay: Duration,
    read_delay: Duration,
    refuse_connections: bool,
    refuse_next: u32,
    failing_reads: HashSet<u16>,
    hanging_reads: HashMap<u16, Duration>,
    failing_writes: HashSet<u16>,
    truncate_reads: bool,
    connects: usize,
}

#[derive(Debug, Default)]
struct BusState {
    devices: HashMap<u8, SimDevice>,
    log: Vec<Transaction>,
}

/// Shared handle to a simulated register bus
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    state: Arc<Mutex<BusState>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_device<R>(&self, slave_id: u8, f: impl FnOnce(&mut SimDevice) -> R) -> R {
        let mut state = self.state.lock();
        f(state.devices.entry(slave_id).or_default())
    }

    pub fn add_device(&self, slave_id: u8) {
        self.with_device(slave_id, |_| ());
    }

    /// Set consecutive holding registers starting at `address`
    pub fn set_holding(&self, slave_id: u8, address: u16, words: &[u16]) {
        self.with_device(slave_id, |d| {
            for (offset, word) in (0u16..).zip(words) {
                d.holding.insert(address + offset, *word);
            }
        });
    }

    pub fn set_input(&self, slave_id: u8, address: u16, words: &[u16]) {
        self.with_device(slave_id, |d| {
            for (offset, word) in (0u16..).zip(words) {
                d.input.insert(address + offset, *word);
            }
        });
    }

    /// Store an f32 as two holding registers, high word first
    pub fn set_float32(&self, slave_id: u8, address: u16, value: f32) {
        let bits = value.to_bits();
        self.set_holding(slave_id, address, &[(bits >> 16) as u16, bits as u16]);
    }

    pub fn holding(&self, slave_id: u8, address: u16) -> Option<u16> {
        self.with_device(slave_id, |d| d.holding.get(&address).copied())
    }

    pub fn set_connect_delay(&self, slave_id: u8, delay: Duration) {
        self.with_device(slave_id, |d| d.connect_delay = delay);
    }

    pub fn set_read_delay(&self, slave_id: u8, delay: Duration) {
        self.with_device(slave_id, |d| d.read_delay = delay);
    }

    pub fn refuse_connections(&self, slave_id: u8, refuse: bool) {
        self.with_device(slave_id, |d| d.refuse_connections = refuse);
    }

    /// Refuse only the next `n` connection attempts
    pub fn refuse_next_connections(&self, slave_id: u8, n: u32) {
        self.with_device(slave_id, |d| d.refuse_next = n);
    }

    /// Reads at `address` answer with an exception reply
    pub fn fail_read(&self, slave_id: u8, address: u16) {
        self.with_device(slave_id, |d| {
            d.failing_reads.insert(address);
        });
    }

    pub fn clear_read_failure(&self, slave_id: u8, address: u16) {
        self.with_device(slave_id, |d| {
            d.failing_reads.remove(&address);
        });
    }

    /// Reads at `address` take `delay` before answering
    pub fn hang_read(&self, slave_id: u8, address: u16, delay: Duration) {
        self.with_device(slave_id, |d| {
            d.hanging_reads.insert(address, delay);
        });
    }

    pub fn fail_write(&self, slave_id: u8, address: u16) {
        self.with_device(slave_id, |d| {
            d.failing_writes.insert(address);
        });
    }

    /// Answer reads with one word fewer than requested
    pub fn truncate_reads(&self, slave_id: u8, truncate: bool) {
        self.with_device(slave_id, |d| d.truncate_reads = truncate);
    }

    /// Successful connections made to a device
    pub fn connect_count(&self, slave_id: u8) -> usize {
        self.with_device(slave_id, |d| d.connects)
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().log.clone()
    }

    pub fn transactions_for(&self, slave_id: u8) -> Vec<Transaction> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|t| t.slave_id == slave_id)
            .cloned()
            .collect()
    }

    /// Attempted writes to a device as `(address, value)`, in order
    pub fn writes(&self, slave_id: u8) -> Vec<(u16, u16)> {
        self.transactions_for(slave_id)
            .into_iter()
            .filter(|t| t.kind == TransactionKind::Write)
            .filter_map(|t| t.value.map(|v| (t.address, v)))
            .collect()
    }

    fn record(&self, transaction: Transaction) {
        self.state.lock().log.push(transaction);
    }
}

#[async_trait]
impl Connector for SimulatedBus {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RegisterLink>> {
        let slave_id = endpoint.slave_id;
        let delay = self.with_device(slave_id, |d| d.connect_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let refused = self.with_device(slave_id, |d| {
            if d.refuse_connections {
                return true;
            }
            if d.refuse_next > 0 {
                d.refuse_next -= 1;
                return true;
            }
            d.connects += 1;
            false
        });
        if refused {
            return Err(AcqError::connection(format!(
                "{}: connection refused",
                endpoint
            )));
        }

        Ok(Box::new(SimLink {
            bus: self.clone(),
            slave_id,
        }))
    }
}

struct SimLink {
    bus: SimulatedBus,
    slave_id: u8,
}

#[async_trait]
impl RegisterLink for SimLink {
    async fn read(
        &mut self,
        register_type: RegisterType,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let started = Instant::now();
        let (delay, failing, truncate) = self.bus.with_device(self.slave_id, |d| {
            let delay = d.hanging_reads.get(&address).copied().unwrap_or(d.read_delay);
            (delay, d.failing_reads.contains(&address), d.truncate_reads)
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = if failing {
            Err(AcqError::protocol(format!(
                "exception reply: illegal data address {}",
                address
            )))
        } else {
            let words = self.bus.with_device(self.slave_id, |d| {
                let bank = match register_type {
                    RegisterType::Holding => &d.holding,
                    RegisterType::Input => &d.input,
                };
                let mut words: Vec<u16> = (0..count)
                    .map(|i| bank.get(&(address + i)).copied().unwrap_or(0))
                    .collect();
                if truncate {
                    words.pop();
                }
                words
            });
            Ok(words)
        };

        self.bus.record(Transaction {
            slave_id: self.slave_id,
            kind: TransactionKind::Read,
            address,
            value: None,
            ok: result.is_ok(),
            started,
            finished: Instant::now(),
        });
        result
    }

    async fn write(&mut self, address: u16, value: u16) -> Result<()> {
        let started = Instant::now();
        let (delay, failing) = self.bus.with_device(self.slave_id, |d| {
            (d.read_delay, d.failing_writes.contains(&address))
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = if failing {
            Err(AcqError::protocol(format!(
                "exception reply: illegal data value at {}",
                address
            )))
        } else {
            self.bus.with_device(self.slave_id, |d| {
                d.holding.insert(address, value);
            });
            Ok(())
        };

        self.bus.record(Transaction {
            slave_id: self.slave_id,
            kind: TransactionKind::Write,
            address,
            value: Some(value),
            ok: result.is_ok(),
            started,
            finished: Instant::now(),
        });
        result
    }

    async fn close(&mut self) {}
}
