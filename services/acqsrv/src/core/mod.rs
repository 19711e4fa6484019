//! Acquisition core: register map, decoding, device locks, transport,
//! the poll cycle and the pieces that run inside it.

pub mod availability;
pub mod bootstrap;
pub mod decoder;
pub mod interlock;
pub mod locks;
pub mod poller;
pub mod register_map;
pub mod transport;
