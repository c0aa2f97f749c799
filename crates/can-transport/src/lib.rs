//! can-transport: CAN bus abstractions
//!
//! This crate provides the frame and identifier types shared by device drivers, a
//! blocking [`CanBus`] trait for backends, and a shared fire-and-forget [`TxQueue`]
//! that drivers enqueue into and the bus owner flushes. The default build enables a
//! `mock` backend so that binaries and tests run on any host without native drivers.

mod types;
pub use types::{BusInfo, CanFrame, CanId, Timestamp};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::CanBus;

mod queue;
pub use queue::TxQueue;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::MockBus;
