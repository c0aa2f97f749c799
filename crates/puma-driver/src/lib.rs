//! puma-driver: CAN driver for Puma/Jaguar-family brushed motor controllers
//!
//! Each [`Driver`] owns one controller address on a shared bus. Inbound frames are
//! decoded into a per-controller [`TelemetryCache`]; commands, read requests and
//! configuration writes go out through a shared [`can_transport::TxQueue`]. A
//! caller-paced configuration ladder (`configure_params` / `verify_params`) brings a
//! freshly powered controller into a verified control mode with verified gains.
//! [`MultiDriver`] runs that cadence for several controllers on one bus, and the
//! [`sim`] module provides simulated controllers for tests and dry runs.

pub mod api;
pub use api::{extract_api, extract_device, ApiCode, MessageGroup};

mod fixed;
pub use fixed::{Fixed16x16, Fixed8x8};

mod cache;
pub use cache::{Field, TelemetryCache};

mod mode;
pub use mode::{ControlMode, GainTerm, Gains};

mod driver;
pub use driver::Driver;

mod ladder;
pub use ladder::ConfigurationState;

mod handle;
pub use handle::DriverHandle;

mod error;
pub use error::ConfigError;

mod config;
pub use config::{GainConfig, JointConfig, PumaConfig};

mod metrics;
pub use metrics::{DriverMetrics, MetricsHub};

mod multi;
pub use multi::{Feedback, MultiDriver, RunReport, Status};

pub mod sim;
