//! Clusterplug - Load-driven big.LITTLE core hotplug for DaemonOS
//!
//! Keeps the number of online cores in step with demand:
//! - Periodic load sampling across every online core
//! - Hysteresis voting before any core is added or removed
//! - LITTLE-only power-save modes (low power, screen-off power)
//! - Display-driven suspend and resume of the sampling loop

pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod hotplug;
pub mod ipc;
pub mod params;
pub mod policy;
pub mod sampler;
pub mod scheduler;
pub mod topology;
pub mod vote;

#[cfg(test)]
mod testing;

pub use config::{ClusterPlugConfig, Tunables};
pub use controller::{Controller, ControllerStatus};
pub use error::{ClusterPlugError, Result};
pub use params::{Parameter, ParameterValue};
pub use policy::{DisplayEvent, Mode};
pub use scheduler::{Driver, DriverHandle};
pub use topology::{CoreId, Layout, Topology};
