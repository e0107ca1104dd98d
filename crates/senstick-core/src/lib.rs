//! Hardware-independent core library for the senstick data logger
//!
//! This crate contains the platform-agnostic part of the firmware: the sensor
//! driver contract and the six concrete drivers, the static descriptor table,
//! the per-sensor flash log regions, and the sensor controller that ties them
//! together on a periodic tick. A thin GATT adapter maps controller state onto
//! characteristic reads, writes and notifications.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both the
//! device and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod bus;
pub mod config;
pub mod controller;
pub mod protocol;
pub mod sensors;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use bus::{BusError, SensorBus, TwiManager};
pub use config::{ControllerConfig, SensorSetting, SensorStatus, SettingError};
pub use controller::{ControlCommand, SensorController};
pub use sensors::{SensorDriver, SensorError, SensorType};
pub use storage::{StorageError, StorageRegionAllocator};
