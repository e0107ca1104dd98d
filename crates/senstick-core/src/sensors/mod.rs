pub mod ak8963;
pub mod bh1780;
pub(crate) mod conversion;
pub mod descriptor;
pub mod lps25hb;
pub mod mpu9250;
pub mod sht20;

use core::fmt;

use thiserror_no_std::Error;

use crate::bus::{BusError, SensorBus};
use crate::config::SensorSetting;

pub use ak8963::AK8963Sensor;
pub use bh1780::BH1780Sensor;
pub use descriptor::{DESCRIPTORS, DescriptorTable, SensorDescriptor, StorageBounds};
pub use lps25hb::LPS25HBSensor;
pub use mpu9250::{MPU9250AccelSensor, MPU9250GyroSensor};
pub use sht20::SHT20Sensor;

/// Number of sensing modalities on the device.
pub const SENSOR_COUNT: usize = 6;

/// Largest native sample any driver produces.
pub const MAX_RAW_SAMPLE_SIZE: usize = 6;

/// Largest wire-serialized sample any driver produces.
pub const MAX_WIRE_SAMPLE_SIZE: usize = 6;

/// A native sample as produced by a driver.
pub type RawSample = heapless::Vec<u8, MAX_RAW_SAMPLE_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SensorType {
    Accelerometer,
    Gyroscope,
    Magnetometer,
    Humidity,
    Pressure,
    Brightness,
}

impl SensorType {
    pub const ALL: [SensorType; SENSOR_COUNT] = [
        Self::Accelerometer,
        Self::Gyroscope,
        Self::Magnetometer,
        Self::Humidity,
        Self::Pressure,
        Self::Brightness,
    ];

    /// Position of this sensor in every per-sensor table.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Accelerometer => "accelerometer",
            Self::Gyroscope => "gyroscope",
            Self::Magnetometer => "magnetometer",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::Brightness => "brightness",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} initialization failed: {details}")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },
    #[error("{sensor} failed to {operation}: {error}")]
    Bus {
        sensor: &'static str,
        operation: &'static str,
        error: BusError,
    },
    #[error("{sensor} conversion did not finish within {timeout_ms} ms")]
    ConversionTimeout {
        sensor: &'static str,
        timeout_ms: u32,
    },
    #[error("{sensor} reading failed its checksum")]
    ChecksumMismatch { sensor: &'static str },
    #[error("{sensor} needs a {needed}-byte sample buffer")]
    BufferTooSmall { sensor: &'static str, needed: usize },
}

/// Typed readings with a fixed native and wire layout.
///
/// The native layout is what gets committed to flash; the wire layout is what
/// the protocol adapter sends. Both are little-endian.
pub trait SensorReadings: Copy {
    const RAW_SIZE: usize;
    const WIRE_SIZE: usize;

    /// Decode from the first `RAW_SIZE` bytes of `raw`.
    fn from_raw(raw: &[u8]) -> Self;

    /// Encode into the first `RAW_SIZE` bytes of `out`.
    fn write_raw(&self, out: &mut [u8]);

    /// Encode into the first `WIRE_SIZE` bytes of `out`.
    fn write_wire(&self, out: &mut [u8]);

    /// Elementwise maximum (`is_max`) or minimum of two readings.
    fn min_max(self, other: Self, is_max: bool) -> Self;
}

/// The uniform timed-sampling contract every sensor driver implements.
///
/// The controller owns the bus and passes it in for the duration of a call.
pub trait SensorDriver {
    fn sensor_type(&self) -> SensorType;

    /// Configure the chip. Called on every wake transition.
    fn init(&mut self, bus: &mut dyn SensorBus) -> Result<(), SensorError>;

    /// Move between low-power and active mode.
    fn set_wakeup(
        &mut self,
        bus: &mut dyn SensorBus,
        should_wake: bool,
        setting: &SensorSetting,
    ) -> Result<(), SensorError>;

    /// Advance the driver's sampling state machine by `elapsed_ms`.
    ///
    /// Returns 0 while no sample is ready, otherwise the native sample size
    /// after writing exactly that many bytes to `out`.
    fn sample(
        &mut self,
        bus: &mut dyn SensorBus,
        out: &mut [u8],
        elapsed_ms: u32,
    ) -> Result<usize, SensorError>;

    /// Write the elementwise max or min of two native samples to `out`.
    fn reduce_min_max(&self, is_max: bool, a: &[u8], b: &[u8], out: &mut [u8]);

    /// Convert a native sample to its wire form. Returns the wire size.
    fn serialize_wire(&self, out: &mut [u8], raw: &[u8]) -> usize;
}

/// Three signed 16-bit axes, shared by the motion sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisReadings {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl AxisReadings {
    /// Decode three big-endian axes as laid out by the MPU-9250.
    pub fn from_be_bytes(bytes: &[u8; 6]) -> Self {
        Self {
            x: i16::from_be_bytes([bytes[0], bytes[1]]),
            y: i16::from_be_bytes([bytes[2], bytes[3]]),
            z: i16::from_be_bytes([bytes[4], bytes[5]]),
        }
    }

    /// Decode three little-endian axes as laid out by the AK8963.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        Self {
            x: i16::from_le_bytes([bytes[0], bytes[1]]),
            y: i16::from_le_bytes([bytes[2], bytes[3]]),
            z: i16::from_le_bytes([bytes[4], bytes[5]]),
        }
    }
}

impl SensorReadings for AxisReadings {
    const RAW_SIZE: usize = 6;
    const WIRE_SIZE: usize = 6;

    fn from_raw(raw: &[u8]) -> Self {
        Self::from_le_bytes(raw)
    }

    fn write_raw(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.x.to_le_bytes());
        out[2..4].copy_from_slice(&self.y.to_le_bytes());
        out[4..6].copy_from_slice(&self.z.to_le_bytes());
    }

    fn write_wire(&self, out: &mut [u8]) {
        self.write_raw(out);
    }

    fn min_max(self, other: Self, is_max: bool) -> Self {
        let pick = |a: i16, b: i16| if is_max { a.max(b) } else { a.min(b) };
        Self {
            x: pick(self.x, other.x),
            y: pick(self.y, other.y),
            z: pick(self.z, other.z),
        }
    }
}

/// Shared `reduce_min_max` body for drivers backed by a [`SensorReadings`] type.
pub(crate) fn reduce_readings<R: SensorReadings>(is_max: bool, a: &[u8], b: &[u8], out: &mut [u8]) {
    if a.len() < R::RAW_SIZE || b.len() < R::RAW_SIZE || out.len() < R::RAW_SIZE {
        return;
    }

    R::from_raw(a)
        .min_max(R::from_raw(b), is_max)
        .write_raw(out);
}

/// Shared `serialize_wire` body for drivers backed by a [`SensorReadings`] type.
pub(crate) fn serialize_readings<R: SensorReadings>(out: &mut [u8], raw: &[u8]) -> usize {
    if raw.len() < R::RAW_SIZE || out.len() < R::WIRE_SIZE {
        return 0;
    }

    R::from_raw(raw).write_wire(out);
    R::WIRE_SIZE
}

/// Commit `readings` to the caller's sample buffer.
pub(crate) fn emit_readings<R: SensorReadings>(
    sensor: &'static str,
    readings: &R,
    out: &mut [u8],
) -> Result<usize, SensorError> {
    if out.len() < R::RAW_SIZE {
        return Err(SensorError::BufferTooSmall {
            sensor,
            needed: R::RAW_SIZE,
        });
    }

    readings.write_raw(out);
    Ok(R::RAW_SIZE)
}
