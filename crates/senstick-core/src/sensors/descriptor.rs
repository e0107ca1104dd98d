//! Static per-sensor metadata pairing each driver with its flash region

use super::{SENSOR_COUNT, SensorReadings, SensorType};
use crate::sensors::{AxisReadings, bh1780, lps25hb, sht20};
use crate::storage::layout::*;

/// One sensor's address range in flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageBounds {
    pub start_address: u32,
    pub length: u32,
}

impl StorageBounds {
    pub const fn new(start_address: u32, length: u32) -> Self {
        Self {
            start_address,
            length,
        }
    }

    /// First address past the region.
    pub const fn end_address(&self) -> u32 {
        self.start_address + self.length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorDescriptor {
    pub sensor: SensorType,
    /// Bytes of the driver's native sample.
    pub raw_sample_size: usize,
    /// Bytes of the sample after wire serialization.
    pub wire_sample_size: usize,
    pub storage: StorageBounds,
    pub default_period_ms: u16,
    pub min_period_ms: u16,
    /// Number of valid range codes; `range` must be below this.
    pub range_count: u8,
}

impl SensorDescriptor {
    /// Number of whole samples the region can hold.
    pub const fn capacity(&self) -> u32 {
        self.storage.length / self.raw_sample_size as u32
    }
}

/// Descriptors indexed by [`SensorType::index`].
pub type DescriptorTable = [SensorDescriptor; SENSOR_COUNT];

pub const DESCRIPTORS: DescriptorTable = [
    SensorDescriptor {
        sensor: SensorType::Accelerometer,
        raw_sample_size: AxisReadings::RAW_SIZE,
        wire_sample_size: AxisReadings::WIRE_SIZE,
        storage: StorageBounds::new(
            ACCELERATION_SENSOR_STORAGE_START_ADDRESS,
            ACCELERATION_SENSOR_STORAGE_SIZE,
        ),
        default_period_ms: 100,
        min_period_ms: 10,
        range_count: 4,
    },
    SensorDescriptor {
        sensor: SensorType::Gyroscope,
        raw_sample_size: AxisReadings::RAW_SIZE,
        wire_sample_size: AxisReadings::WIRE_SIZE,
        storage: StorageBounds::new(GYRO_SENSOR_STORAGE_START_ADDRESS, GYRO_SENSOR_STORAGE_SIZE),
        default_period_ms: 100,
        min_period_ms: 10,
        range_count: 4,
    },
    SensorDescriptor {
        sensor: SensorType::Magnetometer,
        raw_sample_size: AxisReadings::RAW_SIZE,
        wire_sample_size: AxisReadings::WIRE_SIZE,
        storage: StorageBounds::new(
            MAGNETIC_SENSOR_STORAGE_START_ADDRESS,
            MAGNETIC_SENSOR_STORAGE_SIZE,
        ),
        default_period_ms: 100,
        min_period_ms: 20,
        range_count: 1,
    },
    SensorDescriptor {
        sensor: SensorType::Humidity,
        raw_sample_size: sht20::HumidityReadings::RAW_SIZE,
        wire_sample_size: sht20::HumidityReadings::WIRE_SIZE,
        storage: StorageBounds::new(
            HUMIDITY_SENSOR_STORAGE_START_ADDRESS,
            HUMIDITY_SENSOR_STORAGE_SIZE,
        ),
        default_period_ms: 1000,
        min_period_ms: 100,
        range_count: 1,
    },
    SensorDescriptor {
        sensor: SensorType::Pressure,
        raw_sample_size: lps25hb::AirPressureReadings::RAW_SIZE,
        wire_sample_size: lps25hb::AirPressureReadings::WIRE_SIZE,
        storage: StorageBounds::new(
            PRESSURE_SENSOR_STORAGE_START_ADDRESS,
            PRESSURE_SENSOR_STORAGE_SIZE,
        ),
        default_period_ms: 1000,
        min_period_ms: 100,
        range_count: 1,
    },
    SensorDescriptor {
        sensor: SensorType::Brightness,
        raw_sample_size: bh1780::BrightnessReadings::RAW_SIZE,
        wire_sample_size: bh1780::BrightnessReadings::WIRE_SIZE,
        storage: StorageBounds::new(
            BRIGHTNESS_SENSOR_STORAGE_START_ADDRESS,
            BRIGHTNESS_SENSOR_STORAGE_SIZE,
        ),
        default_period_ms: 1000,
        min_period_ms: 200,
        range_count: 1,
    },
];
