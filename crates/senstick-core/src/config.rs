//! Per-sensor settings and their persisted form
//!
//! A [`SensorSetting`] travels in two encodings: the fixed 4-byte blob used on
//! the configuration characteristic, and a postcard-encoded
//! [`ControllerConfig`] holding every sensor's setting for persistence.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::sensors::descriptor::SensorDescriptor;
use crate::sensors::{SENSOR_COUNT, SensorType};
use crate::storage::StorageError;

/// Upper bound for any sensor's sampling period.
pub const MAX_SAMPLING_PERIOD_MS: u16 = 60_000;

/// Size of the setting blob on the configuration characteristic.
pub const SETTING_BLOB_SIZE: usize = 4;

/// Whether a sensor runs, and whether it takes part in logging.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SensorStatus {
    Stopping = 0,
    SensingAndLogging = 1,
    Sensing = 2,
}

impl SensorStatus {
    pub const fn is_running(self) -> bool {
        !matches!(self, Self::Stopping)
    }
}

impl TryFrom<u8> for SensorStatus {
    type Error = SettingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Stopping),
            1 => Ok(Self::SensingAndLogging),
            2 => Ok(Self::Sensing),
            other => Err(SettingError::InvalidStatus(other)),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingError {
    #[error("payload is {length} bytes, expected {expected}")]
    InvalidLength { length: usize, expected: usize },
    #[error("unknown sensor status {0}")]
    InvalidStatus(u8),
    #[error("sampling period {period_ms} ms outside {min_ms}..={max_ms} ms for {sensor}")]
    PeriodOutOfRange {
        sensor: SensorType,
        period_ms: u16,
        min_ms: u16,
        max_ms: u16,
    },
    #[error("range code {range} is not supported by {sensor}")]
    RangeOutOfRange { sensor: SensorType, range: u8 },
    #[error("{sensor} settings are locked while its log session is active")]
    SessionActive { sensor: SensorType },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to encode configuration: {0:?}")]
    Encode(postcard::Error),
    #[error("failed to decode configuration: {0:?}")]
    Decode(postcard::Error),
    #[error("invalid setting for {sensor}: {error}")]
    Invalid {
        sensor: SensorType,
        error: SettingError,
    },
    #[error("config storage failed: {0}")]
    Storage(StorageError),
}

/// Runtime configuration of one sensor.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSetting {
    pub status: SensorStatus,
    /// Minimum interval between the starts of two sample cycles.
    pub sampling_period_ms: u16,
    /// Driver-specific measurement range code.
    pub range: u8,
}

impl SensorSetting {
    /// The boot-time setting for a sensor.
    pub const fn default_for(descriptor: &SensorDescriptor) -> Self {
        Self {
            status: SensorStatus::SensingAndLogging,
            sampling_period_ms: descriptor.default_period_ms,
            range: 0,
        }
    }

    /// Parse the characteristic blob `[status][period lo][period hi][range]`.
    ///
    /// Only the encoding is checked here, see [`SensorSetting::validate`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SettingError> {
        if bytes.len() != SETTING_BLOB_SIZE {
            return Err(SettingError::InvalidLength {
                length: bytes.len(),
                expected: SETTING_BLOB_SIZE,
            });
        }

        Ok(Self {
            status: SensorStatus::try_from(bytes[0])?,
            sampling_period_ms: u16::from_le_bytes([bytes[1], bytes[2]]),
            range: bytes[3],
        })
    }

    /// Write the characteristic blob. Returns the number of bytes written,
    /// or 0 if `out` is too small.
    pub fn write_bytes(&self, out: &mut [u8]) -> usize {
        if out.len() < SETTING_BLOB_SIZE {
            return 0;
        }

        out[0] = self.status as u8;
        out[1..3].copy_from_slice(&self.sampling_period_ms.to_le_bytes());
        out[3] = self.range;
        SETTING_BLOB_SIZE
    }

    /// Check the values against the sensor's limits.
    pub fn validate(&self, descriptor: &SensorDescriptor) -> Result<(), SettingError> {
        let period = self.sampling_period_ms;
        if period < descriptor.min_period_ms || period > MAX_SAMPLING_PERIOD_MS {
            return Err(SettingError::PeriodOutOfRange {
                sensor: descriptor.sensor,
                period_ms: period,
                min_ms: descriptor.min_period_ms,
                max_ms: MAX_SAMPLING_PERIOD_MS,
            });
        }

        if self.range >= descriptor.range_count {
            return Err(SettingError::RangeOutOfRange {
                sensor: descriptor.sensor,
                range: self.range,
            });
        }

        Ok(())
    }
}

/// Every sensor's setting, in [`SensorType::ALL`] order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub settings: [SensorSetting; SENSOR_COUNT],
}

impl ControllerConfig {
    pub fn setting(&self, sensor: SensorType) -> &SensorSetting {
        &self.settings[sensor.index()]
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(ConfigError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        postcard::from_bytes(bytes).map_err(ConfigError::Decode)
    }
}
