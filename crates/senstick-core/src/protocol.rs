//! GATT sensor service over the controller
//!
//! Maps the per-sensor characteristics onto controller calls. The radio stack
//! itself stays outside: it forwards reads, writes and CCCD changes here and
//! hands in a [`GattNotifier`] to push notifications.

use embedded_storage::nor_flash::NorFlash;
use log::{debug, warn};
use thiserror_no_std::Error;

use crate::bus::SensorBus;
use crate::config::SettingError;
use crate::controller::SensorController;
use crate::sensors::{MAX_WIRE_SAMPLE_SIZE, SENSOR_COUNT, SensorType};

/// Largest notification payload with the default ATT MTU.
pub const MAX_NOTIFY_PAYLOAD: usize = 20;

/// Size of the period characteristic value.
pub const PERIOD_BLOB_SIZE: usize = 2;

/// Characteristics every sensor exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Characteristic {
    /// Latest wire sample. Read, notify.
    Value,
    /// Setting blob. Read, write.
    Configuration,
    /// Sampling period alone. Read, write.
    Period,
    /// Log read-out selection. Read, write.
    LogId,
    /// Logged wire samples. Read, notify.
    LogData,
    /// Session summary. Read.
    MetaData,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{characteristic:?} is not writable")]
    NotWritable { characteristic: Characteristic },
    #[error("{characteristic:?} does not support notifications")]
    NotNotifiable { characteristic: Characteristic },
    #[error("rejected write: {0}")]
    Rejected(SettingError),
    #[error("notification could not be queued")]
    NotifyFailed,
}

/// Outgoing half of the radio stack.
pub trait GattNotifier {
    fn notify(
        &mut self,
        sensor: SensorType,
        characteristic: Characteristic,
        value: &[u8],
    ) -> Result<(), ProtocolError>;
}

/// Per-connection subscription state of the sensor service.
#[derive(Debug, Default)]
pub struct SensorService {
    log_data_subscribed: [bool; SENSOR_COUNT],
}

impl SensorService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_write<B: SensorBus, F: NorFlash>(
        &mut self,
        controller: &mut SensorController<B, F>,
        sensor: SensorType,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<(), ProtocolError> {
        debug!("{} {:?} write of {} bytes", sensor, characteristic, data.len());

        let result = match characteristic {
            Characteristic::Configuration => controller.set_setting(sensor, data),
            Characteristic::Period => match data {
                [lo, hi] => controller.set_sampling_period(sensor, u16::from_le_bytes([*lo, *hi])),
                _ => Err(SettingError::InvalidLength {
                    length: data.len(),
                    expected: PERIOD_BLOB_SIZE,
                }),
            },
            Characteristic::LogId => controller.write_log_id(sensor, data),
            Characteristic::Value | Characteristic::LogData | Characteristic::MetaData => {
                return Err(ProtocolError::NotWritable { characteristic });
            }
        };

        result.map_err(|e| {
            warn!("{} {:?} write rejected: {}", sensor, characteristic, e);
            ProtocolError::Rejected(e)
        })?;

        // Accepted settings outlive a reset; a failed save keeps the write.
        if matches!(characteristic, Characteristic::Configuration | Characteristic::Period) {
            if let Err(e) = controller.save_config() {
                warn!("{} setting applied but not persisted: {}", sensor, e);
            }
        }
        Ok(())
    }

    /// Fill `out` with the characteristic value. Returns the value length.
    pub fn on_read<B: SensorBus, F: NorFlash>(
        &mut self,
        controller: &mut SensorController<B, F>,
        sensor: SensorType,
        characteristic: Characteristic,
        out: &mut [u8],
    ) -> usize {
        match characteristic {
            Characteristic::Value => controller.read_latest(sensor, out),
            Characteristic::Configuration => controller.read_setting(sensor, out),
            Characteristic::Period => {
                if out.len() < PERIOD_BLOB_SIZE {
                    return 0;
                }
                let period = controller.state(sensor).setting.sampling_period_ms;
                out[..PERIOD_BLOB_SIZE].copy_from_slice(&period.to_le_bytes());
                PERIOD_BLOB_SIZE
            }
            Characteristic::LogId => controller
                .state(sensor)
                .log_cursor
                .map_or(0, |cursor| cursor.write_bytes(out)),
            Characteristic::LogData => controller.read_log_data(sensor, out),
            Characteristic::MetaData => controller.read_metadata(sensor, out),
        }
    }

    pub fn set_cccd<B: SensorBus, F: NorFlash>(
        &mut self,
        controller: &mut SensorController<B, F>,
        sensor: SensorType,
        characteristic: Characteristic,
        enabled: bool,
    ) -> Result<(), ProtocolError> {
        match characteristic {
            Characteristic::Value => controller.set_notifying(sensor, enabled),
            Characteristic::LogData => self.log_data_subscribed[sensor.index()] = enabled,
            _ => return Err(ProtocolError::NotNotifiable { characteristic }),
        }
        debug!("{} {:?} notifications {}", sensor, characteristic, enabled);
        Ok(())
    }

    /// Subscriptions do not outlive the connection.
    pub fn on_disconnect<B: SensorBus, F: NorFlash>(
        &mut self,
        controller: &mut SensorController<B, F>,
    ) {
        for sensor in SensorType::ALL {
            controller.set_notifying(sensor, false);
        }
        self.log_data_subscribed = [false; SENSOR_COUNT];
    }

    /// Push pending live values and one log data chunk per subscribed
    /// sensor. Returns the number of notifications sent.
    pub fn poll_notifications<B: SensorBus, F: NorFlash>(
        &mut self,
        controller: &mut SensorController<B, F>,
        notifier: &mut dyn GattNotifier,
    ) -> Result<usize, ProtocolError> {
        let mut sent = 0;

        for sensor in SensorType::ALL {
            let mut value = [0u8; MAX_WIRE_SAMPLE_SIZE];
            let length = controller.take_notification(sensor, &mut value);
            if length > 0 {
                notifier.notify(sensor, Characteristic::Value, &value[..length])?;
                sent += 1;
            }

            if self.log_data_subscribed[sensor.index()] {
                let mut chunk = [0u8; MAX_NOTIFY_PAYLOAD];
                let length = controller.read_log_data(sensor, &mut chunk);
                if length > 0 {
                    notifier.notify(sensor, Characteristic::LogData, &chunk[..length])?;
                    sent += 1;
                }
            }
        }

        Ok(sent)
    }
}
