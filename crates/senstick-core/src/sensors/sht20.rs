// cSpell: disable
//! SHT20 humidity and temperature sensor
//!
//! Measurements use hold-master mode: the chip stretches the clock until the
//! conversion is done, so a sample is available on every call. Each 16-bit
//! result is followed by a CRC-8 byte which is checked before the value is
//! accepted.

use log::{error, info, warn};

use super::{SensorDriver, SensorError, SensorReadings, SensorType};
use crate::bus::SensorBus;
use crate::config::SensorSetting;

const SENSOR_NAME: &str = "SHT20";

pub const SHT20_ADDRESS: u8 = 0x40;

const CMD_MEASURE_HUMIDITY_HOLD: u8 = 0xe5;
const CMD_MEASURE_TEMPERATURE_HOLD: u8 = 0xe3;
const CMD_WRITE_USER_REGISTER: u8 = 0xe6;
const CMD_READ_USER_REGISTER: u8 = 0xe7;
const CMD_SOFT_RESET: u8 = 0xfe;

const SOFT_RESET_DELAY_MS: u32 = 15;

const USER_REGISTER_RESOLUTION_MASK: u8 = 0x81;
const USER_REGISTER_HEATER: u8 = 0x04;
const USER_REGISTER_DISABLE_OTP_RELOAD: u8 = 0x02;

/// Low two bits of every result are status bits.
const STATUS_BITS_MASK: u16 = 0xfffc;

/// Measurement resolution, encoded as user register bits 7 and 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Sht20Resolution {
    Rh12T14 = 0x00,
    Rh8T12 = 0x01,
    Rh10T13 = 0x80,
    /// Shortest combined conversion time.
    #[default]
    Rh11T11 = 0x81,
}

/// CRC-8 as used by Sensirion: polynomial 0x31, initial value 0.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Raw humidity and temperature words with the status bits cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HumidityReadings {
    pub humidity_raw: u16,
    pub temperature_raw: u16,
}

impl HumidityReadings {
    /// Relative humidity in thousandths of a percent.
    pub fn humidity_milli_percent(&self) -> i32 {
        -6_000 + ((125_000i64 * self.humidity_raw as i64) >> 16) as i32
    }

    /// Temperature in thousandths of a degree Celsius.
    pub fn temperature_milli_celsius(&self) -> i32 {
        -46_850 + ((175_720i64 * self.temperature_raw as i64) >> 16) as i32
    }
}

impl SensorReadings for HumidityReadings {
    const RAW_SIZE: usize = 4;
    const WIRE_SIZE: usize = 4;

    fn from_raw(raw: &[u8]) -> Self {
        Self {
            humidity_raw: u16::from_le_bytes([raw[0], raw[1]]),
            temperature_raw: u16::from_le_bytes([raw[2], raw[3]]),
        }
    }

    fn write_raw(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.humidity_raw.to_le_bytes());
        out[2..4].copy_from_slice(&self.temperature_raw.to_le_bytes());
    }

    fn write_wire(&self, out: &mut [u8]) {
        self.write_raw(out);
    }

    fn min_max(self, other: Self, is_max: bool) -> Self {
        let pick = |a: u16, b: u16| if is_max { a.max(b) } else { a.min(b) };
        Self {
            humidity_raw: pick(self.humidity_raw, other.humidity_raw),
            temperature_raw: pick(self.temperature_raw, other.temperature_raw),
        }
    }
}

pub struct SHT20Sensor {
    resolution: Sht20Resolution,
}

impl SHT20Sensor {
    pub fn new() -> Self {
        Self::with_resolution(Sht20Resolution::default())
    }

    pub fn with_resolution(resolution: Sht20Resolution) -> Self {
        Self { resolution }
    }

    fn measure(&self, bus: &mut dyn SensorBus, command: u8) -> Result<u16, SensorError> {
        let mut buffer = [0u8; 3];
        bus.read_register(SHT20_ADDRESS, command, &mut buffer)
            .map_err(|e| {
                error!("SHT20 measurement 0x{:02x} failed: {}", command, e);
                SensorError::Bus {
                    sensor: SENSOR_NAME,
                    operation: "measure",
                    error: e,
                }
            })?;

        if crc8(&buffer[..2]) != buffer[2] {
            warn!(
                "SHT20: checksum mismatch on 0x{:02x} (got 0x{:02x})",
                command, buffer[2]
            );
            return Err(SensorError::ChecksumMismatch {
                sensor: SENSOR_NAME,
            });
        }

        Ok(u16::from_be_bytes([buffer[0], buffer[1]]) & STATUS_BITS_MASK)
    }
}

impl Default for SHT20Sensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorDriver for SHT20Sensor {
    fn sensor_type(&self) -> SensorType {
        SensorType::Humidity
    }

    fn init(&mut self, bus: &mut dyn SensorBus) -> Result<(), SensorError> {
        bus.write_register(SHT20_ADDRESS, CMD_SOFT_RESET, &[])
            .map_err(|e| {
                error!("SHT20 soft reset failed: {}", e);
                SensorError::InitializationFailed {
                    sensor: SENSOR_NAME,
                    details: "soft reset was not acknowledged",
                }
            })?;
        bus.delay_ms(SOFT_RESET_DELAY_MS);

        let mut user_register = [0u8; 1];
        bus.read_register(SHT20_ADDRESS, CMD_READ_USER_REGISTER, &mut user_register)
            .map_err(|e| {
                error!("SHT20 user register read failed: {}", e);
                SensorError::Bus {
                    sensor: SENSOR_NAME,
                    operation: "read user register",
                    error: e,
                }
            })?;

        let value = ((user_register[0] & !USER_REGISTER_RESOLUTION_MASK) | self.resolution as u8)
            & !USER_REGISTER_HEATER
            | USER_REGISTER_DISABLE_OTP_RELOAD;

        bus.write_register(SHT20_ADDRESS, CMD_WRITE_USER_REGISTER, &[value])
            .map_err(|e| {
                error!("SHT20 user register write failed: {}", e);
                SensorError::Bus {
                    sensor: SENSOR_NAME,
                    operation: "write user register",
                    error: e,
                }
            })?;

        info!("SHT20: initialized with {:?}", self.resolution);
        Ok(())
    }

    /// The chip idles in sleep between hold-master measurements; waking only
    /// needs the register setup.
    fn set_wakeup(
        &mut self,
        bus: &mut dyn SensorBus,
        should_wake: bool,
        _setting: &SensorSetting,
    ) -> Result<(), SensorError> {
        if should_wake { self.init(bus) } else { Ok(()) }
    }

    fn sample(
        &mut self,
        bus: &mut dyn SensorBus,
        out: &mut [u8],
        _elapsed_ms: u32,
    ) -> Result<usize, SensorError> {
        let readings = HumidityReadings {
            humidity_raw: self.measure(bus, CMD_MEASURE_HUMIDITY_HOLD)?,
            temperature_raw: self.measure(bus, CMD_MEASURE_TEMPERATURE_HOLD)?,
        };
        super::emit_readings(SENSOR_NAME, &readings, out)
    }

    fn reduce_min_max(&self, is_max: bool, a: &[u8], b: &[u8], out: &mut [u8]) {
        super::reduce_readings::<HumidityReadings>(is_max, a, b, out);
    }

    fn serialize_wire(&self, out: &mut [u8], raw: &[u8]) -> usize {
        super::serialize_readings::<HumidityReadings>(out, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBus;
    use alloc::vec;

    fn chip() -> FakeBus {
        let mut bus = FakeBus::powered();
        bus.load(SHT20_ADDRESS, CMD_READ_USER_REGISTER, &[0x3e]);
        bus.load(SHT20_ADDRESS, CMD_MEASURE_HUMIDITY_HOLD, &[0x68, 0x3a, 0x7c]);
        bus.load(SHT20_ADDRESS, CMD_MEASURE_TEMPERATURE_HOLD, &[0x4e, 0x85, 0x6b]);
        bus
    }

    #[test]
    fn test_crc8_vectors() {
        assert_eq!(crc8(&[0xdc]), 0x79);
        assert_eq!(crc8(&[0x68, 0x3a]), 0x7c);
        assert_eq!(crc8(&[0x4e, 0x85]), 0x6b);
    }

    #[test]
    fn test_init_programs_user_register() {
        let mut bus = chip();
        let mut sensor = SHT20Sensor::new();
        sensor.init(&mut bus).unwrap();

        assert_eq!(bus.written(SHT20_ADDRESS, CMD_SOFT_RESET), vec![vec![]]);
        // 0x3e: resolution bits replaced by 0x81, heater cleared, OTP reload off.
        assert_eq!(
            bus.last_write(SHT20_ADDRESS, CMD_WRITE_USER_REGISTER),
            Some(vec![0xbb])
        );
    }

    #[test]
    fn test_sample_masks_status_bits() {
        let mut bus = chip();
        let mut sensor = SHT20Sensor::new();
        sensor.init(&mut bus).unwrap();
        let mut out = [0u8; 4];

        assert_eq!(sensor.sample(&mut bus, &mut out, 0).unwrap(), 4);
        let readings = HumidityReadings::from_raw(&out);
        assert_eq!(readings.humidity_raw, 0x6838);
        assert_eq!(readings.temperature_raw, 0x4e84);
        assert_eq!(readings.humidity_milli_percent(), 44_888);
        assert_eq!(readings.temperature_milli_celsius(), 7_043);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut bus = chip();
        bus.load(SHT20_ADDRESS, CMD_MEASURE_HUMIDITY_HOLD, &[0x68, 0x3a, 0x00]);
        let mut sensor = SHT20Sensor::new();
        let mut out = [0u8; 4];

        assert_eq!(
            sensor.sample(&mut bus, &mut out, 0),
            Err(SensorError::ChecksumMismatch {
                sensor: SENSOR_NAME
            })
        );
    }

    #[test]
    fn test_resolution_override() {
        let mut bus = chip();
        let mut sensor = SHT20Sensor::with_resolution(Sht20Resolution::Rh12T14);
        sensor.init(&mut bus).unwrap();

        assert_eq!(
            bus.last_write(SHT20_ADDRESS, CMD_WRITE_USER_REGISTER),
            Some(vec![0x3a])
        );
    }
}
