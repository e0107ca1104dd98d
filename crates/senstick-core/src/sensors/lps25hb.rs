// cSpell: disable
use log::{debug, error, info};

use super::conversion::{ConversionCycle, ConversionStep};
use super::{SensorDriver, SensorError, SensorReadings, SensorType};
use crate::bus::SensorBus;
use crate::config::SensorSetting;

const SENSOR_NAME: &str = "LPS25HB";

pub const LPS25HB_ADDRESS: u8 = 0x5c;

const REG_RES_CONF: u8 = 0x10;
const REG_WHO_AM_I: u8 = 0x0f;
const REG_CTRL_REG1: u8 = 0x20;
const REG_CTRL_REG2: u8 = 0x21;
const REG_PRESS_OUT_XL: u8 = 0x28;
/// MSB of the sub-address enables register auto-increment.
const AUTO_INCREMENT: u8 = 0x80;

const WHO_AM_I_VALUE: u8 = 0xbd;
/// Power on, one-shot mode, block data update.
const CTRL_REG1_ACTIVE: u8 = 0x84;
/// 32 pressure / 16 temperature internal averages.
const RES_CONF_VALUE: u8 = 0x05;
const CTRL_REG2_ONE_SHOT: u8 = 0x01;

/// Worst-case one-shot conversion time at the configured averaging.
pub const PRESSURE_CONVERSION_DELAY_MS: u32 = 50;

/// Raw 24-bit pressure output, 4096 LSB per hPa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AirPressureReadings {
    pub raw: u32,
}

impl AirPressureReadings {
    pub fn milli_hpa(&self) -> i32 {
        ((self.raw as u64 * 1000) / 4096) as i32
    }
}

impl SensorReadings for AirPressureReadings {
    const RAW_SIZE: usize = 4;
    const WIRE_SIZE: usize = 4;

    fn from_raw(raw: &[u8]) -> Self {
        Self {
            raw: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
        }
    }

    fn write_raw(&self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.raw.to_le_bytes());
    }

    fn write_wire(&self, out: &mut [u8]) {
        self.write_raw(out);
    }

    fn min_max(self, other: Self, is_max: bool) -> Self {
        let raw = if is_max {
            self.raw.max(other.raw)
        } else {
            self.raw.min(other.raw)
        };
        Self { raw }
    }
}

pub struct LPS25HBSensor {
    cycle: ConversionCycle,
}

impl LPS25HBSensor {
    pub fn new() -> Self {
        Self {
            cycle: ConversionCycle::new(PRESSURE_CONVERSION_DELAY_MS),
        }
    }

    fn read_pressure(&self, bus: &mut dyn SensorBus) -> Result<AirPressureReadings, SensorError> {
        let mut buffer = [0u8; 3];
        bus.read_register(
            LPS25HB_ADDRESS,
            REG_PRESS_OUT_XL | AUTO_INCREMENT,
            &mut buffer,
        )
        .map_err(|e| {
            error!("LPS25HB pressure read failed: {}", e);
            SensorError::Bus {
                sensor: SENSOR_NAME,
                operation: "read pressure output",
                error: e,
            }
        })?;

        Ok(AirPressureReadings {
            raw: u32::from_le_bytes([buffer[0], buffer[1], buffer[2], 0]),
        })
    }
}

impl Default for LPS25HBSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorDriver for LPS25HBSensor {
    fn sensor_type(&self) -> SensorType {
        SensorType::Pressure
    }

    fn init(&mut self, bus: &mut dyn SensorBus) -> Result<(), SensorError> {
        self.cycle.reset();

        let mut who_am_i = [0u8; 1];
        bus.read_register(LPS25HB_ADDRESS, REG_WHO_AM_I, &mut who_am_i)
            .map_err(|e| {
                error!("LPS25HB WHO_AM_I read failed: {}", e);
                SensorError::Bus {
                    sensor: SENSOR_NAME,
                    operation: "read WHO_AM_I",
                    error: e,
                }
            })?;

        if who_am_i[0] != WHO_AM_I_VALUE {
            error!("LPS25HB: unexpected WHO_AM_I 0x{:02x}", who_am_i[0]);
            return Err(SensorError::InitializationFailed {
                sensor: SENSOR_NAME,
                details: "WHO_AM_I does not identify an LPS25HB",
            });
        }

        bus.write_register(LPS25HB_ADDRESS, REG_RES_CONF, &[RES_CONF_VALUE])
            .and_then(|_| bus.write_register(LPS25HB_ADDRESS, REG_CTRL_REG1, &[CTRL_REG1_ACTIVE]))
            .map_err(|e| {
                error!("LPS25HB configuration failed: {}", e);
                SensorError::InitializationFailed {
                    sensor: SENSOR_NAME,
                    details: "failed to write control registers",
                }
            })?;

        info!("LPS25HB: initialized in one-shot mode");
        Ok(())
    }

    fn set_wakeup(
        &mut self,
        bus: &mut dyn SensorBus,
        should_wake: bool,
        _setting: &SensorSetting,
    ) -> Result<(), SensorError> {
        if should_wake {
            self.init(bus)?;
            // The first output after power-on reads as zero; throw it away.
            let discarded = self.read_pressure(bus)?;
            debug!("LPS25HB: discarded first reading {}", discarded.raw);
            Ok(())
        } else {
            self.cycle.reset();
            bus.write_register(LPS25HB_ADDRESS, REG_CTRL_REG1, &[0x00])
                .map_err(|e| {
                    error!("LPS25HB power down failed: {}", e);
                    SensorError::Bus {
                        sensor: SENSOR_NAME,
                        operation: "power down",
                        error: e,
                    }
                })
        }
    }

    fn sample(
        &mut self,
        bus: &mut dyn SensorBus,
        out: &mut [u8],
        elapsed_ms: u32,
    ) -> Result<usize, SensorError> {
        match self.cycle.advance(elapsed_ms) {
            ConversionStep::Trigger => {
                bus.write_register(LPS25HB_ADDRESS, REG_CTRL_REG2, &[CTRL_REG2_ONE_SHOT])
                    .map_err(|e| {
                        self.cycle.fault();
                        error!("LPS25HB one-shot trigger failed: {}", e);
                        SensorError::Bus {
                            sensor: SENSOR_NAME,
                            operation: "trigger one-shot conversion",
                            error: e,
                        }
                    })?;
                Ok(0)
            }
            ConversionStep::Wait => Ok(0),
            ConversionStep::Read => {
                let readings = self.read_pressure(bus).inspect_err(|_| self.cycle.fault())?;
                super::emit_readings(SENSOR_NAME, &readings, out)
            }
        }
    }

    fn reduce_min_max(&self, is_max: bool, a: &[u8], b: &[u8], out: &mut [u8]) {
        super::reduce_readings::<AirPressureReadings>(is_max, a, b, out);
    }

    fn serialize_wire(&self, out: &mut [u8], raw: &[u8]) -> usize {
        super::serialize_readings::<AirPressureReadings>(out, raw)
    }
}
