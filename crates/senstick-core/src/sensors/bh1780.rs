// cSpell: disable
use log::{error, info, warn};

use super::conversion::{ConversionCycle, ConversionStep};
use super::{SensorDriver, SensorError, SensorReadings, SensorType};
use crate::bus::SensorBus;
use crate::config::SensorSetting;

const SENSOR_NAME: &str = "BH1780";

pub const BH1780_ADDRESS: u8 = 0x29;

/// Every register access goes through the command byte.
const COMMAND: u8 = 0x80;
const REG_CONTROL: u8 = 0x00;
const REG_PART_ID: u8 = 0x0a;
const REG_DATA_LOW: u8 = 0x0c;

const POWER_ON: u8 = 0x03;
const POWER_OFF: u8 = 0x00;
const PART_ID_MASK: u8 = 0xf0;
const PART_ID_VALUE: u8 = 0x80;

/// Integration time of one measurement after power-on.
pub const BRIGHTNESS_CONVERSION_DELAY_MS: u32 = 150;

/// Illuminance in lux, straight from the 16-bit data register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrightnessReadings {
    pub lux: u16,
}

impl SensorReadings for BrightnessReadings {
    const RAW_SIZE: usize = 2;
    const WIRE_SIZE: usize = 2;

    fn from_raw(raw: &[u8]) -> Self {
        Self {
            lux: u16::from_le_bytes([raw[0], raw[1]]),
        }
    }

    fn write_raw(&self, out: &mut [u8]) {
        out[..2].copy_from_slice(&self.lux.to_le_bytes());
    }

    fn write_wire(&self, out: &mut [u8]) {
        self.write_raw(out);
    }

    fn min_max(self, other: Self, is_max: bool) -> Self {
        let lux = if is_max {
            self.lux.max(other.lux)
        } else {
            self.lux.min(other.lux)
        };
        Self { lux }
    }
}

/// Ambient light sensor, powered only for the duration of each conversion.
pub struct BH1780Sensor {
    cycle: ConversionCycle,
}

impl BH1780Sensor {
    pub fn new() -> Self {
        Self {
            cycle: ConversionCycle::new(BRIGHTNESS_CONVERSION_DELAY_MS),
        }
    }

    fn write_control(
        &mut self,
        bus: &mut dyn SensorBus,
        value: u8,
        operation: &'static str,
    ) -> Result<(), SensorError> {
        bus.write_register(BH1780_ADDRESS, COMMAND | REG_CONTROL, &[value])
            .map_err(|e| {
                error!("BH1780 failed to {}: {}", operation, e);
                SensorError::Bus {
                    sensor: SENSOR_NAME,
                    operation,
                    error: e,
                }
            })
    }

    fn read_lux(&mut self, bus: &mut dyn SensorBus) -> Result<BrightnessReadings, SensorError> {
        let mut buffer = [0u8; 2];
        bus.read_register(BH1780_ADDRESS, COMMAND | REG_DATA_LOW, &mut buffer)
            .map_err(|e| {
                error!("BH1780 data read failed: {}", e);
                SensorError::Bus {
                    sensor: SENSOR_NAME,
                    operation: "read illuminance",
                    error: e,
                }
            })?;

        Ok(BrightnessReadings {
            lux: u16::from_le_bytes(buffer),
        })
    }
}

impl Default for BH1780Sensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorDriver for BH1780Sensor {
    fn sensor_type(&self) -> SensorType {
        SensorType::Brightness
    }

    fn init(&mut self, bus: &mut dyn SensorBus) -> Result<(), SensorError> {
        self.cycle.reset();

        let mut part_id = [0u8; 1];
        bus.read_register(BH1780_ADDRESS, COMMAND | REG_PART_ID, &mut part_id)
            .map_err(|e| {
                error!("BH1780 part id read failed: {}", e);
                SensorError::Bus {
                    sensor: SENSOR_NAME,
                    operation: "read part id",
                    error: e,
                }
            })?;

        if part_id[0] & PART_ID_MASK != PART_ID_VALUE {
            error!("BH1780: unexpected part id 0x{:02x}", part_id[0]);
            return Err(SensorError::InitializationFailed {
                sensor: SENSOR_NAME,
                details: "part id does not identify a BH1780",
            });
        }

        self.write_control(bus, POWER_OFF, "power down")?;
        info!("BH1780: initialized");
        Ok(())
    }

    fn set_wakeup(
        &mut self,
        bus: &mut dyn SensorBus,
        should_wake: bool,
        _setting: &SensorSetting,
    ) -> Result<(), SensorError> {
        if should_wake {
            self.init(bus)
        } else {
            self.cycle.reset();
            self.write_control(bus, POWER_OFF, "power down")
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
                self.write_control(bus, POWER_ON, "start measurement")
                    .inspect_err(|_| self.cycle.fault())?;
                Ok(0)
            }
            ConversionStep::Wait => Ok(0),
            ConversionStep::Read => {
                let readings = self.read_lux(bus).inspect_err(|_| self.cycle.fault())?;
                // Drop back to power-down between measurements. A failure here
                // does not invalidate the reading.
                if let Err(e) = self.write_control(bus, POWER_OFF, "power down") {
                    warn!("BH1780 left powered after a reading: {}", e);
                }
                super::emit_readings(SENSOR_NAME, &readings, out)
            }
        }
    }

    fn reduce_min_max(&self, is_max: bool, a: &[u8], b: &[u8], out: &mut [u8]) {
        super::reduce_readings::<BrightnessReadings>(is_max, a, b, out);
    }

    fn serialize_wire(&self, out: &mut [u8], raw: &[u8]) -> usize {
        super::serialize_readings::<BrightnessReadings>(out, raw)
    }
}
