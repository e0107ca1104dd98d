// cSpell: disable
use log::{error, info, trace, warn};

use super::conversion::{CONVERSION_TIMEOUT_FACTOR, ConversionCycle, ConversionStep};
use super::mpu9250::MPU9250_ADDRESS;
use super::{AxisReadings, SensorDriver, SensorError, SensorType};
use crate::bus::{BusError, SensorBus};
use crate::config::SensorSetting;

const SENSOR_NAME: &str = "AK8963";

pub const AK8963_ADDRESS: u8 = 0x0c;

const REG_WIA: u8 = 0x00;
const REG_ST1: u8 = 0x02;
const REG_HXL: u8 = 0x03;
const REG_CNTL1: u8 = 0x0a;

/// The magnetometer is only reachable once the MPU-9250 bypass mux is open.
const MPU_REG_INT_PIN_CFG: u8 = 0x37;
const MPU_BYPASS_ENABLE: u8 = 0x02;

const WIA_VALUE: u8 = 0x48;
const ST1_DATA_READY: u8 = 0x01;
const ST2_OVERFLOW: u8 = 0x08;
/// 16-bit output, single measurement.
const CNTL1_SINGLE_16BIT: u8 = 0x11;
const CNTL1_POWER_DOWN: u8 = 0x00;

pub const MAGNETIC_CONVERSION_DELAY_MS: u32 = 10;

pub struct AK8963Sensor {
    cycle: ConversionCycle,
}

impl AK8963Sensor {
    pub fn new() -> Self {
        Self {
            cycle: ConversionCycle::new(MAGNETIC_CONVERSION_DELAY_MS),
        }
    }

    fn map_bus(operation: &'static str) -> impl FnOnce(BusError) -> SensorError {
        move |e| {
            error!("AK8963 failed to {}: {}", operation, e);
            SensorError::Bus {
                sensor: SENSOR_NAME,
                operation,
                error: e,
            }
        }
    }

    /// Returns `None` while the chip has not flagged data ready, or when the
    /// measurement overflowed and has to be thrown away. A conversion that
    /// never becomes ready fails with `ConversionTimeout`.
    fn read_field(&mut self, bus: &mut dyn SensorBus) -> Result<Option<AxisReadings>, SensorError> {
        let mut st1 = [0u8; 1];
        bus.read_register(AK8963_ADDRESS, REG_ST1, &mut st1)
            .map_err(Self::map_bus("read ST1"))?;

        if st1[0] & ST1_DATA_READY == 0 {
            if !self.cycle.extend() {
                error!("AK8963: data never became ready, measurement lost");
                return Err(SensorError::ConversionTimeout {
                    sensor: SENSOR_NAME,
                    timeout_ms: MAGNETIC_CONVERSION_DELAY_MS * CONVERSION_TIMEOUT_FACTOR,
                });
            }
            trace!("AK8963: conversion not finished yet");
            return Ok(None);
        }

        // Six data bytes then ST2; reading ST2 releases the data registers.
        let mut buffer = [0u8; 7];
        bus.read_register(AK8963_ADDRESS, REG_HXL, &mut buffer)
            .map_err(Self::map_bus("read field data"))?;

        if buffer[6] & ST2_OVERFLOW != 0 {
            warn!("AK8963: magnetic sensor overflow, sample discarded");
            return Ok(None);
        }

        Ok(Some(AxisReadings::from_le_bytes(&buffer[..6])))
    }
}

impl Default for AK8963Sensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorDriver for AK8963Sensor {
    fn sensor_type(&self) -> SensorType {
        SensorType::Magnetometer
    }

    fn init(&mut self, bus: &mut dyn SensorBus) -> Result<(), SensorError> {
        self.cycle.reset();

        bus.write_register(MPU9250_ADDRESS, MPU_REG_INT_PIN_CFG, &[MPU_BYPASS_ENABLE])
            .map_err(Self::map_bus("enable MPU-9250 bypass"))?;

        let mut wia = [0u8; 1];
        bus.read_register(AK8963_ADDRESS, REG_WIA, &mut wia)
            .map_err(Self::map_bus("read WIA"))?;
        if wia[0] != WIA_VALUE {
            error!("AK8963: unexpected WIA 0x{:02x}", wia[0]);
            return Err(SensorError::InitializationFailed {
                sensor: SENSOR_NAME,
                details: "WIA does not identify an AK8963",
            });
        }

        bus.write_register(AK8963_ADDRESS, REG_CNTL1, &[CNTL1_POWER_DOWN])
            .map_err(Self::map_bus("power down"))?;

        info!("AK8963: initialized");
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
            bus.write_register(AK8963_ADDRESS, REG_CNTL1, &[CNTL1_POWER_DOWN])
                .map_err(Self::map_bus("power down"))
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
                bus.write_register(AK8963_ADDRESS, REG_CNTL1, &[CNTL1_SINGLE_16BIT])
                    .map_err(Self::map_bus("trigger measurement"))
                    .inspect_err(|_| self.cycle.fault())?;
                Ok(0)
            }
            ConversionStep::Wait => Ok(0),
            ConversionStep::Read => match self.read_field(bus) {
                Ok(Some(readings)) => super::emit_readings(SENSOR_NAME, &readings, out),
                Ok(None) => Ok(0),
                Err(e) => {
                    self.cycle.fault();
                    Err(e)
                }
            },
        }
    }

    fn reduce_min_max(&self, is_max: bool, a: &[u8], b: &[u8], out: &mut [u8]) {
        super::reduce_readings::<AxisReadings>(is_max, a, b, out);
    }

    fn serialize_wire(&self, out: &mut [u8], raw: &[u8]) -> usize {
        super::serialize_readings::<AxisReadings>(out, raw)
    }
}
