// cSpell: disable
//! MPU-9250 motion sensor
//!
//! The accelerometer and the gyroscope live on the same die but are logged as
//! separate sensors, so each gets its own driver. Both share the chip setup
//! in [`Mpu9250Channel`] and only differ in registers and standby bits.

use log::{debug, error, info};

use super::{AxisReadings, SensorDriver, SensorError, SensorType};
use crate::bus::SensorBus;
use crate::config::SensorSetting;

pub const MPU9250_ADDRESS: u8 = 0x68;

const REG_GYRO_CONFIG: u8 = 0x1b;
const REG_ACCEL_CONFIG: u8 = 0x1c;
const REG_ACCEL_XOUT_H: u8 = 0x3b;
const REG_GYRO_XOUT_H: u8 = 0x43;
const REG_PWR_MGMT_1: u8 = 0x6b;
const REG_PWR_MGMT_2: u8 = 0x6c;
const REG_WHO_AM_I: u8 = 0x75;

/// MPU-9250 and MPU-9255 respectively.
const WHO_AM_I_VALUES: [u8; 2] = [0x71, 0x73];
/// Auto-select the best clock source.
const PWR_MGMT_1_CLOCK_AUTO: u8 = 0x01;

const ACCEL_STANDBY_BITS: u8 = 0x38;
const GYRO_STANDBY_BITS: u8 = 0x07;

/// Full-scale select sits in bits 4:3 of both config registers.
const FULL_SCALE_SHIFT: u8 = 3;

/// Register set of one MPU-9250 measurement channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mpu9250Channel {
    name: &'static str,
    sensor: SensorType,
    config_register: u8,
    data_register: u8,
    standby_bits: u8,
}

impl Mpu9250Channel {
    pub const ACCELEROMETER: Self = Self {
        name: "MPU-9250 accelerometer",
        sensor: SensorType::Accelerometer,
        config_register: REG_ACCEL_CONFIG,
        data_register: REG_ACCEL_XOUT_H,
        standby_bits: ACCEL_STANDBY_BITS,
    };

    pub const GYROSCOPE: Self = Self {
        name: "MPU-9250 gyroscope",
        sensor: SensorType::Gyroscope,
        config_register: REG_GYRO_CONFIG,
        data_register: REG_GYRO_XOUT_H,
        standby_bits: GYRO_STANDBY_BITS,
    };

    fn bus_error(
        &self,
        operation: &'static str,
    ) -> impl FnOnce(crate::bus::BusError) -> SensorError {
        let name = self.name;
        move |e| {
            error!("{} failed to {}: {}", name, operation, e);
            SensorError::Bus {
                sensor: name,
                operation,
                error: e,
            }
        }
    }

    fn init(&self, bus: &mut dyn SensorBus) -> Result<(), SensorError> {
        let mut who_am_i = [0u8; 1];
        bus.read_register(MPU9250_ADDRESS, REG_WHO_AM_I, &mut who_am_i)
            .map_err(self.bus_error("read WHO_AM_I"))?;

        if !WHO_AM_I_VALUES.contains(&who_am_i[0]) {
            error!("{}: unexpected WHO_AM_I 0x{:02x}", self.name, who_am_i[0]);
            return Err(SensorError::InitializationFailed {
                sensor: self.name,
                details: "WHO_AM_I does not identify an MPU-9250",
            });
        }

        bus.write_register(MPU9250_ADDRESS, REG_PWR_MGMT_1, &[PWR_MGMT_1_CLOCK_AUTO])
            .map_err(self.bus_error("select clock source"))?;

        info!("{}: initialized", self.name);
        Ok(())
    }

    fn set_wakeup(
        &self,
        bus: &mut dyn SensorBus,
        should_wake: bool,
        setting: &SensorSetting,
    ) -> Result<(), SensorError> {
        if should_wake {
            bus.write_register(
                MPU9250_ADDRESS,
                self.config_register,
                &[setting.range << FULL_SCALE_SHIFT],
            )
            .map_err(self.bus_error("set full-scale range"))?;
        }

        // Standby bits are shared with the other channel; only touch ours.
        let mut pwr_mgmt_2 = [0u8; 1];
        bus.read_register(MPU9250_ADDRESS, REG_PWR_MGMT_2, &mut pwr_mgmt_2)
            .map_err(self.bus_error("read standby bits"))?;

        let value = if should_wake {
            pwr_mgmt_2[0] & !self.standby_bits
        } else {
            pwr_mgmt_2[0] | self.standby_bits
        };
        bus.write_register(MPU9250_ADDRESS, REG_PWR_MGMT_2, &[value])
            .map_err(self.bus_error("write standby bits"))?;

        debug!(
            "{}: {} (range code {})",
            self.name,
            if should_wake { "active" } else { "standby" },
            setting.range
        );
        Ok(())
    }

    fn sample(&self, bus: &mut dyn SensorBus, out: &mut [u8]) -> Result<usize, SensorError> {
        let mut buffer = [0u8; 6];
        bus.read_register(MPU9250_ADDRESS, self.data_register, &mut buffer)
            .map_err(self.bus_error("read axes"))?;

        super::emit_readings(self.name, &AxisReadings::from_be_bytes(&buffer), out)
    }
}

macro_rules! mpu9250_driver {
    ($(#[$meta:meta])* $name:ident, $channel:expr) => {
        $(#[$meta])*
        #[derive(Debug, Default)]
        pub struct $name;

        impl $name {
            pub fn new() -> Self {
                Self
            }
        }

        impl SensorDriver for $name {
            fn sensor_type(&self) -> SensorType {
                $channel.sensor
            }

            fn init(&mut self, bus: &mut dyn SensorBus) -> Result<(), SensorError> {
                $channel.init(bus)
            }

            fn set_wakeup(
                &mut self,
                bus: &mut dyn SensorBus,
                should_wake: bool,
                setting: &SensorSetting,
            ) -> Result<(), SensorError> {
                $channel.set_wakeup(bus, should_wake, setting)
            }

            fn sample(
                &mut self,
                bus: &mut dyn SensorBus,
                out: &mut [u8],
                _elapsed_ms: u32,
            ) -> Result<usize, SensorError> {
                $channel.sample(bus, out)
            }

            fn reduce_min_max(&self, is_max: bool, a: &[u8], b: &[u8], out: &mut [u8]) {
                super::reduce_readings::<AxisReadings>(is_max, a, b, out);
            }

            fn serialize_wire(&self, out: &mut [u8], raw: &[u8]) -> usize {
                super::serialize_readings::<AxisReadings>(out, raw)
            }
        }
    };
}

mpu9250_driver!(
    /// Three-axis accelerometer; range codes 0..=3 select ±2/4/8/16 g.
    MPU9250AccelSensor,
    Mpu9250Channel::ACCELEROMETER
);

mpu9250_driver!(
    /// Three-axis gyroscope; range codes 0..=3 select ±250/500/1000/2000 dps.
    MPU9250GyroSensor,
    Mpu9250Channel::GYROSCOPE
);
