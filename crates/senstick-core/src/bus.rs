//! Shared two-wire bus access for the sensor drivers
//!
//! Every sensor on the board hangs off one I2C bus whose supply rail is
//! switched by a GPIO. The controller owns the bus and lends it to one driver
//! at a time, so drivers only ever see a `&mut dyn SensorBus`.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use log::{debug, error, info};
use thiserror_no_std::Error;

/// Largest register payload a single write can carry.
pub const MAX_WRITE_PAYLOAD: usize = 32;

/// Time the sensor rail is held low, and then high, when powering up.
const POWER_SETTLE_MS: u32 = 300;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    #[error("I2C transfer to 0x{address:02x} failed: {kind:?}")]
    Transfer { address: u8, kind: ErrorKind },
    #[error("register payload of {length} bytes exceeds the bus buffer")]
    PayloadTooLong { length: usize },
    #[error("sensor bus is powered down")]
    PoweredDown,
    #[error("sensor power pin could not be driven")]
    PowerPin,
}

/// Register-level bus transactions plus control of the shared sensor rail.
pub trait SensorBus {
    /// Write `data` to `register` of the device at `address`.
    fn write_register(&mut self, address: u8, register: u8, data: &[u8]) -> Result<(), BusError>;

    /// Read `out.len()` bytes starting at `register` of the device at `address`.
    fn read_register(&mut self, address: u8, register: u8, out: &mut [u8])
    -> Result<(), BusError>;

    /// Power the sensor rail and bring up the bus. Idempotent.
    fn power_up(&mut self) -> Result<(), BusError>;

    /// Release the bus and cut the sensor rail. Idempotent.
    fn power_down(&mut self) -> Result<(), BusError>;

    /// Busy-wait, used by drivers for short reset delays.
    fn delay_ms(&mut self, ms: u32);
}

/// [`SensorBus`] over an `embedded-hal` I2C peripheral and a power-switch pin.
pub struct TwiManager<I, P, D> {
    i2c: I,
    power_pin: P,
    delay: D,
    powered: bool,
}

impl<I, P, D> TwiManager<I, P, D>
where
    I: I2c,
    P: OutputPin,
    D: DelayNs,
{
    /// Create a manager with the rail assumed off.
    pub fn new(i2c: I, power_pin: P, delay: D) -> Self {
        Self {
            i2c,
            power_pin,
            delay,
            powered: false,
        }
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Give back the underlying peripherals.
    pub fn release(self) -> (I, P, D) {
        (self.i2c, self.power_pin, self.delay)
    }

    fn transfer_error(address: u8, e: I::Error) -> BusError {
        let kind = e.kind();
        debug!("I2C transfer to 0x{:02x} failed: {:?}", address, kind);
        BusError::Transfer { address, kind }
    }
}

impl<I, P, D> SensorBus for TwiManager<I, P, D>
where
    I: I2c,
    P: OutputPin,
    D: DelayNs,
{
    fn write_register(&mut self, address: u8, register: u8, data: &[u8]) -> Result<(), BusError> {
        if !self.powered {
            return Err(BusError::PoweredDown);
        }

        if data.len() > MAX_WRITE_PAYLOAD {
            return Err(BusError::PayloadTooLong { length: data.len() });
        }

        // First byte on the wire is the register address.
        let mut buffer = [0u8; MAX_WRITE_PAYLOAD + 1];
        buffer[0] = register;
        buffer[1..=data.len()].copy_from_slice(data);

        self.i2c
            .write(address, &buffer[..=data.len()])
            .map_err(|e| Self::transfer_error(address, e))
    }

    fn read_register(
        &mut self,
        address: u8,
        register: u8,
        out: &mut [u8],
    ) -> Result<(), BusError> {
        if !self.powered {
            return Err(BusError::PoweredDown);
        }

        self.i2c
            .write_read(address, &[register], out)
            .map_err(|e| Self::transfer_error(address, e))
    }

    fn power_up(&mut self) -> Result<(), BusError> {
        if self.powered {
            return Ok(());
        }

        // Cycle the rail so every sensor starts from its power-on reset.
        self.power_pin.set_low().map_err(|_| {
            error!("Failed to drive sensor power pin low");
            BusError::PowerPin
        })?;
        self.delay.delay_ms(POWER_SETTLE_MS);

        self.power_pin.set_high().map_err(|_| {
            error!("Failed to drive sensor power pin high");
            BusError::PowerPin
        })?;
        self.delay.delay_ms(POWER_SETTLE_MS);

        self.powered = true;
        info!("Sensor bus powered up");
        Ok(())
    }

    fn power_down(&mut self) -> Result<(), BusError> {
        if !self.powered {
            return Ok(());
        }

        self.powered = false;
        self.power_pin.set_low().map_err(|_| {
            error!("Failed to drive sensor power pin low");
            BusError::PowerPin
        })?;

        info!("Sensor bus powered down");
        Ok(())
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}
