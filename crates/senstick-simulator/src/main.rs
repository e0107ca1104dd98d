//! Desktop simulator for the senstick sensor controller.
//!
//! Runs the real drivers and controller from `senstick-core` against a
//! simulated sensor bus that answers like the board's chips, and a RAM-backed
//! copy of the 16 MiB log flash. Synthetic readings follow slow sinusoids so
//! logged sessions look like real data.
//!
//! Usage: `senstick-simulator [seconds]` (default 30). Set `RUST_LOG=debug`
//! for driver-level output.

use std::f64::consts::TAU;

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use log::{error, info, warn};

use senstick_core::bus::{BusError, SensorBus};
use senstick_core::controller::{ControlCommand, METADATA_BLOB_SIZE, SensorController};
use senstick_core::protocol::{
    Characteristic, GattNotifier, MAX_NOTIFY_PAYLOAD, ProtocolError, SensorService,
};
use senstick_core::sensors::ak8963::AK8963_ADDRESS;
use senstick_core::sensors::bh1780::BH1780_ADDRESS;
use senstick_core::sensors::lps25hb::{AirPressureReadings, LPS25HB_ADDRESS};
use senstick_core::sensors::mpu9250::MPU9250_ADDRESS;
use senstick_core::sensors::sht20::{HumidityReadings, SHT20_ADDRESS, crc8};
use senstick_core::sensors::{DESCRIPTORS, SensorReadings, SensorType};
use senstick_core::storage::layout::{FLASH_CAPACITY, FLASH_SECTOR_SIZE};
use senstick_core::storage::{METADATA_LAYOUT, RamFlash, StorageRegionAllocator};

/// Controller tick interval.
const TICK_MS: u32 = 100;

const DEFAULT_RUN_SECS: u32 = 30;

const LOG_ID: u8 = 0;

type SimulatedFlash = RamFlash<{ FLASH_SECTOR_SIZE as usize }>;

const BOARD_CHIPS: [u8; 5] = [
    MPU9250_ADDRESS,
    AK8963_ADDRESS,
    SHT20_ADDRESS,
    LPS25HB_ADDRESS,
    BH1780_ADDRESS,
];

// ---------------------------------------------------------------------------
// Simulated chips
// ---------------------------------------------------------------------------

/// Answers register reads the way the board's sensors would.
struct SimulatedBus {
    powered: bool,
    elapsed_ms: u64,
    pwr_mgmt_2: u8,
    magnetometer_triggered: bool,
}

impl SimulatedBus {
    fn new() -> Self {
        Self {
            powered: false,
            elapsed_ms: 0,
            pwr_mgmt_2: 0x3f,
            magnetometer_triggered: false,
        }
    }

    fn advance(&mut self, ms: u32) {
        self.elapsed_ms += ms as u64;
    }

    /// `offset + amplitude * sin(2π t / period)` at the current time.
    fn wave(&self, offset: f64, amplitude: f64, period_secs: f64) -> f64 {
        let t = self.elapsed_ms as f64 / 1000.0;
        offset + amplitude * (TAU * t / period_secs).sin()
    }

    fn axes(&self, amplitude: f64, period_secs: f64) -> [i16; 3] {
        [
            self.wave(0.0, amplitude, period_secs) as i16,
            self.wave(0.0, amplitude, period_secs * 1.3) as i16,
            self.wave(amplitude / 2.0, amplitude / 4.0, period_secs * 0.7) as i16,
        ]
    }

    fn sensirion_word(value: u16) -> [u8; 3] {
        let [hi, lo] = (value & 0xfffc).to_be_bytes();
        [hi, lo, crc8(&[hi, lo & 0xfc])]
    }

    fn no_device(address: u8) -> BusError {
        BusError::Transfer {
            address,
            kind: ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
        }
    }

    fn fill(&mut self, address: u8, register: u8, out: &mut [u8]) -> Result<(), BusError> {
        match (address, register) {
            (MPU9250_ADDRESS, 0x75) => out[0] = 0x71,
            (MPU9250_ADDRESS, 0x6c) => out[0] = self.pwr_mgmt_2,
            (MPU9250_ADDRESS, 0x3b) => {
                let axes = self.axes(4096.0, 5.0);
                write_be_axes(axes, out);
            }
            (MPU9250_ADDRESS, 0x43) => {
                let axes = self.axes(1200.0, 3.0);
                write_be_axes(axes, out);
            }
            (AK8963_ADDRESS, 0x00) => out[0] = 0x48,
            (AK8963_ADDRESS, 0x02) => out[0] = self.magnetometer_triggered as u8,
            (AK8963_ADDRESS, 0x03) => {
                let axes = self.axes(300.0, 20.0);
                for (chunk, axis) in out.chunks_mut(2).zip(axes) {
                    chunk.copy_from_slice(&axis.to_le_bytes());
                }
                out[6] = 0x10;
                self.magnetometer_triggered = false;
            }
            (SHT20_ADDRESS, 0xe7) => out[0] = 0x02,
            (SHT20_ADDRESS, 0xe5) => {
                let rh = self.wave(50.0, 10.0, 60.0);
                let raw = ((rh + 6.0) / 125.0 * 65536.0) as u16;
                out.copy_from_slice(&Self::sensirion_word(raw));
            }
            (SHT20_ADDRESS, 0xe3) => {
                let celsius = self.wave(23.0, 3.0, 120.0);
                let raw = ((celsius + 46.85) / 175.72 * 65536.0) as u16;
                out.copy_from_slice(&Self::sensirion_word(raw));
            }
            (LPS25HB_ADDRESS, 0x0f) => out[0] = 0xbd,
            (LPS25HB_ADDRESS, 0xa8) => {
                let hpa = self.wave(1013.25, 4.0, 90.0);
                let raw = (hpa * 4096.0) as u32;
                out.copy_from_slice(&raw.to_le_bytes()[..3]);
            }
            (BH1780_ADDRESS, 0x8a) => out[0] = 0x81,
            (BH1780_ADDRESS, 0x8c) => {
                let lux = self.wave(400.0, 250.0, 45.0) as u16;
                out.copy_from_slice(&lux.to_le_bytes());
            }
            (address, _) if BOARD_CHIPS.contains(&address) => out.fill(0),
            _ => return Err(Self::no_device(address)),
        }
        Ok(())
    }
}

fn write_be_axes(axes: [i16; 3], out: &mut [u8]) {
    for (chunk, axis) in out.chunks_mut(2).zip(axes) {
        chunk.copy_from_slice(&axis.to_be_bytes());
    }
}

impl SensorBus for SimulatedBus {
    fn write_register(&mut self, address: u8, register: u8, data: &[u8]) -> Result<(), BusError> {
        if !self.powered {
            return Err(BusError::PoweredDown);
        }

        match (address, register, data) {
            (MPU9250_ADDRESS, 0x6c, [value]) => self.pwr_mgmt_2 = *value,
            (AK8963_ADDRESS, 0x0a, [0x11]) => self.magnetometer_triggered = true,
            (
                MPU9250_ADDRESS | AK8963_ADDRESS | SHT20_ADDRESS | LPS25HB_ADDRESS | BH1780_ADDRESS,
                _,
                _,
            ) => {}
            _ => return Err(Self::no_device(address)),
        }
        Ok(())
    }

    fn read_register(&mut self, address: u8, register: u8, out: &mut [u8]) -> Result<(), BusError> {
        if !self.powered {
            return Err(BusError::PoweredDown);
        }
        self.fill(address, register, out)
    }

    fn power_up(&mut self) -> Result<(), BusError> {
        self.powered = true;
        Ok(())
    }

    fn power_down(&mut self) -> Result<(), BusError> {
        self.powered = false;
        Ok(())
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance(ms);
    }
}

// ---------------------------------------------------------------------------
// Protocol peer
// ---------------------------------------------------------------------------

/// Stands in for the radio stack and logs what would go over the air.
struct LoggingNotifier {
    sent: usize,
}

impl GattNotifier for LoggingNotifier {
    fn notify(
        &mut self,
        sensor: SensorType,
        characteristic: Characteristic,
        value: &[u8],
    ) -> Result<(), ProtocolError> {
        self.sent += 1;
        if sensor == SensorType::Humidity && characteristic == Characteristic::Value {
            let readings = HumidityReadings::from_raw(value);
            info!(
                "notify humidity: {:.1} %RH, {:.2} °C",
                readings.humidity_milli_percent() as f64 / 1000.0,
                readings.temperature_milli_celsius() as f64 / 1000.0
            );
        } else {
            log::debug!("notify {} {:?}: {:02x?}", sensor, characteristic, value);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session walk-through
// ---------------------------------------------------------------------------

type Controller = SensorController<SimulatedBus, SimulatedFlash>;

fn run_for(
    controller: &mut Controller,
    service: &mut SensorService,
    notifier: &mut LoggingNotifier,
    secs: u32,
) {
    for _ in 0..secs * 1000 / TICK_MS {
        controller.bus_mut().advance(TICK_MS);
        controller.tick(TICK_MS);
        if let Err(e) = service.poll_notifications(controller, notifier) {
            warn!("Notification dropped: {}", e);
        }
    }
}

fn report_session(controller: &mut Controller, service: &mut SensorService) {
    for sensor in SensorType::ALL {
        let mut metadata = [0u8; METADATA_BLOB_SIZE];
        service.on_read(controller, sensor, Characteristic::MetaData, &mut metadata);
        let count = u32::from_le_bytes([metadata[4], metadata[5], metadata[6], metadata[7]]);
        info!(
            "{}: log {} period {} ms, {} samples{}",
            sensor,
            metadata[0],
            u16::from_le_bytes([metadata[1], metadata[2]]),
            count,
            if metadata[8] != 0 { " (full)" } else { "" }
        );
    }

    // Pull the pressure log back the way a phone would.
    let select = [LOG_ID, 0, 0, 0, 0, 0, 0];
    let selected = service.on_write(
        controller,
        SensorType::Pressure,
        Characteristic::LogId,
        &select,
    );
    if let Err(e) = selected {
        error!("Could not select pressure log: {}", e);
        return;
    }

    let mut chunk = [0u8; MAX_NOTIFY_PAYLOAD];
    let mut values = Vec::new();
    loop {
        let length = service.on_read(
            controller,
            SensorType::Pressure,
            Characteristic::LogData,
            &mut chunk,
        );
        if length == 0 {
            break;
        }
        for sample in chunk[..length].chunks_exact(AirPressureReadings::WIRE_SIZE) {
            values.push(AirPressureReadings::from_raw(sample).milli_hpa());
        }
    }

    if let (Some(min), Some(max)) = (values.iter().min(), values.iter().max()) {
        info!(
            "Pressure log: {} samples between {:.2} and {:.2} hPa",
            values.len(),
            *min as f64 / 1000.0,
            *max as f64 / 1000.0
        );
    }
}

/// Bring up storage and controller over `flash`, picking up whatever the
/// previous boot left in it.
fn boot(bus: SimulatedBus, flash: SimulatedFlash) -> Controller {
    let storage = match StorageRegionAllocator::new(flash, DESCRIPTORS, METADATA_LAYOUT) {
        Ok(storage) => storage,
        Err(e) => {
            error!("Flash layout rejected: {}", e);
            std::process::exit(1);
        }
    };

    let mut controller = SensorController::new(bus, storage).with_board_drivers();
    match controller.restore_config() {
        Ok(true) => info!("Restored persisted sensor settings"),
        Ok(false) => info!("No persisted settings, using defaults"),
        Err(e) => warn!("Persisted settings ignored: {}", e),
    }
    controller
}

fn set_brightness_period(controller: &mut Controller, service: &mut SensorService, period: u16) {
    let blob = period.to_le_bytes();
    let result = service.on_write(
        controller,
        SensorType::Brightness,
        Characteristic::Period,
        &blob,
    );
    match result {
        Ok(()) => info!("Brightness period set to {} ms", period),
        Err(e) => info!("Brightness period change refused: {}", e),
    }
}

fn main() {
    env_logger::init();

    let secs = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_RUN_SECS);
    info!("Starting senstick simulator for {} s of sensor time", secs);

    let flash = SimulatedFlash::new(FLASH_CAPACITY as usize);
    let mut controller = boot(SimulatedBus::new(), flash);
    let mut service = SensorService::new();
    let mut notifier = LoggingNotifier { sent: 0 };

    if let Err(e) = controller.format_storage() {
        error!("Formatting failed: {}", e);
        std::process::exit(1);
    }

    // Same sequence as power-on: settle into sleep, then start working and logging.
    controller.observe_control_command(ControlCommand::ShouldSleep, false, LOG_ID);
    controller.observe_control_command(ControlCommand::ShouldWork, true, LOG_ID);
    info!(
        "{} sensors active, {} logging",
        controller.get_num_active_sensors(),
        controller.get_num_logging_ready_sensors()
    );

    let subscribed = service.set_cccd(
        &mut controller,
        SensorType::Humidity,
        Characteristic::Value,
        true,
    );
    if let Err(e) = subscribed {
        warn!("Could not subscribe to humidity: {}", e);
    }

    run_for(&mut controller, &mut service, &mut notifier, secs / 2);

    // Settings are locked while logging; this write is expected to bounce.
    set_brightness_period(&mut controller, &mut service, 200);

    run_for(&mut controller, &mut service, &mut notifier, secs - secs / 2);

    controller.observe_control_command(ControlCommand::ShouldWork, false, LOG_ID);
    set_brightness_period(&mut controller, &mut service, 200);

    info!(
        "Session {} full: {}",
        LOG_ID,
        controller.is_data_full(LOG_ID)
    );
    report_session(&mut controller, &mut service);
    service.on_disconnect(&mut controller);

    // Power-cycle the device: only the flash contents carry over.
    let (bus, storage) = controller.release();
    let erased = storage.flash().erase_count();
    info!("Rebooting after {} sectors erased", erased);
    let mut controller = boot(bus, storage.release());
    let mut service = SensorService::new();

    info!(
        "Session {} full after reboot: {}",
        LOG_ID,
        controller.is_data_full(LOG_ID)
    );
    report_session(&mut controller, &mut service);

    controller.observe_control_command(ControlCommand::ShouldSleep, false, LOG_ID);
    info!("Simulator exiting after {} notifications", notifier.sent);
}
