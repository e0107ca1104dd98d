//! Sensor controller
//!
//! Owns the shared sensor bus, one driver per sensor type and the flash log
//! regions. A periodic [`SensorController::tick`] drives every enabled sensor;
//! completed samples land in the latest-value cache, and in the log while a
//! session is running. Power and logging transitions arrive as control
//! commands. Everything runs to completion on the caller's context.

pub mod log_reader;
pub mod state;

use alloc::boxed::Box;

use embedded_storage::nor_flash::NorFlash;
use log::{debug, error, info, warn};

use crate::bus::{BusError, SensorBus};
use crate::config::{ConfigError, ControllerConfig, SensorSetting, SensorStatus, SettingError};
use crate::sensors::{
    AK8963Sensor, BH1780Sensor, LPS25HBSensor, MAX_RAW_SAMPLE_SIZE, MPU9250AccelSensor,
    MPU9250GyroSensor, RawSample, SENSOR_COUNT, SHT20Sensor, SensorDriver, SensorError,
    SensorType,
};
use crate::storage::{StorageError, StorageRegionAllocator};

pub use log_reader::{LOG_ID_BLOB_SIZE, LogCursor, NO_LOG_ID};
pub use state::SensorRuntimeState;

/// Size of the metadata characteristic blob.
pub const METADATA_BLOB_SIZE: usize = 9;

/// Global power command issued by the device control logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    ShouldSleep,
    ShouldWork,
}

pub struct SensorController<B, F> {
    bus: B,
    storage: StorageRegionAllocator<F>,
    drivers: [Option<Box<dyn SensorDriver>>; SENSOR_COUNT],
    states: [SensorRuntimeState; SENSOR_COUNT],
    is_working: bool,
    is_logging: bool,
    current_log_id: Option<u8>,
    bus_powered: bool,
}

impl<B, F> SensorController<B, F>
where
    B: SensorBus,
    F: NorFlash,
{
    /// A sleeping controller with no drivers and default settings.
    pub fn new(bus: B, storage: StorageRegionAllocator<F>) -> Self {
        let descriptors = *storage.descriptors();
        Self {
            bus,
            storage,
            drivers: core::array::from_fn(|_| None),
            states: descriptors.map(|d| SensorRuntimeState::new(SensorSetting::default_for(&d))),
            is_working: false,
            is_logging: false,
            current_log_id: None,
            bus_powered: false,
        }
    }

    /// Install a driver in the slot of its sensor type.
    pub fn with_driver(mut self, driver: Box<dyn SensorDriver>) -> Self {
        self.install_driver(driver);
        self
    }

    /// Install the drivers for every sensor fitted on the board.
    pub fn with_board_drivers(self) -> Self {
        self.with_driver(Box::new(MPU9250AccelSensor::new()))
            .with_driver(Box::new(MPU9250GyroSensor::new()))
            .with_driver(Box::new(AK8963Sensor::new()))
            .with_driver(Box::new(SHT20Sensor::new()))
            .with_driver(Box::new(LPS25HBSensor::new()))
            .with_driver(Box::new(BH1780Sensor::new()))
    }

    pub fn install_driver(&mut self, driver: Box<dyn SensorDriver>) {
        let sensor = driver.sensor_type();
        if self.states[sensor.index()].is_enabled {
            warn!("Replacing the driver of enabled {} sensor", sensor);
            self.disable_sensor(sensor);
        }
        self.drivers[sensor.index()] = Some(driver);
        debug!("Installed {} driver", sensor);
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn storage(&self) -> &StorageRegionAllocator<F> {
        &self.storage
    }

    /// Take the controller apart. The log session is closed first so the
    /// storage can be rebuilt from flash later.
    pub fn release(mut self) -> (B, StorageRegionAllocator<F>) {
        self.sleep();
        (self.bus, self.storage)
    }

    pub fn state(&self, sensor: SensorType) -> &SensorRuntimeState {
        &self.states[sensor.index()]
    }

    pub fn is_present(&self, sensor: SensorType) -> bool {
        self.drivers[sensor.index()].is_some()
    }

    pub fn is_working(&self) -> bool {
        self.is_working
    }

    pub fn is_logging(&self) -> bool {
        self.is_logging
    }

    pub fn current_log_id(&self) -> Option<u8> {
        self.current_log_id
    }

    // ---- sampling ----

    /// Advance every enabled sensor by `elapsed_ms`.
    pub fn tick(&mut self, elapsed_ms: u32) {
        let Self {
            bus,
            storage,
            drivers,
            states,
            ..
        } = self;
        let mut lost_sensor = false;

        for sensor in SensorType::ALL {
            let state = &mut states[sensor.index()];
            if !state.is_enabled {
                continue;
            }
            let Some(driver) = drivers[sensor.index()].as_mut() else {
                continue;
            };

            state.accumulated_duration_ms =
                state.accumulated_duration_ms.saturating_add(elapsed_ms);
            state.cycle_elapsed_ms = state.cycle_elapsed_ms.saturating_add(elapsed_ms);
            if !state.is_due() {
                continue;
            }
            if !state.awaiting_sample {
                state.cycle_elapsed_ms = 0;
            }

            let elapsed = core::mem::take(&mut state.accumulated_duration_ms);
            let mut buffer = [0u8; MAX_RAW_SAMPLE_SIZE];
            match driver.sample(&mut *bus, &mut buffer, elapsed) {
                Ok(0) => state.awaiting_sample = true,
                Ok(length) => {
                    state.awaiting_sample = false;
                    Self::commit_sample(sensor, &**driver, storage, state, &buffer[..length]);
                }
                Err(e) => {
                    error!("{} sensor disabled after sampling failure: {}", sensor, e);
                    state.disable();
                    state.last_error = Some(e);
                    lost_sensor = true;
                }
            }
        }

        if lost_sensor {
            self.release_bus_if_idle();
        }
    }

    fn commit_sample(
        sensor: SensorType,
        driver: &dyn SensorDriver,
        storage: &mut StorageRegionAllocator<F>,
        state: &mut SensorRuntimeState,
        sample: &[u8],
    ) {
        let expected = storage.descriptor(sensor).raw_sample_size;
        if sample.len() != expected {
            error!(
                "{} driver produced {} bytes, expected {}",
                sensor,
                sample.len(),
                expected
            );
            return;
        }

        state.latest = RawSample::from_slice(sample).ok();
        if state.is_notifying {
            state.is_dirty = true;
        }

        if !state.is_sampling {
            return;
        }

        match storage.append(sensor, sample) {
            Ok(()) => {
                fold_extremum(driver, &mut state.session_min, sample, false);
                fold_extremum(driver, &mut state.session_max, sample, true);
            }
            Err(e @ StorageError::RegionFull { .. }) => {
                debug!("{} sample dropped: {}", sensor, e);
                state.last_storage_error = Some(e);
            }
            Err(e) => {
                error!("{} sample could not be logged: {}", sensor, e);
                state.last_storage_error = Some(e);
            }
        }
    }

    // ---- control commands ----

    /// React to a global command. After `ShouldWork` the logging flag
    /// decides whether a session under `new_log_id` runs; sleeping always
    /// ends the session.
    pub fn observe_control_command(
        &mut self,
        command: ControlCommand,
        should_start_logging: bool,
        new_log_id: u8,
    ) {
        match command {
            ControlCommand::ShouldSleep => self.sleep(),
            ControlCommand::ShouldWork => {
                self.work();
                if should_start_logging {
                    self.start_logging(new_log_id);
                } else {
                    self.stop_logging();
                }
            }
        }
    }

    fn sleep(&mut self) {
        for sensor in SensorType::ALL {
            self.disable_sensor(sensor);
        }
        self.stop_logging();
        self.is_working = false;
        self.release_bus_if_idle();
    }

    fn work(&mut self) {
        self.is_working = true;

        for sensor in SensorType::ALL {
            let state = &self.states[sensor.index()];
            if state.is_enabled || !state.setting.status.is_running() || !self.is_present(sensor) {
                continue;
            }
            if let Err(e) = self.power_up_bus() {
                error!("Sensor bus unavailable, {} stays off: {}", sensor, e);
                break;
            }
            self.enable_sensor(sensor);
        }

        info!(
            "Working with {} of {} sensors active",
            self.get_num_active_sensors(),
            SENSOR_COUNT
        );
        self.release_bus_if_idle();
    }

    fn start_logging(&mut self, log_id: u8) {
        if self.is_logging && self.current_log_id == Some(log_id) {
            debug!("Log session {} already running", log_id);
            return;
        }
        if self.is_logging {
            self.stop_logging();
        }

        for sensor in SensorType::ALL {
            let state = &mut self.states[sensor.index()];
            state.is_sampling = false;
            if state.is_enabled && state.setting.status == SensorStatus::SensingAndLogging {
                if let Err(e) = self.storage.start_session(sensor, log_id) {
                    warn!("{} session {} will not survive a reset: {}", sensor, log_id, e);
                    state.last_storage_error = Some(e);
                }
                state.begin_session();
            }
        }

        self.is_logging = true;
        self.current_log_id = Some(log_id);
        info!(
            "Log session {} started with {} sensors",
            log_id,
            self.states.iter().filter(|s| s.is_sampling).count()
        );
    }

    fn stop_logging(&mut self) {
        if self.is_logging {
            info!("Log session {:?} stopped", self.current_log_id);
        }
        for sensor in SensorType::ALL {
            let state = &mut self.states[sensor.index()];
            state.is_sampling = false;
            // Sensors disabled mid-session still hold records to checkpoint.
            if !self.is_logging {
                continue;
            }
            if let Err(e) = self.storage.sync(sensor) {
                warn!("{} log end was not checkpointed: {}", sensor, e);
                state.last_storage_error = Some(e);
            }
        }
        self.is_logging = false;
        self.current_log_id = None;
    }

    fn power_up_bus(&mut self) -> Result<(), BusError> {
        if !self.bus_powered {
            self.bus.power_up()?;
            self.bus_powered = true;
        }
        Ok(())
    }

    fn release_bus_if_idle(&mut self) {
        if !self.bus_powered || self.states.iter().any(|s| s.is_enabled) {
            return;
        }
        if let Err(e) = self.bus.power_down() {
            error!("Failed to power down sensor bus: {}", e);
        }
        self.bus_powered = false;
    }

    /// Init and wake one sensor. Failures leave it disabled.
    fn enable_sensor(&mut self, sensor: SensorType) -> bool {
        let Self {
            bus,
            drivers,
            states,
            ..
        } = self;
        let state = &mut states[sensor.index()];
        let Some(driver) = drivers[sensor.index()].as_mut() else {
            return false;
        };

        let result = match driver.init(&mut *bus) {
            Ok(()) => driver.set_wakeup(&mut *bus, true, &state.setting),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                state.enable();
                info!("{} sensor enabled", sensor);
                true
            }
            Err(e) => {
                warn!("{} sensor unavailable: {}", sensor, e);
                state.disable();
                state.last_error = Some(e);
                false
            }
        }
    }

    fn disable_sensor(&mut self, sensor: SensorType) {
        let Self {
            bus,
            drivers,
            states,
            ..
        } = self;
        let state = &mut states[sensor.index()];
        if !state.is_enabled {
            return;
        }

        if let Some(driver) = drivers[sensor.index()].as_mut() {
            if let Err(e) = driver.set_wakeup(&mut *bus, false, &state.setting) {
                warn!("{} sensor did not enter sleep: {}", sensor, e);
            }
        }
        state.disable();
        debug!("{} sensor disabled", sensor);
    }

    // ---- settings ----

    /// Validate and apply a setting blob. Rejected blobs leave every state
    /// untouched.
    pub fn set_setting(&mut self, sensor: SensorType, blob: &[u8]) -> Result<(), SettingError> {
        let setting = SensorSetting::from_bytes(blob)?;
        self.update_setting(sensor, setting)
    }

    pub fn set_sampling_period(
        &mut self,
        sensor: SensorType,
        period_ms: u16,
    ) -> Result<(), SettingError> {
        let setting = SensorSetting {
            sampling_period_ms: period_ms,
            ..self.states[sensor.index()].setting
        };
        self.update_setting(sensor, setting)
    }

    fn check_setting(
        &self,
        sensor: SensorType,
        setting: &SensorSetting,
    ) -> Result<(), SettingError> {
        setting.validate(self.storage.descriptor(sensor))?;

        let state = &self.states[sensor.index()];
        if self.is_logging && state.is_sampling && state.setting != *setting {
            return Err(SettingError::SessionActive { sensor });
        }
        Ok(())
    }

    fn update_setting(
        &mut self,
        sensor: SensorType,
        setting: SensorSetting,
    ) -> Result<(), SettingError> {
        self.check_setting(sensor, &setting)?;

        let previous = core::mem::replace(&mut self.states[sensor.index()].setting, setting);
        if previous != setting {
            info!("{} setting changed to {:?}", sensor, setting);
        }
        if self.is_working {
            self.apply_setting(sensor, previous);
        }
        Ok(())
    }

    fn apply_setting(&mut self, sensor: SensorType, previous: SensorSetting) {
        let state = &self.states[sensor.index()];
        let setting = state.setting;

        if !setting.status.is_running() {
            self.disable_sensor(sensor);
        } else if !state.is_enabled {
            if !self.is_present(sensor) {
                return;
            }
            match self.power_up_bus() {
                Ok(()) => {
                    self.enable_sensor(sensor);
                }
                Err(e) => error!("Sensor bus unavailable, {} stays off: {}", sensor, e),
            }
        } else if setting.range != previous.range {
            let Self {
                bus,
                drivers,
                states,
                ..
            } = self;
            let state = &mut states[sensor.index()];
            if let Some(driver) = drivers[sensor.index()].as_mut() {
                if let Err(e) = driver.set_wakeup(&mut *bus, true, &setting) {
                    error!("{} sensor failed to apply range {}: {}", sensor, setting.range, e);
                    state.disable();
                    state.last_error = Some(e);
                }
            }
        }

        self.release_bus_if_idle();
    }

    pub fn read_setting(&self, sensor: SensorType, out: &mut [u8]) -> usize {
        self.states[sensor.index()].setting.write_bytes(out)
    }

    /// `[log_id][period u16][range][sample_count u32][is_full]` of the
    /// session held by the sensor's region.
    pub fn read_metadata(&self, sensor: SensorType, out: &mut [u8]) -> usize {
        if out.len() < METADATA_BLOB_SIZE {
            return 0;
        }

        let state = &self.states[sensor.index()];
        let region = self.storage.region(sensor);
        let setting = state.session_setting.unwrap_or(state.setting);

        out[0] = region.current_log_id.unwrap_or(NO_LOG_ID);
        out[1..3].copy_from_slice(&setting.sampling_period_ms.to_le_bytes());
        out[3] = setting.range;
        out[4..8].copy_from_slice(&self.storage.sample_count(sensor).to_le_bytes());
        out[8] = region.is_full as u8;
        METADATA_BLOB_SIZE
    }

    pub fn export_config(&self) -> ControllerConfig {
        ControllerConfig {
            settings: core::array::from_fn(|i| self.states[i].setting),
        }
    }

    /// Apply every setting of `config`, or none of them.
    pub fn apply_config(&mut self, config: &ControllerConfig) -> Result<(), ConfigError> {
        for sensor in SensorType::ALL {
            self.check_setting(sensor, config.setting(sensor))
                .map_err(|error| ConfigError::Invalid { sensor, error })?;
        }

        for sensor in SensorType::ALL {
            self.update_setting(sensor, *config.setting(sensor))
                .map_err(|error| ConfigError::Invalid { sensor, error })?;
        }
        Ok(())
    }

    /// Persist every sensor's setting in the config area.
    pub fn save_config(&mut self) -> Result<(), ConfigError> {
        let bytes = self.export_config().to_bytes()?;
        self.storage
            .store_config_blob(&bytes)
            .map_err(ConfigError::Storage)?;
        debug!("Controller config saved");
        Ok(())
    }

    /// Apply the persisted config, if any. Returns whether one was applied.
    pub fn restore_config(&mut self) -> Result<bool, ConfigError> {
        let Some(bytes) = self
            .storage
            .load_config_blob()
            .map_err(ConfigError::Storage)?
        else {
            debug!("No persisted controller config");
            return Ok(false);
        };

        let config = ControllerConfig::from_bytes(&bytes)?;
        self.apply_config(&config)?;
        info!("Controller config restored");
        Ok(true)
    }

    // ---- live values ----

    pub fn set_notifying(&mut self, sensor: SensorType, enabled: bool) {
        let state = &mut self.states[sensor.index()];
        state.is_notifying = enabled;
        if !enabled {
            state.is_dirty = false;
        }
    }

    /// Latest value as a wire sample. 0 until the sensor produced one.
    pub fn read_latest(&self, sensor: SensorType, out: &mut [u8]) -> usize {
        let state = &self.states[sensor.index()];
        match (&self.drivers[sensor.index()], &state.latest) {
            (Some(driver), Some(latest)) => driver.serialize_wire(out, latest),
            _ => 0,
        }
    }

    /// The pending notification, if any. Clears the dirty flag.
    pub fn take_notification(&mut self, sensor: SensorType, out: &mut [u8]) -> usize {
        if !self.states[sensor.index()].is_dirty {
            return 0;
        }

        let written = self.read_latest(sensor, out);
        if written > 0 {
            self.states[sensor.index()].is_dirty = false;
        }
        written
    }

    pub fn read_session_extremum(&self, sensor: SensorType, is_max: bool, out: &mut [u8]) -> usize {
        let state = &self.states[sensor.index()];
        let extremum = if is_max {
            &state.session_max
        } else {
            &state.session_min
        };
        match (&self.drivers[sensor.index()], extremum) {
            (Some(driver), Some(sample)) => driver.serialize_wire(out, sample),
            _ => 0,
        }
    }

    // ---- log read-out ----

    /// Select the session and position the next [`Self::read_log_data`]
    /// starts from.
    pub fn write_log_id(&mut self, sensor: SensorType, blob: &[u8]) -> Result<(), SettingError> {
        let cursor = LogCursor::from_bytes(blob)?;
        debug!("{} log read-out set to {:?}", sensor, cursor);
        self.states[sensor.index()].log_cursor = Some(cursor);
        Ok(())
    }

    /// Fill `out` with as many wire samples as fit, starting at the read
    /// position. Returns 0 once the session is exhausted or not held.
    pub fn read_log_data(&mut self, sensor: SensorType, out: &mut [u8]) -> usize {
        let Self {
            storage,
            drivers,
            states,
            ..
        } = self;
        let Some(driver) = drivers[sensor.index()].as_ref() else {
            return 0;
        };
        let Some(cursor) = states[sensor.index()].log_cursor.as_mut() else {
            return 0;
        };
        if storage.region(sensor).current_log_id != Some(cursor.log_id) {
            return 0;
        }

        let descriptor = *storage.descriptor(sensor);
        let count = storage.sample_count(sensor);
        let mut raw = [0u8; MAX_RAW_SAMPLE_SIZE];
        let mut written = 0;

        while cursor.position < count && written + descriptor.wire_sample_size <= out.len() {
            if let Err(e) = storage.read_sample(sensor, cursor.position, &mut raw) {
                error!("{} log read-out stopped: {}", sensor, e);
                break;
            }
            let length =
                driver.serialize_wire(&mut out[written..], &raw[..descriptor.raw_sample_size]);
            if length == 0 {
                break;
            }
            written += length;
            cursor.advance();
        }
        written
    }

    // ---- queries ----

    /// Whether any region logging session `log_id` ran out of space.
    pub fn is_data_full(&self, log_id: u8) -> bool {
        SensorType::ALL.iter().any(|&sensor| {
            let region = self.storage.region(sensor);
            region.current_log_id == Some(log_id) && region.is_full
        })
    }

    pub fn get_num_active_sensors(&self) -> usize {
        self.states.iter().filter(|s| s.is_enabled).count()
    }

    pub fn get_num_logging_ready_sensors(&self) -> usize {
        self.states
            .iter()
            .filter(|s| s.is_enabled && s.setting.status == SensorStatus::SensingAndLogging)
            .count()
    }

    /// Erase every log region. Used when provisioning a fresh device.
    pub fn format_storage(&mut self) -> Result<(), StorageError> {
        for sensor in SensorType::ALL {
            self.storage.format(sensor)?;
        }
        info!("Sensor storage formatted");
        Ok(())
    }

    /// Last driver failure recorded for `sensor`.
    pub fn last_error(&self, sensor: SensorType) -> Option<SensorError> {
        self.states[sensor.index()].last_error
    }
}

fn fold_extremum(
    driver: &dyn SensorDriver,
    slot: &mut Option<RawSample>,
    sample: &[u8],
    is_max: bool,
) {
    match slot {
        Some(current) => {
            let mut out = [0u8; MAX_RAW_SAMPLE_SIZE];
            let out = &mut out[..sample.len()];
            driver.reduce_min_max(is_max, current, sample, out);
            current.copy_from_slice(out);
        }
        None => *slot = RawSample::from_slice(sample).ok(),
    }
}

#[cfg(test)]
mod tests;
