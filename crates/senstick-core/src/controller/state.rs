use crate::config::SensorSetting;
use crate::sensors::{RawSample, SensorError};
use crate::storage::StorageError;

use super::log_reader::LogCursor;

/// Everything the controller tracks about one sensor between ticks.
#[derive(Debug, Clone)]
pub struct SensorRuntimeState {
    pub setting: SensorSetting,
    /// Driver powered and initialized.
    pub is_enabled: bool,
    /// Committing samples to the current log session. Implies `is_enabled`.
    pub is_sampling: bool,
    /// The protocol peer subscribed to live values.
    pub is_notifying: bool,
    /// A new latest value is waiting to be notified.
    pub is_dirty: bool,
    /// Time not yet handed to the driver.
    pub accumulated_duration_ms: u32,
    /// Time since the current sample cycle started.
    pub cycle_elapsed_ms: u32,
    /// The driver is mid-conversion and has to be polled every tick.
    pub awaiting_sample: bool,
    pub latest: Option<RawSample>,
    pub session_min: Option<RawSample>,
    pub session_max: Option<RawSample>,
    /// Setting in force when the current session started.
    pub session_setting: Option<SensorSetting>,
    pub log_cursor: Option<LogCursor>,
    pub last_error: Option<SensorError>,
    pub last_storage_error: Option<StorageError>,
}

impl SensorRuntimeState {
    pub fn new(setting: SensorSetting) -> Self {
        Self {
            setting,
            is_enabled: false,
            is_sampling: false,
            is_notifying: false,
            is_dirty: false,
            accumulated_duration_ms: 0,
            cycle_elapsed_ms: 0,
            awaiting_sample: false,
            latest: None,
            session_min: None,
            session_max: None,
            session_setting: None,
            log_cursor: None,
            last_error: None,
            last_storage_error: None,
        }
    }

    /// Forget all timing and cached data, as on a power transition.
    pub(crate) fn disable(&mut self) {
        self.is_enabled = false;
        self.is_sampling = false;
        self.is_dirty = false;
        self.accumulated_duration_ms = 0;
        self.cycle_elapsed_ms = 0;
        self.awaiting_sample = false;
        self.latest = None;
    }

    pub(crate) fn enable(&mut self) {
        self.disable();
        self.is_enabled = true;
        self.last_error = None;
    }

    pub(crate) fn begin_session(&mut self) {
        self.is_sampling = true;
        self.session_setting = Some(self.setting);
        self.session_min = None;
        self.session_max = None;
        self.last_storage_error = None;
    }

    /// Whether the next tick should hand time to the driver.
    pub(crate) fn is_due(&self) -> bool {
        self.awaiting_sample
            || self.latest.is_none()
            || self.cycle_elapsed_ms >= self.setting.sampling_period_ms as u32
    }
}
