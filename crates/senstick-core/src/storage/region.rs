use crate::sensors::descriptor::SensorDescriptor;

/// Write state of one sensor's log region.
///
/// `write_cursor` is an offset from the region start so that it can be
/// compared against the descriptor length directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageRegion {
    pub write_cursor: u32,
    pub current_log_id: Option<u8>,
    /// Sticky until the next session starts.
    pub is_full: bool,
}

impl StorageRegion {
    /// Absolute flash address the next record goes to.
    pub fn write_address(&self, descriptor: &SensorDescriptor) -> u32 {
        descriptor.storage.start_address + self.write_cursor
    }

    /// Number of whole records committed in the current session.
    pub fn sample_count(&self, descriptor: &SensorDescriptor) -> u32 {
        self.write_cursor / descriptor.raw_sample_size as u32
    }

    /// Space left for at least one more record?
    pub fn has_room(&self, descriptor: &SensorDescriptor) -> bool {
        descriptor.storage.length - self.write_cursor >= descriptor.raw_sample_size as u32
    }

    pub(crate) fn reset(&mut self, log_id: Option<u8>) {
        self.write_cursor = 0;
        self.current_log_id = log_id;
        self.is_full = false;
    }

    /// Move past a committed record and refresh the full flag.
    pub(crate) fn advance(&mut self, descriptor: &SensorDescriptor) {
        self.write_cursor += descriptor.raw_sample_size as u32;
        self.is_full = !self.has_room(descriptor);
    }
}
