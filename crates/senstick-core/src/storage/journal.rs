//! Session journal: what survives a reboot of the write cursors
//!
//! Each sensor owns one slot of the journal area. A slot starts with a
//! header naming the session, followed by 4-byte little-endian checkpoints.
//! A checkpoint is written right after the allocator erases fresh sectors
//! for a record, and again when a session is synced. Everything past the
//! newest checkpoint's sector boundary is left over from an older session,
//! so recovery only has to scan forward from the checkpoint up to that
//! boundary.

use embedded_storage::nor_flash::NorFlash;
use log::{debug, warn};

use super::{StorageError, flash_error};
use crate::sensors::descriptor::StorageBounds;
use crate::sensors::{SENSOR_COUNT, SensorType};

const JOURNAL_MAGIC: [u8; 2] = [0x53, 0x4a];
const HEADER_SIZE: u32 = 4;
const ENTRY_SIZE: u32 = 4;
/// Set on checkpoints written right after an erase-ahead.
const ERASED_FLAG: u32 = 1 << 31;
const EMPTY_ENTRY: u32 = u32::MAX;

/// A session found in the journal at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct JournalRecord {
    pub log_id: u8,
    /// Region offset known to hold only committed records before it.
    pub cursor: u32,
    /// Region offset up to which this session erased the flash.
    pub scan_end: u32,
}

#[derive(Debug)]
pub(crate) struct SessionJournal {
    bounds: StorageBounds,
    slot_length: u32,
    /// Slot offset of the next free checkpoint.
    next_entry: [u32; SENSOR_COUNT],
    /// Cursor of the newest checkpoint, `None` without a session.
    last_cursor: [Option<u32>; SENSOR_COUNT],
}

impl SessionJournal {
    pub(crate) fn new<F: NorFlash>(bounds: StorageBounds) -> Result<Self, StorageError> {
        let erase_size = F::ERASE_SIZE as u32;
        let slot_length = bounds.length / SENSOR_COUNT as u32 / erase_size * erase_size;

        if bounds.start_address % erase_size != 0
            || ENTRY_SIZE % F::WRITE_SIZE as u32 != 0
            || ENTRY_SIZE % F::READ_SIZE as u32 != 0
            || slot_length < HEADER_SIZE + ENTRY_SIZE
        {
            return Err(StorageError::MetadataLayout);
        }

        Ok(Self {
            bounds,
            slot_length,
            next_entry: [HEADER_SIZE; SENSOR_COUNT],
            last_cursor: [None; SENSOR_COUNT],
        })
    }

    fn slot_start(&self, sensor: SensorType) -> u32 {
        self.bounds.start_address + sensor.index() as u32 * self.slot_length
    }

    /// Erase the slot and open a new session under `log_id`.
    pub(crate) fn begin<F: NorFlash>(
        &mut self,
        flash: &mut F,
        sensor: SensorType,
        log_id: u8,
        raw_size: usize,
    ) -> Result<(), StorageError> {
        let start = self.slot_start(sensor);
        self.next_entry[sensor.index()] = HEADER_SIZE;
        self.last_cursor[sensor.index()] = None;

        flash
            .erase(start, start + self.slot_length)
            .map_err(flash_error)?;
        let header = [JOURNAL_MAGIC[0], JOURNAL_MAGIC[1], log_id, raw_size as u8];
        flash.write(start, &header).map_err(flash_error)?;

        self.last_cursor[sensor.index()] = Some(0);
        Ok(())
    }

    /// Wipe the slot without opening a session.
    pub(crate) fn clear<F: NorFlash>(
        &mut self,
        flash: &mut F,
        sensor: SensorType,
    ) -> Result<(), StorageError> {
        let start = self.slot_start(sensor);
        self.next_entry[sensor.index()] = HEADER_SIZE;
        self.last_cursor[sensor.index()] = None;
        flash
            .erase(start, start + self.slot_length)
            .map_err(flash_error)
    }

    /// Record that the region is valid up to `cursor`. With `erased`, the
    /// sectors holding the record at `cursor` were just erased.
    ///
    /// A full slot is compacted down to its header and this checkpoint.
    pub(crate) fn checkpoint<F: NorFlash>(
        &mut self,
        flash: &mut F,
        sensor: SensorType,
        log_id: u8,
        raw_size: usize,
        cursor: u32,
        erased: bool,
    ) -> Result<(), StorageError> {
        if self.next_entry[sensor.index()] + ENTRY_SIZE > self.slot_length {
            debug!("{} journal full, compacting", sensor);
            self.begin(flash, sensor, log_id, raw_size)?;
        }

        let offset = self.next_entry[sensor.index()];
        let entry = if erased { cursor | ERASED_FLAG } else { cursor };
        flash
            .write(self.slot_start(sensor) + offset, &entry.to_le_bytes())
            .map_err(flash_error)?;

        self.next_entry[sensor.index()] = offset + ENTRY_SIZE;
        self.last_cursor[sensor.index()] = Some(cursor);
        Ok(())
    }

    /// Whether a sync at `cursor` would add anything.
    pub(crate) fn is_behind(&self, sensor: SensorType, cursor: u32) -> bool {
        matches!(self.last_cursor[sensor.index()], Some(last) if last != cursor)
    }

    /// Find the session left in the slot by a previous boot. `raw_size` is
    /// the record size the session must have been written with.
    pub(crate) fn recover<F: NorFlash>(
        &mut self,
        flash: &mut F,
        sensor: SensorType,
        raw_size: usize,
    ) -> Result<Option<JournalRecord>, StorageError> {
        let start = self.slot_start(sensor);
        let mut header = [0u8; HEADER_SIZE as usize];
        flash.read(start, &mut header).map_err(flash_error)?;

        if header[..2] != JOURNAL_MAGIC {
            return Ok(None);
        }
        if header[3] as usize != raw_size {
            warn!(
                "{} journal was written for {}-byte records, ignoring it",
                sensor, header[3]
            );
            return Ok(None);
        }

        let mut last = None;
        let mut offset = HEADER_SIZE;
        while offset + ENTRY_SIZE <= self.slot_length {
            let mut bytes = [0u8; ENTRY_SIZE as usize];
            flash.read(start + offset, &mut bytes).map_err(flash_error)?;
            let entry = u32::from_le_bytes(bytes);
            if entry == EMPTY_ENTRY {
                break;
            }
            last = Some(entry);
            offset += ENTRY_SIZE;
        }

        self.next_entry[sensor.index()] = offset;

        let erase_size = F::ERASE_SIZE as u32;
        let (cursor, scan_end) = match last {
            None => (0, 0),
            Some(entry) if entry & ERASED_FLAG != 0 => {
                let cursor = entry & !ERASED_FLAG;
                let end = cursor + raw_size as u32;
                (cursor, end.div_ceil(erase_size) * erase_size)
            }
            Some(cursor) => (cursor, cursor.div_ceil(erase_size) * erase_size),
        };

        self.last_cursor[sensor.index()] = Some(cursor);
        Ok(Some(JournalRecord {
            log_id: header[2],
            cursor,
            scan_end,
        }))
    }
}
