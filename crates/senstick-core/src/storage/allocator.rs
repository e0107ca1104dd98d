//! Per-sensor log regions on the external NOR flash
//!
//! Every sensor type owns one fixed, disjoint address range taken from its
//! [`SensorDescriptor`]. Records are appended back to back from the start of
//! the range; a region that cannot take another whole record is full and
//! stays full until a new session is started. Nothing ever wraps.
//!
//! NOR sectors are erased lazily: a sector is erased right before the first
//! record that touches it is written. Each erase-ahead is checkpointed in the
//! session journal, which is how the write cursors come back after a reboot.

use alloc::vec;
use alloc::vec::Vec;

use embedded_storage::nor_flash::NorFlash;
use log::{debug, error, info, warn};

use super::journal::SessionJournal;
use super::layout::MetadataLayout;
use super::region::StorageRegion;
use super::{StorageError, flash_error};
use crate::sensors::descriptor::{DescriptorTable, SensorDescriptor, StorageBounds};
use crate::sensors::{SENSOR_COUNT, SensorType};

const CONFIG_MAGIC: u8 = 0xc5;
const CONFIG_HEADER_SIZE: u32 = 4;

pub struct StorageRegionAllocator<F> {
    flash: F,
    table: DescriptorTable,
    regions: [StorageRegion; SENSOR_COUNT],
    journal: SessionJournal,
    config: StorageBounds,
}

fn overlaps(a: &StorageBounds, b: &StorageBounds) -> bool {
    a.start_address < b.end_address() && b.start_address < a.end_address()
}

impl<F: NorFlash> StorageRegionAllocator<F> {
    /// Check every region and the metadata areas against the flash
    /// geometry, then pick up whatever session each region held before the
    /// last reset.
    pub fn new(
        flash: F,
        table: DescriptorTable,
        metadata: MetadataLayout,
    ) -> Result<Self, StorageError> {
        let erase_size = F::ERASE_SIZE as u32;
        let capacity = flash.capacity() as u32;

        for descriptor in table.iter() {
            let sensor = descriptor.sensor;
            let bounds = descriptor.storage;

            if bounds.start_address % erase_size != 0 || bounds.length % erase_size != 0 {
                error!("{} region is not sector aligned: {:?}", sensor, bounds);
                return Err(StorageError::Misaligned { sensor });
            }

            if descriptor.raw_sample_size % F::WRITE_SIZE != 0
                || descriptor.raw_sample_size % F::READ_SIZE != 0
            {
                error!(
                    "{} record size {} does not match flash access size",
                    sensor, descriptor.raw_sample_size
                );
                return Err(StorageError::Misaligned { sensor });
            }

            if bounds.end_address() > capacity {
                error!("{} region ends past the flash capacity", sensor);
                return Err(StorageError::OutOfBounds { sensor });
            }
        }

        let MetadataLayout { journal, config } = metadata;
        let misplaced = [journal, config].iter().any(|area| {
            area.start_address % erase_size != 0
                || area.length % erase_size != 0
                || area.end_address() > capacity
                || table.iter().any(|d| overlaps(area, &d.storage))
        });
        if misplaced
            || overlaps(&journal, &config)
            || config.length < CONFIG_HEADER_SIZE + F::WRITE_SIZE as u32
            || CONFIG_HEADER_SIZE % F::WRITE_SIZE as u32 != 0
            || CONFIG_HEADER_SIZE % F::READ_SIZE as u32 != 0
        {
            error!("Metadata areas do not fit the flash: {:?}", metadata);
            return Err(StorageError::MetadataLayout);
        }

        let mut storage = Self {
            flash,
            table,
            regions: [StorageRegion::default(); SENSOR_COUNT],
            journal: SessionJournal::new::<F>(journal)?,
            config,
        };
        for sensor in SensorType::ALL {
            storage.recover_region(sensor);
        }

        info!(
            "Storage allocator ready: {} regions on {} bytes of flash",
            SENSOR_COUNT, capacity
        );
        Ok(storage)
    }

    /// Rebuild one region's cursor from its journal. Records past the last
    /// checkpoint are found by scanning up to the erased boundary; an all
    /// 0xff record ends the scan.
    fn recover_region(&mut self, sensor: SensorType) {
        let descriptor = self.table[sensor.index()];
        let size = descriptor.raw_sample_size as u32;

        let recovered = self.journal.recover(&mut self.flash, sensor, descriptor.raw_sample_size);
        let record = match recovered {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!("{} session could not be recovered: {}", sensor, e);
                return;
            }
        };
        if record.cursor % size != 0 || record.cursor > descriptor.storage.length {
            warn!("{} journal cursor {} is corrupt, ignoring it", sensor, record.cursor);
            return;
        }

        let scan_end = record.scan_end.min(descriptor.storage.length);
        let mut cursor = record.cursor;
        let mut raw = [0xffu8; crate::sensors::MAX_RAW_SAMPLE_SIZE];
        let raw = &mut raw[..descriptor.raw_sample_size];
        while cursor + size <= scan_end {
            let address = descriptor.storage.start_address + cursor;
            if let Err(e) = self.flash.read(address, raw).map_err(flash_error) {
                warn!("{} recovery scan stopped: {}", sensor, e);
                break;
            }
            if raw.iter().all(|b| *b == 0xff) {
                break;
            }
            cursor += size;
        }

        let region = &mut self.regions[sensor.index()];
        region.reset(Some(record.log_id));
        region.write_cursor = cursor;
        region.is_full = !region.has_room(&descriptor);
        info!(
            "{} storage: recovered session {} with {} records",
            sensor,
            record.log_id,
            region.sample_count(&descriptor)
        );
    }

    pub fn descriptor(&self, sensor: SensorType) -> &SensorDescriptor {
        &self.table[sensor.index()]
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.table
    }

    pub fn region(&self, sensor: SensorType) -> &StorageRegion {
        &self.regions[sensor.index()]
    }

    pub fn is_full(&self, sensor: SensorType) -> bool {
        self.regions[sensor.index()].is_full
    }

    pub fn sample_count(&self, sensor: SensorType) -> u32 {
        self.regions[sensor.index()].sample_count(&self.table[sensor.index()])
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Hand the flash device back, e.g. to rebuild the allocator after a
    /// simulated reset.
    pub fn release(self) -> F {
        self.flash
    }

    /// Rewind the region for a new session under `log_id`.
    ///
    /// Only the journal slot is erased here; old records are erased as the
    /// new ones reach their sectors. The region is rewound even when the
    /// journal write fails; such a session is lost on reboot.
    pub fn start_session(&mut self, sensor: SensorType, log_id: u8) -> Result<(), StorageError> {
        self.regions[sensor.index()].reset(Some(log_id));
        let raw_size = self.table[sensor.index()].raw_sample_size;
        self.journal.begin(&mut self.flash, sensor, log_id, raw_size)?;
        info!("{} storage: session {} started", sensor, log_id);
        Ok(())
    }

    /// Commit one record at the write cursor.
    pub fn append(&mut self, sensor: SensorType, sample: &[u8]) -> Result<(), StorageError> {
        let descriptor = self.table[sensor.index()];
        let region = &mut self.regions[sensor.index()];

        if sample.len() != descriptor.raw_sample_size {
            return Err(StorageError::SampleSizeMismatch {
                sensor,
                expected: descriptor.raw_sample_size,
                actual: sample.len(),
            });
        }

        if region.is_full || !region.has_room(&descriptor) {
            region.is_full = true;
            return Err(StorageError::RegionFull { sensor });
        }

        let address = region.write_address(&descriptor);
        let end = address + sample.len() as u32;

        let erase_size = F::ERASE_SIZE as u32;
        let mut sector = address.div_ceil(erase_size) * erase_size;
        let erased = sector < end;
        while sector < end {
            debug!("{} storage: erasing sector 0x{:06x}", sensor, sector);
            self.flash
                .erase(sector, sector + erase_size)
                .map_err(flash_error)?;
            sector += erase_size;
        }

        if erased {
            if let Some(log_id) = region.current_log_id {
                let checkpoint = self.journal.checkpoint(
                    &mut self.flash,
                    sensor,
                    log_id,
                    descriptor.raw_sample_size,
                    region.write_cursor,
                    true,
                );
                if let Err(e) = checkpoint {
                    warn!("{} journal checkpoint lost: {}", sensor, e);
                }
            }
        }

        self.flash.write(address, sample).map_err(flash_error)?;
        region.advance(&descriptor);

        if region.is_full {
            warn!(
                "{} storage: region full after {} records",
                sensor,
                region.sample_count(&descriptor)
            );
        }
        Ok(())
    }

    /// Checkpoint the write cursor so a reboot finds every record without
    /// scanning.
    pub fn sync(&mut self, sensor: SensorType) -> Result<(), StorageError> {
        let region = self.regions[sensor.index()];
        let Some(log_id) = region.current_log_id else {
            return Ok(());
        };
        if !self.journal.is_behind(sensor, region.write_cursor) {
            return Ok(());
        }

        let raw_size = self.table[sensor.index()].raw_sample_size;
        self.journal.checkpoint(
            &mut self.flash,
            sensor,
            log_id,
            raw_size,
            region.write_cursor,
            false,
        )?;
        debug!("{} storage: synced at {}", sensor, region.write_cursor);
        Ok(())
    }

    /// Read record `index` of the current session into `out`.
    pub fn read_sample(
        &mut self,
        sensor: SensorType,
        index: u32,
        out: &mut [u8],
    ) -> Result<usize, StorageError> {
        let descriptor = self.table[sensor.index()];
        let region = &self.regions[sensor.index()];
        let size = descriptor.raw_sample_size;

        if index >= region.sample_count(&descriptor) {
            return Err(StorageError::NoSuchSample { sensor, index });
        }
        if out.len() < size {
            return Err(StorageError::SampleSizeMismatch {
                sensor,
                expected: size,
                actual: out.len(),
            });
        }

        let address = descriptor.storage.start_address + index * size as u32;
        self.flash
            .read(address, &mut out[..size])
            .map_err(flash_error)?;
        Ok(size)
    }

    /// Erase the whole region and rewind it. The session id is kept.
    pub fn format(&mut self, sensor: SensorType) -> Result<(), StorageError> {
        let descriptor = self.table[sensor.index()];
        let bounds = descriptor.storage;
        self.flash
            .erase(bounds.start_address, bounds.end_address())
            .map_err(flash_error)?;

        let region = &mut self.regions[sensor.index()];
        let log_id = region.current_log_id;
        region.reset(log_id);
        let raw_size = descriptor.raw_sample_size;
        match log_id {
            Some(log_id) => self.journal.begin(&mut self.flash, sensor, log_id, raw_size)?,
            None => self.journal.clear(&mut self.flash, sensor)?,
        }

        info!("{} storage: formatted", sensor);
        Ok(())
    }

    /// Replace the persisted config record with `payload`.
    ///
    /// The payload goes in before the header so a torn write reads back as
    /// no record at all.
    pub fn store_config_blob(&mut self, payload: &[u8]) -> Result<(), StorageError> {
        let capacity = (self.config.length - CONFIG_HEADER_SIZE) as usize;
        if payload.len() > capacity || payload.len() > u16::MAX as usize {
            return Err(StorageError::ConfigTooLarge {
                length: payload.len(),
                capacity,
            });
        }

        let mut padded: Vec<u8> = payload.to_vec();
        padded.resize(payload.len().next_multiple_of(F::WRITE_SIZE), 0xff);
        if padded.len() > capacity {
            return Err(StorageError::ConfigTooLarge {
                length: payload.len(),
                capacity,
            });
        }

        let start = self.config.start_address;
        self.flash
            .erase(start, self.config.end_address())
            .map_err(flash_error)?;
        self.flash
            .write(start + CONFIG_HEADER_SIZE, &padded)
            .map_err(flash_error)?;

        let length = (payload.len() as u16).to_le_bytes();
        let header = [CONFIG_MAGIC, 0xff, length[0], length[1]];
        self.flash.write(start, &header).map_err(flash_error)?;

        debug!("Config record of {} bytes stored", payload.len());
        Ok(())
    }

    /// The persisted config record, if one was ever stored.
    pub fn load_config_blob(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        let start = self.config.start_address;
        let mut header = [0u8; CONFIG_HEADER_SIZE as usize];
        self.flash.read(start, &mut header).map_err(flash_error)?;
        if header[0] != CONFIG_MAGIC {
            return Ok(None);
        }

        let length = u16::from_le_bytes([header[2], header[3]]) as usize;
        let read_length = length.next_multiple_of(F::READ_SIZE);
        if read_length > (self.config.length - CONFIG_HEADER_SIZE) as usize {
            warn!("Config record claims {} bytes, ignoring it", length);
            return Ok(None);
        }

        let mut payload = vec![0u8; read_length];
        self.flash
            .read(start + CONFIG_HEADER_SIZE, &mut payload)
            .map_err(flash_error)?;
        payload.truncate(length);
        Ok(Some(payload))
    }
}
