// cSpell: disable
//! Address map of the external 128 Mbit NOR flash.
//!
//! Each sensor owns one disjoint, sector-aligned range. Sizes are chosen so
//! every region holds a whole number of native samples.

pub const FLASH_CAPACITY: u32 = 0x100_0000;
pub const FLASH_SECTOR_SIZE: u32 = 0x1000;

use crate::sensors::descriptor::StorageBounds;

pub const METADATA_STORAGE_START_ADDRESS: u32 = 0x00_0000;
pub const METADATA_STORAGE_SIZE: u32 = 0x1_0000;

/// Per-sensor session journals, two sectors each.
pub const SESSION_JOURNAL_START_ADDRESS: u32 = METADATA_STORAGE_START_ADDRESS;
pub const SESSION_JOURNAL_SIZE: u32 = 0xc000;

/// Persisted controller configuration.
pub const CONFIG_STORAGE_START_ADDRESS: u32 =
    SESSION_JOURNAL_START_ADDRESS + SESSION_JOURNAL_SIZE;
pub const CONFIG_STORAGE_SIZE: u32 = 0x1000;

// The rest of the metadata area is the log directory of the log-count
// collaborator.

pub const ACCELERATION_SENSOR_STORAGE_START_ADDRESS: u32 =
    METADATA_STORAGE_START_ADDRESS + METADATA_STORAGE_SIZE;
pub const ACCELERATION_SENSOR_STORAGE_SIZE: u32 = 0x3c_0000;

pub const GYRO_SENSOR_STORAGE_START_ADDRESS: u32 =
    ACCELERATION_SENSOR_STORAGE_START_ADDRESS + ACCELERATION_SENSOR_STORAGE_SIZE;
pub const GYRO_SENSOR_STORAGE_SIZE: u32 = 0x3c_0000;

pub const MAGNETIC_SENSOR_STORAGE_START_ADDRESS: u32 =
    GYRO_SENSOR_STORAGE_START_ADDRESS + GYRO_SENSOR_STORAGE_SIZE;
pub const MAGNETIC_SENSOR_STORAGE_SIZE: u32 = 0x3c_0000;

pub const HUMIDITY_SENSOR_STORAGE_START_ADDRESS: u32 =
    MAGNETIC_SENSOR_STORAGE_START_ADDRESS + MAGNETIC_SENSOR_STORAGE_SIZE;
pub const HUMIDITY_SENSOR_STORAGE_SIZE: u32 = 0x18_0000;

pub const PRESSURE_SENSOR_STORAGE_START_ADDRESS: u32 =
    HUMIDITY_SENSOR_STORAGE_START_ADDRESS + HUMIDITY_SENSOR_STORAGE_SIZE;
pub const PRESSURE_SENSOR_STORAGE_SIZE: u32 = 0x18_0000;

pub const BRIGHTNESS_SENSOR_STORAGE_START_ADDRESS: u32 =
    PRESSURE_SENSOR_STORAGE_START_ADDRESS + PRESSURE_SENSOR_STORAGE_SIZE;
pub const BRIGHTNESS_SENSOR_STORAGE_SIZE: u32 = 0x18_0000;

pub const BRIGHTNESS_SENSOR_STORAGE_END_ADDRESS: u32 =
    BRIGHTNESS_SENSOR_STORAGE_START_ADDRESS + BRIGHTNESS_SENSOR_STORAGE_SIZE;

const _: () = assert!(BRIGHTNESS_SENSOR_STORAGE_END_ADDRESS <= FLASH_CAPACITY);
const _: () = assert!(ACCELERATION_SENSOR_STORAGE_START_ADDRESS % FLASH_SECTOR_SIZE == 0);
const _: () = assert!(ACCELERATION_SENSOR_STORAGE_SIZE % FLASH_SECTOR_SIZE == 0);
const _: () = assert!(HUMIDITY_SENSOR_STORAGE_SIZE % FLASH_SECTOR_SIZE == 0);
const _: () = assert!(
    CONFIG_STORAGE_START_ADDRESS + CONFIG_STORAGE_SIZE
        <= METADATA_STORAGE_START_ADDRESS + METADATA_STORAGE_SIZE
);

/// Where the allocator keeps its own bookkeeping, outside every log region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataLayout {
    pub journal: StorageBounds,
    pub config: StorageBounds,
}

pub const METADATA_LAYOUT: MetadataLayout = MetadataLayout {
    journal: StorageBounds::new(SESSION_JOURNAL_START_ADDRESS, SESSION_JOURNAL_SIZE),
    config: StorageBounds::new(CONFIG_STORAGE_START_ADDRESS, CONFIG_STORAGE_SIZE),
};
