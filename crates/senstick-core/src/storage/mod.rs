pub mod allocator;
mod journal;
pub mod layout;
pub mod ram_flash;
pub mod region;

use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};
use log::error;
use thiserror_no_std::Error;

use crate::sensors::SensorType;

pub use allocator::StorageRegionAllocator;
pub use layout::{METADATA_LAYOUT, MetadataLayout};
pub use ram_flash::RamFlash;
pub use region::StorageRegion;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("{sensor} storage region is full")]
    RegionFull { sensor: SensorType },
    #[error("flash operation failed: {0:?}")]
    Flash(NorFlashErrorKind),
    #[error("{sensor} records are {expected} bytes, got {actual}")]
    SampleSizeMismatch {
        sensor: SensorType,
        expected: usize,
        actual: usize,
    },
    #[error("{sensor} region is not aligned to the flash geometry")]
    Misaligned { sensor: SensorType },
    #[error("{sensor} region lies outside the flash device")]
    OutOfBounds { sensor: SensorType },
    #[error("{sensor} has no record {index} in the current session")]
    NoSuchSample { sensor: SensorType, index: u32 },
    #[error("journal or config area does not fit the flash layout")]
    MetadataLayout,
    #[error("config record of {length} bytes does not fit in {capacity} bytes")]
    ConfigTooLarge { length: usize, capacity: usize },
}

pub(crate) fn flash_error<E: NorFlashError>(e: E) -> StorageError {
    let kind = e.kind();
    error!("Flash operation failed: {:?}", kind);
    StorageError::Flash(kind)
}
