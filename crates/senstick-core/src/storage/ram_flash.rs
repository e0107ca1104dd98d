//! RAM-backed NOR flash for the simulator and tests
//!
//! Behaves like real NOR: erased bytes read as `0xff` and a write can only
//! clear bits, so writing over unerased data corrupts it the same way the
//! device would.

use alloc::vec;
use alloc::vec::Vec;

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash, check_erase, check_read, check_write,
};

pub struct RamFlash<const SECTOR: usize> {
    memory: Vec<u8>,
    erase_count: usize,
    write_count: usize,
}

impl<const SECTOR: usize> RamFlash<SECTOR> {
    /// A fully erased device of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            memory: vec![0xff; capacity],
            erase_count: 0,
            write_count: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.memory
    }

    /// Number of sectors erased so far.
    pub fn erase_count(&self) -> usize {
        self.erase_count
    }

    pub fn write_count(&self) -> usize {
        self.write_count
    }
}

impl<const SECTOR: usize> ErrorType for RamFlash<SECTOR> {
    type Error = NorFlashErrorKind;
}

impl<const SECTOR: usize> ReadNorFlash for RamFlash<SECTOR> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.memory[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.memory.len()
    }
}

impl<const SECTOR: usize> NorFlash for RamFlash<SECTOR> {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = SECTOR;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        self.memory[from as usize..to as usize].fill(0xff);
        self.erase_count += (to - from) as usize / SECTOR;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        let start = offset as usize;
        for (cell, byte) in self.memory[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= byte;
        }
        self.write_count += 1;
        Ok(())
    }
}
