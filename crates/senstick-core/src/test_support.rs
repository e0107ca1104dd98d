//! Fakes shared by the unit tests

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

use crate::bus::{BusError, SensorBus};
use crate::config::SensorSetting;
use crate::sensors::descriptor::{DescriptorTable, SensorDescriptor, StorageBounds};
use crate::sensors::{DESCRIPTORS, SensorDriver, SensorError, SensorType};
use crate::storage::MetadataLayout;

/// Register-map bus: reads return whatever was loaded for `(address, register)`.
#[derive(Default)]
pub(crate) struct FakeBus {
    pub registers: BTreeMap<(u8, u8), Vec<u8>>,
    pub writes: Vec<(u8, u8, Vec<u8>)>,
    pub reads: Vec<(u8, u8)>,
    pub failing: BTreeSet<u8>,
    /// Addresses whose writes fail while reads still succeed.
    pub failing_writes: BTreeSet<u8>,
    pub powered: bool,
    pub power_ups: usize,
    pub power_downs: usize,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn powered() -> Self {
        Self {
            powered: true,
            ..Self::default()
        }
    }

    pub fn load(&mut self, address: u8, register: u8, bytes: &[u8]) {
        self.registers.insert((address, register), bytes.to_vec());
    }

    pub fn fail(&mut self, address: u8) {
        self.failing.insert(address);
    }

    pub fn fail_writes(&mut self, address: u8) {
        self.failing_writes.insert(address);
    }

    pub fn heal(&mut self, address: u8) {
        self.failing.remove(&address);
        self.failing_writes.remove(&address);
    }

    pub fn written(&self, address: u8, register: u8) -> Vec<Vec<u8>> {
        self.writes
            .iter()
            .filter(|(a, r, _)| *a == address && *r == register)
            .map(|(_, _, data)| data.clone())
            .collect()
    }

    pub fn last_write(&self, address: u8, register: u8) -> Option<Vec<u8>> {
        self.written(address, register).pop()
    }

    fn check(&self, address: u8) -> Result<(), BusError> {
        if !self.powered {
            return Err(BusError::PoweredDown);
        }
        if self.failing.contains(&address) {
            return Err(BusError::Transfer {
                address,
                kind: ErrorKind::Other,
            });
        }
        Ok(())
    }
}

impl SensorBus for FakeBus {
    fn write_register(&mut self, address: u8, register: u8, data: &[u8]) -> Result<(), BusError> {
        self.check(address)?;
        if self.failing_writes.contains(&address) {
            return Err(BusError::Transfer {
                address,
                kind: ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            });
        }
        self.writes.push((address, register, data.to_vec()));
        Ok(())
    }

    fn read_register(
        &mut self,
        address: u8,
        register: u8,
        out: &mut [u8],
    ) -> Result<(), BusError> {
        self.check(address)?;
        self.reads.push((address, register));
        out.fill(0);
        if let Some(bytes) = self.registers.get(&(address, register)) {
            let n = bytes.len().min(out.len());
            out[..n].copy_from_slice(&bytes[..n]);
        }
        Ok(())
    }

    fn power_up(&mut self) -> Result<(), BusError> {
        if !self.powered {
            self.powered = true;
            self.power_ups += 1;
        }
        Ok(())
    }

    fn power_down(&mut self) -> Result<(), BusError> {
        if self.powered {
            self.powered = false;
            self.power_downs += 1;
        }
        Ok(())
    }

    fn delay_ms(&mut self, _ms: u32) {}
}

/// Observable side of a [`FakeDriver`], kept after the driver is boxed.
#[derive(Debug, Default)]
pub(crate) struct FakeDriverLog {
    pub inits: usize,
    pub wakes: usize,
    pub sleeps: usize,
    pub samples: usize,
    pub elapsed: Vec<u32>,
    pub fail_init: bool,
    pub fail_sample: bool,
    /// Number of calls that report "not ready" before each sample completes.
    pub conversion_calls: usize,
    pub pending: usize,
    pub next_value: u8,
}

/// Driver producing `raw_size` bytes of a rising counter on every completed sample.
pub(crate) struct FakeDriver {
    sensor: SensorType,
    raw_size: usize,
    pub log: Rc<RefCell<FakeDriverLog>>,
}

impl FakeDriver {
    pub fn new(sensor: SensorType, raw_size: usize) -> Self {
        Self {
            sensor,
            raw_size,
            log: Rc::new(RefCell::new(FakeDriverLog::default())),
        }
    }

    pub fn boxed(
        sensor: SensorType,
        raw_size: usize,
    ) -> (Box<dyn SensorDriver>, Rc<RefCell<FakeDriverLog>>) {
        let driver = Self::new(sensor, raw_size);
        let log = Rc::clone(&driver.log);
        (Box::new(driver), log)
    }
}

impl SensorDriver for FakeDriver {
    fn sensor_type(&self) -> SensorType {
        self.sensor
    }

    fn init(&mut self, _bus: &mut dyn SensorBus) -> Result<(), SensorError> {
        let mut log = self.log.borrow_mut();
        log.inits += 1;
        if log.fail_init {
            return Err(SensorError::InitializationFailed {
                sensor: "fake",
                details: "scripted init failure",
            });
        }
        Ok(())
    }

    fn set_wakeup(
        &mut self,
        _bus: &mut dyn SensorBus,
        should_wake: bool,
        _setting: &SensorSetting,
    ) -> Result<(), SensorError> {
        let mut log = self.log.borrow_mut();
        if should_wake {
            log.wakes += 1;
            log.pending = log.conversion_calls;
        } else {
            log.sleeps += 1;
        }
        Ok(())
    }

    fn sample(
        &mut self,
        _bus: &mut dyn SensorBus,
        out: &mut [u8],
        elapsed_ms: u32,
    ) -> Result<usize, SensorError> {
        let mut log = self.log.borrow_mut();
        log.elapsed.push(elapsed_ms);
        if log.fail_sample {
            return Err(SensorError::Bus {
                sensor: "fake",
                operation: "sample",
                error: BusError::Transfer {
                    address: 0,
                    kind: ErrorKind::Other,
                },
            });
        }
        if log.pending > 0 {
            log.pending -= 1;
            return Ok(0);
        }

        log.pending = log.conversion_calls;
        log.samples += 1;
        log.next_value = log.next_value.wrapping_add(1);
        out[..self.raw_size].fill(log.next_value);
        Ok(self.raw_size)
    }

    fn reduce_min_max(&self, is_max: bool, a: &[u8], b: &[u8], out: &mut [u8]) {
        for i in 0..self.raw_size {
            out[i] = if is_max { a[i].max(b[i]) } else { a[i].min(b[i]) };
        }
    }

    fn serialize_wire(&self, out: &mut [u8], raw: &[u8]) -> usize {
        out[..self.raw_size].copy_from_slice(&raw[..self.raw_size]);
        self.raw_size
    }
}

/// Journal slots of 256 bytes followed by a 256-byte config area.
pub(crate) const TEST_METADATA: MetadataLayout = MetadataLayout {
    journal: StorageBounds::new(0, 1536),
    config: StorageBounds::new(1536, 256),
};

/// The production table with every region shrunk to `capacity` samples,
/// packed back to back right after [`TEST_METADATA`].
pub(crate) fn compact_descriptors(capacities: [u32; 6]) -> DescriptorTable {
    let mut next = TEST_METADATA.config.end_address();
    DESCRIPTORS.map(|d| {
        let length = capacities[d.sensor.index()] * d.raw_sample_size as u32;
        let storage = StorageBounds::new(next, length);
        next += length;
        SensorDescriptor { storage, ..d }
    })
}

/// Total bytes spanned by a table built with [`compact_descriptors`].
pub(crate) fn table_extent(table: &DescriptorTable) -> usize {
    table
        .iter()
        .map(|d| d.storage.end_address() as usize)
        .max()
        .unwrap_or(0)
}
