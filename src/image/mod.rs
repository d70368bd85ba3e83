pub(crate) mod space;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::constants::limits;
use crate::error::{AddressError, InvalidArgument};
use crate::types::{RecordWrite, UnitId};

pub use space::AddressSpace;

/// A file of records, each record holding a run of 16-bit registers.
/// Addressed by file number (0..=9999) rather than by position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordFile {
    number: u16,
    records: Vec<Vec<u16>>,
}

impl RecordFile {
    pub fn new(number: u16, records: Vec<Vec<u16>>) -> Result<Self, InvalidArgument> {
        if number > limits::MAX_FILE_NUMBER {
            return Err(InvalidArgument::FileNumberOutOfRange(number));
        }
        Ok(RecordFile { number, records })
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, index: u16) -> Result<&[u16], AddressError> {
        self.records
            .get(index as usize)
            .map(Vec::as_slice)
            .ok_or(AddressError::UnknownRecord(self.number, index))
    }

    /// Overwrite the leading registers of a record. The values must fit
    /// within the record's existing length.
    pub fn write_record(&mut self, index: u16, values: &[u16]) -> Result<(), AddressError> {
        let number = self.number;
        let record = self
            .records
            .get_mut(index as usize)
            .ok_or(AddressError::UnknownRecord(number, index))?;
        if values.len() > record.len() {
            return Err(AddressError::RangeOutOfBounds(
                index,
                values.len() as u16,
                record.len(),
            ));
        }
        record[..values.len()].copy_from_slice(values);
        Ok(())
    }
}

/// Bounded queue of registers read by the READ FIFO QUEUE function.
/// Holds at most 31 values; pushing into a full queue drops the oldest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fifo {
    address: u16,
    queue: VecDeque<u16>,
}

impl Fifo {
    pub const MAX_DEPTH: usize = limits::MAX_FIFO_COUNT;

    pub fn new(address: u16) -> Self {
        Fifo {
            address,
            queue: VecDeque::with_capacity(Self::MAX_DEPTH),
        }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn push(&mut self, value: u16) {
        if self.queue.len() == Self::MAX_DEPTH {
            self.queue.pop_front();
        }
        self.queue.push_back(value);
    }

    pub fn pop(&mut self) -> Option<u16> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Snapshot in oldest-first order. Reading does not drain the queue.
    pub fn registers(&self) -> Vec<u16> {
        self.queue.iter().copied().collect()
    }
}

/// In-memory data store a listener serves requests from.
///
/// Holds one address space per object kind. The whole image can be locked,
/// which freezes its shape: structural mutations silently do nothing and
/// the listener answers write requests with SERVER DEVICE BUSY.
pub struct ProcessImage {
    unit_id: UnitId,
    locked: Arc<AtomicBool>,
    discrete_inputs: AddressSpace<bool>,
    coils: AddressSpace<bool>,
    input_registers: AddressSpace<u16>,
    holding_registers: AddressSpace<u16>,
    files: AddressSpace<RecordFile>,
    fifos: AddressSpace<Fifo>,
}

impl ProcessImage {
    pub fn new(unit_id: UnitId) -> Self {
        let locked = Arc::new(AtomicBool::new(false));
        ProcessImage {
            unit_id,
            discrete_inputs: AddressSpace::new(locked.clone()),
            coils: AddressSpace::new(locked.clone()),
            input_registers: AddressSpace::new(locked.clone()),
            holding_registers: AddressSpace::new(locked.clone()),
            files: AddressSpace::new(locked.clone()),
            fifos: AddressSpace::new(locked.clone()),
            locked,
        }
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn discrete_inputs(&self) -> &AddressSpace<bool> {
        &self.discrete_inputs
    }

    pub fn coils(&self) -> &AddressSpace<bool> {
        &self.coils
    }

    pub fn input_registers(&self) -> &AddressSpace<u16> {
        &self.input_registers
    }

    pub fn holding_registers(&self) -> &AddressSpace<u16> {
        &self.holding_registers
    }

    pub fn files(&self) -> &AddressSpace<RecordFile> {
        &self.files
    }

    pub fn fifos(&self) -> &AddressSpace<Fifo> {
        &self.fifos
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Lock or unlock the image, returning whether the state changed.
    /// Locking an already locked image returns false.
    pub fn set_locked(&self, locked: bool) -> bool {
        self.locked
            .compare_exchange(!locked, locked, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Look up a file by its file number. A missing file is an error,
    /// unlike [`ProcessImage::fifo_by_address`].
    pub fn file_by_number(&self, number: u16) -> Result<RecordFile, AddressError> {
        if number > limits::MAX_FILE_NUMBER {
            return Err(AddressError::FileNumberOutOfRange(number));
        }
        self.files
            .find(|file| file.number() == number)
            .ok_or(AddressError::UnknownFileNumber(number))
    }

    /// Look up a FIFO by the register address it is published under
    pub fn fifo_by_address(&self, address: u16) -> Option<Fifo> {
        self.fifos.find(|fifo| fifo.address() == address)
    }

    /// Push a value into the FIFO published at `address`
    pub fn push_fifo(&self, address: u16, value: u16) -> bool {
        self.fifos
            .modify_first(|fifo| fifo.address() == address, |fifo| fifo.push(value))
            .is_some()
    }

    pub(crate) fn read_file_record(
        &self,
        file: u16,
        record: u16,
        length: u16,
    ) -> Result<Vec<u16>, AddressError> {
        let file = self.file_by_number(file)?;
        let registers = file.record(record)?;
        if length as usize > registers.len() {
            return Err(AddressError::RangeOutOfBounds(
                record,
                length,
                registers.len(),
            ));
        }
        Ok(registers[..length as usize].to_vec())
    }

    pub(crate) fn write_file_record(&self, write: &RecordWrite) -> Result<(), AddressError> {
        if write.file > limits::MAX_FILE_NUMBER {
            return Err(AddressError::FileNumberOutOfRange(write.file));
        }
        self.files
            .modify_first(
                |file| file.number() == write.file,
                |file| file.write_record(write.record, &write.values),
            )
            .ok_or(AddressError::UnknownFileNumber(write.file))?
    }
}
