use crate::constants::limits;
use crate::error::InvalidArgument;

/// Modbus unit identifier, a type-safe wrapper around `u8`
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnitId {
    value: u8,
}

impl UnitId {
    pub const fn new(value: u8) -> Self {
        UnitId { value }
    }

    /// The broadcast address (0) defined by the serial line spec
    pub const fn broadcast() -> Self {
        UnitId { value: 0 }
    }

    pub const fn value(self) -> u8 {
        self.value
    }
}

impl From<u8> for UnitId {
    fn from(value: u8) -> Self {
        UnitId::new(value)
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04X}", self.value)
    }
}

/// Start/count pair used when reading or writing consecutive objects.
/// Cannot be constructed with a zero count or a range that overflows
/// the 16-bit address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressRange {
    /// Starting address of the range
    pub start: u16,
    /// Count of elements in the range
    pub count: u16,
}

impl AddressRange {
    pub fn try_from(start: u16, count: u16) -> Result<Self, InvalidArgument> {
        if count == 0 {
            return Err(InvalidArgument::CountOfZero);
        }

        // start + count - 1 must remain representable as u16
        if (start as u32) + (count as u32) > 65536 {
            return Err(InvalidArgument::AddressOverflow(start, count));
        }

        Ok(AddressRange { start, count })
    }

    pub(crate) fn limited_to(self, max: u16) -> Result<Self, InvalidArgument> {
        if self.count > max {
            return Err(InvalidArgument::CountTooBigForType(self.count, max));
        }
        Ok(self)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        let start = self.start;
        // start + count - 1 fits in u16, validated at construction
        (0..self.count).map(move |offset| start + offset)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "start: {} count: {}", self.start, self.count)
    }
}

/// Value paired with its address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Indexed<T> {
    /// Address of the value
    pub index: u16,
    /// Associated value
    pub value: T,
}

impl<T> Indexed<T> {
    pub fn new(index: u16, value: T) -> Self {
        Indexed { index, value }
    }
}

/// Collection of values to be written starting at a particular address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteMultiple<T> {
    /// Starting address
    pub start: u16,
    /// Values to write at consecutive addresses
    pub values: Vec<T>,
}

impl<T> WriteMultiple<T> {
    pub fn try_from(start: u16, values: Vec<T>) -> Result<Self, InvalidArgument> {
        let count = match u16::try_from(values.len()) {
            Ok(count) => count,
            Err(_) => {
                return Err(InvalidArgument::CountTooBigForType(
                    u16::MAX,
                    limits::MAX_WRITE_REGISTERS_COUNT,
                ))
            }
        };
        AddressRange::try_from(start, count)?;
        Ok(WriteMultiple { start, values })
    }

    pub fn range(&self) -> AddressRange {
        // the constructor has already validated start/count
        AddressRange {
            start: self.start,
            count: self.values.len() as u16,
        }
    }
}

/// Reference to one record of a record file (reference type 6)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordRef {
    /// File number, 0..=9999
    pub file: u16,
    /// Record number within the file
    pub record: u16,
    /// Number of registers to read from the record
    pub length: u16,
}

impl RecordRef {
    pub fn try_from(file: u16, record: u16, length: u16) -> Result<Self, InvalidArgument> {
        if file > limits::MAX_FILE_NUMBER {
            return Err(InvalidArgument::FileNumberOutOfRange(file));
        }
        Ok(RecordRef {
            file,
            record,
            length,
        })
    }
}

/// Registers to be written into one record of a record file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordWrite {
    /// File number, 0..=9999
    pub file: u16,
    /// Record number within the file
    pub record: u16,
    /// Register values to store in the record
    pub values: Vec<u16>,
}

impl RecordWrite {
    pub fn try_from(file: u16, record: u16, values: Vec<u16>) -> Result<Self, InvalidArgument> {
        if file > limits::MAX_FILE_NUMBER {
            return Err(InvalidArgument::FileNumberOutOfRange(file));
        }
        Ok(RecordWrite {
            file,
            record,
            values,
        })
    }
}
