use crate::common::bits::{num_bytes_for_bits, num_bytes_for_registers, pack_bits, unpack_bits};
use crate::common::cursor::{ReadCursor, WriteCursor};

pub use crate::common::function::FunctionCode;
use crate::constants::{coil, limits};
use crate::error::{AduParseError, InternalError, InvalidArgument, RequestError};
use crate::exception::ExceptionCode;
use crate::framing::SerializePdu;
use crate::types::{AddressRange, Indexed, RecordRef, RecordWrite, WriteMultiple};

/// Maximum number of sub-requests in a read file record request so that
/// the PDU stays within the maximum ADU size
const MAX_READ_RECORD_REFS: usize = 35;

/// A request PDU, one variant per supported function code
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    ReadCoils(AddressRange),
    ReadDiscreteInputs(AddressRange),
    ReadHoldingRegisters(AddressRange),
    ReadInputRegisters(AddressRange),
    WriteSingleCoil(Indexed<bool>),
    WriteSingleRegister(Indexed<u16>),
    WriteMultipleCoils(WriteMultiple<bool>),
    WriteMultipleRegisters(WriteMultiple<u16>),
    ReadFileRecord(Vec<RecordRef>),
    WriteFileRecord(Vec<RecordWrite>),
    ReadFifoQueue(u16),
}

impl Request {
    pub fn function(&self) -> FunctionCode {
        match self {
            Request::ReadCoils(_) => FunctionCode::ReadCoils,
            Request::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Request::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Request::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Request::WriteMultipleCoils(_) => FunctionCode::WriteMultipleCoils,
            Request::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
            Request::ReadFileRecord(_) => FunctionCode::ReadFileRecord,
            Request::WriteFileRecord(_) => FunctionCode::WriteFileRecord,
            Request::ReadFifoQueue(_) => FunctionCode::ReadFifoQueue,
        }
    }

    /// Validate the parts of a request that the constructors of the
    /// argument types cannot enforce on their own
    pub(crate) fn validate(&self) -> Result<(), InvalidArgument> {
        match self {
            Request::ReadCoils(range) | Request::ReadDiscreteInputs(range) => {
                range.limited_to(limits::MAX_READ_COILS_COUNT)?;
            }
            Request::ReadHoldingRegisters(range) | Request::ReadInputRegisters(range) => {
                range.limited_to(limits::MAX_READ_REGISTERS_COUNT)?;
            }
            Request::WriteSingleCoil(_) | Request::WriteSingleRegister(_) => {}
            Request::WriteMultipleCoils(write) => {
                write.range().limited_to(limits::MAX_WRITE_COILS_COUNT)?;
            }
            Request::WriteMultipleRegisters(write) => {
                write
                    .range()
                    .limited_to(limits::MAX_WRITE_REGISTERS_COUNT)?;
            }
            Request::ReadFileRecord(refs) => {
                if refs.is_empty() {
                    return Err(InvalidArgument::CountOfZero);
                }
                if refs.len() > MAX_READ_RECORD_REFS {
                    return Err(InvalidArgument::CountTooBigForType(
                        refs.len() as u16,
                        MAX_READ_RECORD_REFS as u16,
                    ));
                }
                // the response byte count field is a single byte
                let response_len: usize = refs.iter().map(|r| 2 + 2 * r.length as usize).sum();
                if response_len > u8::MAX as usize {
                    return Err(InvalidArgument::CountTooBigForType(
                        u16::try_from(response_len).unwrap_or(u16::MAX),
                        u8::MAX as u16,
                    ));
                }
            }
            Request::WriteFileRecord(writes) => {
                if writes.is_empty() {
                    return Err(InvalidArgument::CountOfZero);
                }
                let data_len: usize = writes.iter().map(|w| 7 + 2 * w.values.len()).sum();
                if data_len > u8::MAX as usize {
                    return Err(InvalidArgument::CountTooBigForType(
                        data_len as u16,
                        u8::MAX as u16,
                    ));
                }
            }
            Request::ReadFifoQueue(_) => {}
        }
        Ok(())
    }

    fn serialize_body(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        match self {
            Request::ReadCoils(range)
            | Request::ReadDiscreteInputs(range)
            | Request::ReadHoldingRegisters(range)
            | Request::ReadInputRegisters(range) => {
                cursor.write_u16_be(range.start)?;
                cursor.write_u16_be(range.count)?;
            }
            Request::WriteSingleCoil(value) => {
                cursor.write_u16_be(value.index)?;
                cursor.write_u16_be(coil_to_u16(value.value))?;
            }
            Request::WriteSingleRegister(value) => {
                cursor.write_u16_be(value.index)?;
                cursor.write_u16_be(value.value)?;
            }
            Request::WriteMultipleCoils(write) => {
                let range = write.range();
                cursor.write_u16_be(range.start)?;
                cursor.write_u16_be(range.count)?;
                cursor.write_u8(byte_count(num_bytes_for_bits(range.count))?)?;
                pack_bits(&write.values, cursor)?;
            }
            Request::WriteMultipleRegisters(write) => {
                let range = write.range();
                cursor.write_u16_be(range.start)?;
                cursor.write_u16_be(range.count)?;
                cursor.write_u8(byte_count(num_bytes_for_registers(range.count))?)?;
                for register in &write.values {
                    cursor.write_u16_be(*register)?;
                }
            }
            Request::ReadFileRecord(refs) => {
                cursor.write_u8(byte_count(7 * refs.len())?)?;
                for record in refs {
                    cursor.write_u8(limits::FILE_REFERENCE_TYPE)?;
                    cursor.write_u16_be(record.file)?;
                    cursor.write_u16_be(record.record)?;
                    cursor.write_u16_be(record.length)?;
                }
            }
            Request::WriteFileRecord(writes) => {
                let data_len: usize = writes.iter().map(|w| 7 + 2 * w.values.len()).sum();
                cursor.write_u8(byte_count(data_len)?)?;
                for write in writes {
                    cursor.write_u8(limits::FILE_REFERENCE_TYPE)?;
                    cursor.write_u16_be(write.file)?;
                    cursor.write_u16_be(write.record)?;
                    cursor.write_u16_be(write.values.len() as u16)?;
                    for register in &write.values {
                        cursor.write_u16_be(*register)?;
                    }
                }
            }
            Request::ReadFifoQueue(address) => {
                cursor.write_u16_be(*address)?;
            }
        }
        Ok(())
    }

    /// Parse a request PDU body as a responder would
    pub(crate) fn parse(
        function: FunctionCode,
        cursor: &mut ReadCursor,
    ) -> Result<Self, RequestError> {
        let request = match function {
            FunctionCode::ReadCoils => {
                Request::ReadCoils(parse_address_range(cursor)?)
            }
            FunctionCode::ReadDiscreteInputs => {
                Request::ReadDiscreteInputs(parse_address_range(cursor)?)
            }
            FunctionCode::ReadHoldingRegisters => {
                Request::ReadHoldingRegisters(parse_address_range(cursor)?)
            }
            FunctionCode::ReadInputRegisters => {
                Request::ReadInputRegisters(parse_address_range(cursor)?)
            }
            FunctionCode::WriteSingleCoil => {
                let index = cursor.read_u16_be()?;
                let value = coil_from_u16(cursor.read_u16_be()?)?;
                Request::WriteSingleCoil(Indexed::new(index, value))
            }
            FunctionCode::WriteSingleRegister => {
                let index = cursor.read_u16_be()?;
                let value = cursor.read_u16_be()?;
                Request::WriteSingleRegister(Indexed::new(index, value))
            }
            FunctionCode::WriteMultipleCoils => {
                let range = parse_address_range(cursor)?;
                let byte_count = cursor.read_u8()? as usize;
                if byte_count != num_bytes_for_bits(range.count) {
                    return Err(AduParseError::CountMismatch(
                        byte_count,
                        num_bytes_for_bits(range.count),
                    )
                    .into());
                }
                let bytes = cursor.read_bytes(byte_count)?;
                Request::WriteMultipleCoils(WriteMultiple {
                    start: range.start,
                    values: unpack_bits(bytes, range.count),
                })
            }
            FunctionCode::WriteMultipleRegisters => {
                let range = parse_address_range(cursor)?;
                let byte_count = cursor.read_u8()? as usize;
                if byte_count != num_bytes_for_registers(range.count) {
                    return Err(AduParseError::CountMismatch(
                        byte_count,
                        num_bytes_for_registers(range.count),
                    )
                    .into());
                }
                let mut values = Vec::with_capacity(range.count as usize);
                for _ in 0..range.count {
                    values.push(cursor.read_u16_be()?);
                }
                Request::WriteMultipleRegisters(WriteMultiple {
                    start: range.start,
                    values,
                })
            }
            FunctionCode::ReadFileRecord => {
                let byte_count = cursor.read_u8()? as usize;
                if byte_count != cursor.len() {
                    return Err(
                        AduParseError::InsufficientBytesForByteCount(byte_count, cursor.len())
                            .into(),
                    );
                }
                if byte_count % 7 != 0 {
                    return Err(AduParseError::CountMismatch(byte_count, 7).into());
                }
                let mut refs = Vec::with_capacity(byte_count / 7);
                for _ in 0..byte_count / 7 {
                    expect_reference_type(cursor)?;
                    let file = cursor.read_u16_be()?;
                    let record = cursor.read_u16_be()?;
                    let length = cursor.read_u16_be()?;
                    refs.push(RecordRef::try_from(file, record, length)?);
                }
                Request::ReadFileRecord(refs)
            }
            FunctionCode::WriteFileRecord => {
                let byte_count = cursor.read_u8()? as usize;
                if byte_count != cursor.len() {
                    return Err(
                        AduParseError::InsufficientBytesForByteCount(byte_count, cursor.len())
                            .into(),
                    );
                }
                let mut writes = Vec::new();
                while !cursor.is_empty() {
                    expect_reference_type(cursor)?;
                    let file = cursor.read_u16_be()?;
                    let record = cursor.read_u16_be()?;
                    let length = cursor.read_u16_be()? as usize;
                    let mut values = Vec::with_capacity(length);
                    for _ in 0..length {
                        values.push(cursor.read_u16_be()?);
                    }
                    writes.push(RecordWrite::try_from(file, record, values)?);
                }
                Request::WriteFileRecord(writes)
            }
            FunctionCode::ReadFifoQueue => Request::ReadFifoQueue(cursor.read_u16_be()?),
        };
        cursor.expect_empty()?;
        Ok(request)
    }

    /// Interpret a response PDU (function code included) as the answer to
    /// this request
    pub(crate) fn parse_response(&self, payload: &[u8]) -> Result<Response, RequestError> {
        let mut cursor = ReadCursor::new(payload);
        let function = self.function();
        let received = cursor.read_u8()?;

        if received == function.as_error() {
            let code = ExceptionCode::from(cursor.read_u8()?);
            cursor.expect_empty()?;
            return Err(RequestError::Exception(code));
        }
        if received != function.get_value() {
            return Err(AduParseError::UnknownResponseFunction(
                received,
                function.get_value(),
                function.as_error(),
            )
            .into());
        }

        let response = match self {
            Request::ReadCoils(range) | Request::ReadDiscreteInputs(range) => {
                let byte_count = cursor.read_u8()? as usize;
                if byte_count != num_bytes_for_bits(range.count) {
                    return Err(AduParseError::CountMismatch(
                        byte_count,
                        num_bytes_for_bits(range.count),
                    )
                    .into());
                }
                let bytes = cursor.read_bytes(byte_count)?;
                Response::Bits(unpack_bits(bytes, range.count))
            }
            Request::ReadHoldingRegisters(range) | Request::ReadInputRegisters(range) => {
                let byte_count = cursor.read_u8()? as usize;
                if byte_count != num_bytes_for_registers(range.count) {
                    return Err(AduParseError::CountMismatch(
                        byte_count,
                        num_bytes_for_registers(range.count),
                    )
                    .into());
                }
                let mut values = Vec::with_capacity(range.count as usize);
                for _ in 0..range.count {
                    values.push(cursor.read_u16_be()?);
                }
                Response::Registers(values)
            }
            Request::WriteSingleCoil(request) => {
                let index = cursor.read_u16_be()?;
                let value = coil_from_u16(cursor.read_u16_be()?)?;
                if Indexed::new(index, value) != *request {
                    return Err(AduParseError::ReplyEchoMismatch.into());
                }
                Response::EchoBit(Indexed::new(index, value))
            }
            Request::WriteSingleRegister(request) => {
                let index = cursor.read_u16_be()?;
                let value = cursor.read_u16_be()?;
                if Indexed::new(index, value) != *request {
                    return Err(AduParseError::ReplyEchoMismatch.into());
                }
                Response::EchoRegister(Indexed::new(index, value))
            }
            Request::WriteMultipleCoils(write) => {
                Response::WrittenRange(parse_echoed_range(&mut cursor, write.range())?)
            }
            Request::WriteMultipleRegisters(write) => {
                Response::WrittenRange(parse_echoed_range(&mut cursor, write.range())?)
            }
            Request::ReadFileRecord(refs) => {
                let byte_count = cursor.read_u8()? as usize;
                if byte_count != cursor.len() {
                    return Err(
                        AduParseError::InsufficientBytesForByteCount(byte_count, cursor.len())
                            .into(),
                    );
                }
                let mut records = Vec::with_capacity(refs.len());
                for reference in refs {
                    let response_length = cursor.read_u8()? as usize;
                    expect_reference_type(&mut cursor)?;
                    if response_length % 2 != 1 {
                        return Err(AduParseError::CountMismatch(response_length, 1).into());
                    }
                    let register_count = (response_length - 1) / 2;
                    if register_count != reference.length as usize {
                        return Err(AduParseError::CountMismatch(
                            register_count,
                            reference.length as usize,
                        )
                        .into());
                    }
                    let mut values = Vec::with_capacity(register_count);
                    for _ in 0..register_count {
                        values.push(cursor.read_u16_be()?);
                    }
                    records.push(values);
                }
                Response::FileRecords(records)
            }
            Request::WriteFileRecord(writes) => {
                // the reply echoes the whole request
                let echoed = Request::parse(FunctionCode::WriteFileRecord, &mut cursor)?;
                match echoed {
                    Request::WriteFileRecord(echoed) if echoed == *writes => {
                        Response::WrittenRecords(echoed)
                    }
                    _ => return Err(AduParseError::ReplyEchoMismatch.into()),
                }
            }
            Request::ReadFifoQueue(_) => {
                let byte_count = cursor.read_u16_be()? as usize;
                let fifo_count = cursor.read_u16_be()? as usize;
                if byte_count != 2 * (fifo_count + 1) {
                    return Err(
                        AduParseError::CountMismatch(byte_count, 2 * (fifo_count + 1)).into(),
                    );
                }
                if fifo_count > limits::MAX_FIFO_COUNT {
                    return Err(
                        AduParseError::CountMismatch(fifo_count, limits::MAX_FIFO_COUNT).into(),
                    );
                }
                let mut values = Vec::with_capacity(fifo_count);
                for _ in 0..fifo_count {
                    values.push(cursor.read_u16_be()?);
                }
                Response::FifoQueue(values)
            }
        };

        cursor.expect_empty()?;
        Ok(response)
    }
}

impl SerializePdu for Request {
    fn serialize_pdu(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8(self.function().get_value())?;
        self.serialize_body(cursor)
    }
}

/// A response PDU produced by a responder or returned to a master
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// Coil or discrete input states, in request order
    Bits(Vec<bool>),
    /// Holding or input register values, in request order
    Registers(Vec<u16>),
    /// Echo of a write single coil request
    EchoBit(Indexed<bool>),
    /// Echo of a write single register request
    EchoRegister(Indexed<u16>),
    /// Range acknowledged by a write multiple request
    WrittenRange(AddressRange),
    /// Register runs returned by a read file record request
    FileRecords(Vec<Vec<u16>>),
    /// Echo of a write file record request
    WrittenRecords(Vec<RecordWrite>),
    /// FIFO contents, oldest first
    FifoQueue(Vec<u16>),
}

impl Response {
    fn serialize_body(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        match self {
            Response::Bits(values) => {
                cursor.write_u8(byte_count(num_bytes_for_bits(values.len() as u16))?)?;
                pack_bits(values, cursor)?;
            }
            Response::Registers(values) => {
                cursor.write_u8(byte_count(num_bytes_for_registers(values.len() as u16))?)?;
                for register in values {
                    cursor.write_u16_be(*register)?;
                }
            }
            Response::EchoBit(value) => {
                cursor.write_u16_be(value.index)?;
                cursor.write_u16_be(coil_to_u16(value.value))?;
            }
            Response::EchoRegister(value) => {
                cursor.write_u16_be(value.index)?;
                cursor.write_u16_be(value.value)?;
            }
            Response::WrittenRange(range) => {
                cursor.write_u16_be(range.start)?;
                cursor.write_u16_be(range.count)?;
            }
            Response::FileRecords(records) => {
                let data_len: usize = records.iter().map(|r| 2 + 2 * r.len()).sum();
                cursor.write_u8(byte_count(data_len)?)?;
                for record in records {
                    cursor.write_u8(byte_count(1 + 2 * record.len())?)?;
                    cursor.write_u8(limits::FILE_REFERENCE_TYPE)?;
                    for register in record {
                        cursor.write_u16_be(*register)?;
                    }
                }
            }
            Response::WrittenRecords(writes) => {
                let data_len: usize = writes.iter().map(|w| 7 + 2 * w.values.len()).sum();
                cursor.write_u8(byte_count(data_len)?)?;
                for write in writes {
                    cursor.write_u8(limits::FILE_REFERENCE_TYPE)?;
                    cursor.write_u16_be(write.file)?;
                    cursor.write_u16_be(write.record)?;
                    cursor.write_u16_be(write.values.len() as u16)?;
                    for register in &write.values {
                        cursor.write_u16_be(*register)?;
                    }
                }
            }
            Response::FifoQueue(values) => {
                cursor.write_u16_be((2 * (values.len() + 1)) as u16)?;
                cursor.write_u16_be(values.len() as u16)?;
                for register in values {
                    cursor.write_u16_be(*register)?;
                }
            }
        }
        Ok(())
    }
}

/// A response paired with the function code of the request it answers
pub(crate) struct ResponseMessage<'a> {
    pub(crate) function: FunctionCode,
    pub(crate) response: &'a Response,
}

impl SerializePdu for ResponseMessage<'_> {
    fn serialize_pdu(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8(self.function.get_value())?;
        self.response.serialize_body(cursor)
    }
}

/// An exception reply carrying the raw function code of the offending request
pub(crate) struct ExceptionMessage {
    pub(crate) function: u8,
    pub(crate) code: ExceptionCode,
}

impl SerializePdu for ExceptionMessage {
    fn serialize_pdu(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8(self.function | crate::common::function::constants::ERROR_DELIMITER)?;
        cursor.write_u8(self.code.into())?;
        Ok(())
    }
}

/// Checked conversion for the single-byte count fields of the protocol
fn byte_count(len: usize) -> Result<u8, RequestError> {
    u8::try_from(len).map_err(|_| RequestError::Internal(InternalError::BadByteCount(len)))
}

fn coil_to_u16(value: bool) -> u16 {
    if value {
        coil::ON
    } else {
        coil::OFF
    }
}

fn coil_from_u16(value: u16) -> Result<bool, AduParseError> {
    match value {
        coil::ON => Ok(true),
        coil::OFF => Ok(false),
        other => Err(AduParseError::UnknownCoilState(other)),
    }
}

fn parse_address_range(cursor: &mut ReadCursor) -> Result<AddressRange, RequestError> {
    let start = cursor.read_u16_be()?;
    let count = cursor.read_u16_be()?;
    Ok(AddressRange::try_from(start, count)?)
}

fn parse_echoed_range(
    cursor: &mut ReadCursor,
    expected: AddressRange,
) -> Result<AddressRange, RequestError> {
    let range = parse_address_range(cursor)?;
    if range != expected {
        return Err(AduParseError::ReplyEchoMismatch.into());
    }
    Ok(range)
}

fn expect_reference_type(cursor: &mut ReadCursor) -> Result<(), RequestError> {
    let reference_type = cursor.read_u8()?;
    if reference_type != limits::FILE_REFERENCE_TYPE {
        return Err(AduParseError::BadReferenceType(reference_type).into());
    }
    Ok(())
}
