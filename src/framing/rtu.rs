use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::frame::{Frame, FrameHeader, MAX_ADU_LENGTH};
use crate::common::function::FunctionCode;
use crate::error::{FrameParseError, RequestError};
use crate::framing::SerializePdu;
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 1;
    pub(crate) const FUNCTION_CODE_LENGTH: usize = 1;
    pub(crate) const CRC_LENGTH: usize = 2;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::common::frame::MAX_ADU_LENGTH + CRC_LENGTH;
}

/// precomputes the CRC table as a constant!
pub(crate) const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

#[derive(Clone, Copy)]
enum ParserType {
    Request,
    Response,
}

#[derive(Clone, Copy)]
enum ParseState {
    Start,
    ReadFullBody(UnitId, usize),           // unit id, length of rest
    ReadToOffsetForLength(UnitId, usize),  // unit id, offset of the length byte
}

#[derive(Clone, Copy)]
enum LengthMode {
    /// The length is always the same (without function code)
    Fixed(usize),
    /// You need to read X more bytes. The last byte contains the number of extra bytes to read after that
    Offset(usize),
    /// Unknown function code, can't determine the size
    Unknown,
}

pub(crate) struct RtuParser {
    state: ParseState,
    parser_type: ParserType,
}

impl RtuParser {
    pub(crate) fn new_request_parser() -> Self {
        Self {
            state: ParseState::Start,
            parser_type: ParserType::Request,
        }
    }

    pub(crate) fn new_response_parser() -> Self {
        Self {
            state: ParseState::Start,
            parser_type: ParserType::Response,
        }
    }

    // Returns how to calculate the length of the body
    fn length_mode(&self, function_code: u8) -> LengthMode {
        // Check exception (only valid for responses)
        if matches!(self.parser_type, ParserType::Response) && function_code & 0x80 != 0 {
            return LengthMode::Fixed(1);
        }

        let function_code = match FunctionCode::get(function_code) {
            Some(code) => code,
            None => return LengthMode::Unknown,
        };

        match self.parser_type {
            ParserType::Request => match function_code {
                FunctionCode::ReadCoils => LengthMode::Fixed(4),
                FunctionCode::ReadDiscreteInputs => LengthMode::Fixed(4),
                FunctionCode::ReadHoldingRegisters => LengthMode::Fixed(4),
                FunctionCode::ReadInputRegisters => LengthMode::Fixed(4),
                FunctionCode::WriteSingleCoil => LengthMode::Fixed(4),
                FunctionCode::WriteSingleRegister => LengthMode::Fixed(4),
                FunctionCode::WriteMultipleCoils => LengthMode::Offset(5),
                FunctionCode::WriteMultipleRegisters => LengthMode::Offset(5),
                FunctionCode::ReadFileRecord => LengthMode::Offset(1),
                FunctionCode::WriteFileRecord => LengthMode::Offset(1),
                FunctionCode::ReadFifoQueue => LengthMode::Fixed(2),
            },
            ParserType::Response => match function_code {
                FunctionCode::ReadCoils => LengthMode::Offset(1),
                FunctionCode::ReadDiscreteInputs => LengthMode::Offset(1),
                FunctionCode::ReadHoldingRegisters => LengthMode::Offset(1),
                FunctionCode::ReadInputRegisters => LengthMode::Offset(1),
                FunctionCode::WriteSingleCoil => LengthMode::Fixed(4),
                FunctionCode::WriteSingleRegister => LengthMode::Fixed(4),
                FunctionCode::WriteMultipleCoils => LengthMode::Fixed(4),
                FunctionCode::WriteMultipleRegisters => LengthMode::Fixed(4),
                FunctionCode::ReadFileRecord => LengthMode::Offset(1),
                FunctionCode::WriteFileRecord => LengthMode::Offset(1),
                // the 16-bit byte count field cannot exceed 68, so its low byte
                // carries the whole length
                FunctionCode::ReadFifoQueue => LengthMode::Offset(2),
            },
        }
    }

    pub(crate) fn parse(&mut self, buffer: &mut ReadBuffer) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Start => {
                if buffer.len() < 2 {
                    return Ok(None);
                }

                let unit_id = UnitId::new(buffer.read_u8()?);

                // We don't consume the function code to avoid an unnecessary copy of the receive buffer later on
                let raw_function_code = buffer.peek_at(0)?;

                self.state = match self.length_mode(raw_function_code) {
                    LengthMode::Fixed(length) => ParseState::ReadFullBody(unit_id, length),
                    LengthMode::Offset(offset) => ParseState::ReadToOffsetForLength(unit_id, offset),
                    LengthMode::Unknown => {
                        return Err(RequestError::BadFrame(
                            FrameParseError::UnknownFunctionCode(raw_function_code),
                        ))
                    }
                };

                self.parse(buffer)
            }
            ParseState::ReadToOffsetForLength(unit_id, offset) => {
                if buffer.len() < constants::FUNCTION_CODE_LENGTH + offset {
                    return Ok(None);
                }

                // Get the complete size
                let extra_bytes_to_read =
                    buffer.peek_at(constants::FUNCTION_CODE_LENGTH + offset - 1)? as usize;
                self.state = ParseState::ReadFullBody(unit_id, offset + extra_bytes_to_read);

                self.parse(buffer)
            }
            ParseState::ReadFullBody(unit_id, length) => {
                if constants::FUNCTION_CODE_LENGTH + length > MAX_ADU_LENGTH {
                    return Err(RequestError::BadFrame(FrameParseError::FrameLengthTooBig(
                        constants::FUNCTION_CODE_LENGTH + length,
                        MAX_ADU_LENGTH,
                    )));
                }

                if buffer.len() < constants::FUNCTION_CODE_LENGTH + length + constants::CRC_LENGTH {
                    return Ok(None);
                }

                let frame = {
                    let data = buffer.read(constants::FUNCTION_CODE_LENGTH + length)?;
                    let mut frame = Frame::new(FrameHeader::new_serial(unit_id));
                    frame.set(data);
                    frame
                };
                let received_crc = buffer.read_u16_le()?;

                let expected_crc = {
                    let mut digest = CRC.digest();
                    digest.update(&[unit_id.value()]);
                    digest.update(frame.payload());
                    digest.finalize()
                };

                if received_crc != expected_crc {
                    return Err(RequestError::BadFrame(
                        FrameParseError::CrcValidationFailure(received_crc, expected_crc),
                    ));
                }

                self.state = ParseState::Start;
                Ok(Some(frame))
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Start;
    }
}

pub(crate) struct RtuWriter {
    buffer: [u8; constants::MAX_FRAME_LENGTH],
}

impl RtuWriter {
    pub(crate) fn new() -> Self {
        Self {
            buffer: [0; constants::MAX_FRAME_LENGTH],
        }
    }

    pub(crate) fn format(
        &mut self,
        header: FrameHeader,
        msg: &dyn SerializePdu,
    ) -> Result<&[u8], RequestError> {
        let mut cursor = WriteCursor::new(self.buffer.as_mut());
        cursor.write_u8(header.unit_id.value())?;
        msg.serialize_pdu(&mut cursor)?;
        let end_pdu = cursor.position();

        let crc = match cursor.get(0..end_pdu) {
            Some(bytes) => CRC.checksum(bytes),
            None => return Err(crate::error::InternalError::BadSeekOperation.into()),
        };
        cursor.write_u16_le(crc)?;

        let total = cursor.position();
        Ok(&self.buffer[..total])
    }
}
