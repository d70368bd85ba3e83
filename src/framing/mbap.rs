use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::frame::{Frame, FrameHeader, TxId, MAX_ADU_LENGTH};
use crate::error::{FrameParseError, InternalError, RequestError};
use crate::framing::SerializePdu;
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 7;
    // cannot be < 1 b/c of the unit identifier
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::common::frame::MAX_ADU_LENGTH;
    // includes the 1 byte unit id
    pub(crate) const MAX_LENGTH_FIELD: usize = crate::common::frame::MAX_ADU_LENGTH + 1;
}

#[derive(Clone, Copy)]
struct MbapHeader {
    tx_id: TxId,
    adu_length: usize,
    unit_id: UnitId,
}

#[derive(Clone, Copy)]
enum ParseState {
    Begin,
    Header(MbapHeader),
}

pub(crate) struct MbapParser {
    state: ParseState,
}

impl MbapParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::Begin,
        }
    }

    fn parse_header(buffer: &mut ReadBuffer) -> Result<MbapHeader, RequestError> {
        let tx_id = TxId::new(buffer.read_u16_be()?);
        let protocol_id = buffer.read_u16_be()?;
        let length = buffer.read_u16_be()? as usize;
        let unit_id = UnitId::new(buffer.read_u8()?);

        if protocol_id != 0 {
            return Err(FrameParseError::UnknownProtocolId(protocol_id).into());
        }

        if length > constants::MAX_LENGTH_FIELD {
            return Err(
                FrameParseError::MbapLengthTooBig(length, constants::MAX_LENGTH_FIELD).into(),
            );
        }

        // must be > 0 b/c the 1-byte unit identifier counts towards length
        if length == 0 {
            return Err(FrameParseError::MbapLengthZero.into());
        }

        Ok(MbapHeader {
            tx_id,
            adu_length: length - 1,
            unit_id,
        })
    }

    fn parse_body(header: &MbapHeader, buffer: &mut ReadBuffer) -> Result<Frame, RequestError> {
        let mut frame = Frame::new(FrameHeader::new_tcp(header.unit_id, header.tx_id));
        frame.set(buffer.read(header.adu_length)?);
        Ok(frame)
    }

    pub(crate) fn parse(&mut self, buffer: &mut ReadBuffer) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Header(header) => {
                if buffer.len() < header.adu_length {
                    return Ok(None);
                }

                let ret = Self::parse_body(&header, buffer)?;
                self.state = ParseState::Begin;
                Ok(Some(ret))
            }
            ParseState::Begin => {
                if buffer.len() < constants::HEADER_LENGTH {
                    return Ok(None);
                }

                self.state = ParseState::Header(Self::parse_header(buffer)?);
                self.parse(buffer)
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Begin;
    }
}

pub(crate) struct MbapWriter {
    buffer: [u8; constants::MAX_FRAME_LENGTH],
}

impl MbapWriter {
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
        let tx_id = header.tx_id.map(TxId::to_u16).unwrap_or(0);

        let mut cursor = WriteCursor::new(self.buffer.as_mut());
        cursor.write_u16_be(tx_id)?;
        cursor.write_u16_be(0)?;
        cursor.seek_from_current(2)?; // write the length later
        cursor.write_u8(header.unit_id.value())?;

        let adu_length: usize = {
            let start = cursor.position();
            msg.serialize_pdu(&mut cursor)?;
            cursor.position() - start
        };

        if adu_length > MAX_ADU_LENGTH {
            return Err(InternalError::AduTooBig(adu_length).into());
        }

        // write the resulting length
        cursor.seek_from_start(4)?;
        cursor.write_u16_be((adu_length + 1) as u16)?;

        let total_length = constants::HEADER_LENGTH + adu_length;
        Ok(&self.buffer[..total_length])
    }
}
