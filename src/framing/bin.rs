use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::frame::{Frame, FrameHeader, MAX_ADU_LENGTH};
use crate::error::{FrameParseError, RequestError};
use crate::framing::rtu::CRC;
use crate::framing::SerializePdu;
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const FRAME_START: u8 = b'{';
    pub(crate) const FRAME_END: u8 = b'}';
    /// data link escape, doubles the delimiter bytes inside the body
    pub(crate) const DLE: u8 = 0x10;
    /// unit id + PDU + CRC in unescaped form
    pub(crate) const MAX_BINARY_LENGTH: usize = 1 + crate::common::frame::MAX_ADU_LENGTH + 2;
    /// '{' + worst case all bytes escaped + '}'
    pub(crate) const MAX_FRAME_LENGTH: usize = 1 + 2 * MAX_BINARY_LENGTH + 1;
}

fn needs_escape(byte: u8) -> bool {
    matches!(
        byte,
        constants::FRAME_START | constants::FRAME_END | constants::DLE
    )
}

/// BIN frames are delimited by '{' and '}' with DLE escaping inside the
/// body, so the parser scans for an unescaped terminator.
pub(crate) struct BinParser;

impl BinParser {
    pub(crate) fn new() -> Self {
        BinParser
    }

    pub(crate) fn parse(&mut self, buffer: &mut ReadBuffer) -> Result<Option<Frame>, RequestError> {
        loop {
            // inter-frame noise on a serial line is discarded
            while !buffer.is_empty() && buffer.peek_at(0)? != constants::FRAME_START {
                buffer.read_u8()?;
            }

            if buffer.is_empty() {
                return Ok(None);
            }

            // locate the unescaped terminator
            let mut terminator = None;
            let mut escaped = false;
            let mut pos = 1;
            while pos < buffer.len() {
                let byte = buffer.peek_at(pos)?;
                if escaped {
                    escaped = false;
                } else if byte == constants::DLE {
                    escaped = true;
                } else if byte == constants::FRAME_END {
                    terminator = Some(pos);
                    break;
                }
                pos += 1;
            }

            let terminator = match terminator {
                Some(pos) => pos,
                None => {
                    if buffer.len() > constants::MAX_FRAME_LENGTH {
                        if escaped {
                            return Err(FrameParseError::TruncatedEscape.into());
                        }
                        return Err(FrameParseError::FrameLengthTooBig(
                            buffer.len(),
                            constants::MAX_FRAME_LENGTH,
                        )
                        .into());
                    }
                    return Ok(None);
                }
            };

            buffer.read_u8()?; // '{'
            let mut decoded = [0u8; constants::MAX_BINARY_LENGTH];
            let mut count = 0;
            {
                let body = buffer.read(terminator - 1)?;
                let mut escape_pending = false;
                for byte in body.iter().copied() {
                    if !escape_pending && byte == constants::DLE {
                        escape_pending = true;
                        continue;
                    }
                    escape_pending = false;
                    if count == constants::MAX_BINARY_LENGTH {
                        return Err(FrameParseError::FrameLengthTooBig(
                            count + 1,
                            constants::MAX_BINARY_LENGTH,
                        )
                        .into());
                    }
                    decoded[count] = byte;
                    count += 1;
                }
            }
            buffer.read_u8()?; // '}'

            // a frame shorter than unit id + CRC is line noise
            if count < 3 {
                tracing::warn!("discarding truncated BIN frame of {} bytes", count);
                continue;
            }

            let received_crc = ((decoded[count - 2] as u16) << 8) | (decoded[count - 1] as u16);
            let expected_crc = CRC.checksum(&decoded[..count - 2]);
            if received_crc != expected_crc {
                return Err(
                    FrameParseError::CrcValidationFailure(received_crc, expected_crc).into(),
                );
            }

            let mut frame = Frame::new(FrameHeader::new_serial(UnitId::new(decoded[0])));
            frame.set(&decoded[1..count - 2]);
            return Ok(Some(frame));
        }
    }
}

pub(crate) struct BinWriter {
    scratch: [u8; 1 + MAX_ADU_LENGTH],
    buffer: [u8; constants::MAX_FRAME_LENGTH],
}

impl BinWriter {
    pub(crate) fn new() -> Self {
        Self {
            scratch: [0; 1 + MAX_ADU_LENGTH],
            buffer: [0; constants::MAX_FRAME_LENGTH],
        }
    }

    pub(crate) fn format(
        &mut self,
        header: FrameHeader,
        msg: &dyn SerializePdu,
    ) -> Result<&[u8], RequestError> {
        let binary_len = {
            let mut cursor = WriteCursor::new(self.scratch.as_mut());
            cursor.write_u8(header.unit_id.value())?;
            msg.serialize_pdu(&mut cursor)?;
            cursor.position()
        };
        let crc = CRC.checksum(&self.scratch[..binary_len]);

        let mut pos = 0;
        self.buffer[pos] = constants::FRAME_START;
        pos += 1;
        let crc_bytes = [(crc >> 8) as u8, (crc & 0x00FF) as u8];
        for byte in self.scratch[..binary_len].iter().copied().chain(crc_bytes) {
            if needs_escape(byte) {
                self.buffer[pos] = constants::DLE;
                pos += 1;
            }
            self.buffer[pos] = byte;
            pos += 1;
        }
        self.buffer[pos] = constants::FRAME_END;
        pos += 1;

        Ok(&self.buffer[..pos])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RawPdu<'a>(&'a [u8]);

    impl<'a> SerializePdu for RawPdu<'a> {
        fn serialize_pdu(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
            cursor.write_bytes(self.0)?;
            Ok(())
        }
    }

    fn format(unit_id: u8, pdu: &[u8]) -> Vec<u8> {
        let mut writer = BinWriter::new();
        let header = FrameHeader::new_serial(UnitId::new(unit_id));
        writer.format(header, &RawPdu(pdu)).unwrap().to_vec()
    }

    fn parse_chunks(chunks: &[&[u8]]) -> Result<Option<Frame>, RequestError> {
        let mut parser = BinParser::new();
        let mut buffer = ReadBuffer::new(constants::MAX_FRAME_LENGTH);
        let mut frame = None;
        for chunk in chunks {
            buffer.append(chunk);
            frame = parser.parse(&mut buffer)?;
        }
        Ok(frame)
    }

    #[test]
    fn frame_is_delimited_by_braces() {
        let wire = format(0x2A, &[0x03, 0x00, 0x10, 0x00, 0x03]);
        assert_eq!(wire[0], constants::FRAME_START);
        assert_eq!(wire[wire.len() - 1], constants::FRAME_END);
    }

    #[test]
    fn round_trips_plain_payload() {
        let pdu = &[0x03, 0x00, 0x10, 0x00, 0x03];
        let wire = format(0x2A, pdu);
        let frame = parse_chunks(&[&wire]).unwrap().unwrap();
        assert_eq!(frame.header.tx_id, None);
        assert_eq!(frame.header.unit_id, UnitId::new(0x2A));
        assert_eq!(frame.payload(), pdu);
    }

    #[test]
    fn escapes_delimiter_bytes_in_body() {
        // 0x7B and 0x7D collide with the frame delimiters, 0x10 with DLE
        let pdu = &[0x10, 0x00, 0x7B, 0x00, 0x7D];
        let wire = format(0x2A, pdu);
        let unescaped_braces = wire[1..wire.len() - 1]
            .iter()
            .zip(std::iter::once(&0u8).chain(wire[1..].iter()))
            .filter(|(byte, prev)| {
                (**byte == constants::FRAME_START || **byte == constants::FRAME_END)
                    && **prev != constants::DLE
            })
            .count();
        assert_eq!(unescaped_braces, 0);

        let frame = parse_chunks(&[&wire]).unwrap().unwrap();
        assert_eq!(frame.payload(), pdu);
    }

    #[test]
    fn parses_frame_split_across_chunks() {
        let pdu = &[0x01, 0x00, 0x10, 0x00, 0x13];
        let wire = format(0x2A, pdu);
        let (f1, f2) = wire.split_at(3);
        let frame = parse_chunks(&[f1, f2]).unwrap().unwrap();
        assert_eq!(frame.payload(), pdu);
    }

    #[test]
    fn skips_noise_before_frame_start() {
        let pdu = &[0x01, 0x00, 0x10, 0x00, 0x13];
        let wire = format(0x2A, pdu);
        let frame = parse_chunks(&[&[0xFF, 0x00, 0x42], &wire]).unwrap().unwrap();
        assert_eq!(frame.payload(), pdu);
    }

    #[test]
    fn errors_on_bad_crc() {
        let pdu = &[0x01, 0x00, 0x10, 0x00, 0x13];
        let mut wire = format(0x2A, pdu);
        // corrupt a payload byte that needs no escaping
        wire[2] ^= 0x01;
        assert!(matches!(
            parse_chunks(&[&wire]),
            Err(RequestError::BadFrame(
                FrameParseError::CrcValidationFailure(_, _)
            ))
        ));
    }

    #[test]
    fn errors_on_unterminated_oversized_frame() {
        let mut wire = vec![constants::FRAME_START];
        wire.extend(std::iter::repeat(0x00).take(constants::MAX_FRAME_LENGTH + 1));
        assert!(matches!(
            parse_chunks(&[&wire]),
            Err(RequestError::BadFrame(FrameParseError::FrameLengthTooBig(
                _,
                _
            )))
        ));
    }

    #[test]
    fn errors_on_escape_pending_at_overrun() {
        let mut wire = vec![constants::FRAME_START];
        wire.extend(std::iter::repeat(constants::DLE).take(constants::MAX_FRAME_LENGTH + 1));
        assert_eq!(
            parse_chunks(&[&wire]).unwrap_err(),
            RequestError::BadFrame(FrameParseError::TruncatedEscape)
        );
    }
}
