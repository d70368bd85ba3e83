use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::frame::{Frame, FrameHeader, MAX_ADU_LENGTH};
use crate::error::{FrameParseError, RequestError};
use crate::framing::SerializePdu;
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const FRAME_START: u8 = b':';
    pub(crate) const CR: u8 = 0x0D;
    pub(crate) const LF: u8 = 0x0A;
    /// unit id + PDU + LRC in binary form
    pub(crate) const MAX_BINARY_LENGTH: usize = 1 + crate::common::frame::MAX_ADU_LENGTH + 1;
    /// ':' + two hex chars per binary byte + CR LF
    pub(crate) const MAX_FRAME_LENGTH: usize = 1 + 2 * MAX_BINARY_LENGTH + 2;
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn hex_value(ch: u8) -> Result<u8, FrameParseError> {
    match ch {
        b'0'..=b'9' => Ok(ch - b'0'),
        b'A'..=b'F' => Ok(ch - b'A' + 10),
        b'a'..=b'f' => Ok(ch - b'a' + 10),
        _ => Err(FrameParseError::BadAsciiCharacter(ch)),
    }
}

/// Two's complement of the byte sum, per the serial line spec
fn lrc(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte))
        .wrapping_neg()
}

/// ASCII frames are self-delimiting so the parser carries no state between
/// calls. It scans for ':' and CR LF in the receive buffer.
pub(crate) struct AsciiParser;

impl AsciiParser {
    pub(crate) fn new() -> Self {
        AsciiParser
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

            // locate the CR LF terminator
            let mut terminator = None;
            let mut pos = 1;
            while pos + 1 < buffer.len() {
                if buffer.peek_at(pos)? == constants::CR {
                    if buffer.peek_at(pos + 1)? != constants::LF {
                        return Err(FrameParseError::BadAsciiTerminator.into());
                    }
                    terminator = Some(pos);
                    break;
                }
                pos += 1;
            }

            let terminator = match terminator {
                Some(pos) => pos,
                None => {
                    if buffer.len() > constants::MAX_FRAME_LENGTH {
                        return Err(FrameParseError::FrameLengthTooBig(
                            buffer.len(),
                            constants::MAX_FRAME_LENGTH,
                        )
                        .into());
                    }
                    return Ok(None);
                }
            };

            let hex_len = terminator - 1;
            if hex_len % 2 != 0 {
                return Err(FrameParseError::OddAsciiLength(hex_len).into());
            }

            let byte_count = hex_len / 2;
            if byte_count > constants::MAX_BINARY_LENGTH {
                return Err(FrameParseError::FrameLengthTooBig(
                    byte_count,
                    constants::MAX_BINARY_LENGTH,
                )
                .into());
            }

            buffer.read_u8()?; // ':'
            let mut decoded = [0u8; constants::MAX_BINARY_LENGTH];
            {
                let body = buffer.read(hex_len)?;
                for (i, pair) in body.chunks_exact(2).enumerate() {
                    decoded[i] = (hex_value(pair[0])? << 4) | hex_value(pair[1])?;
                }
            }
            buffer.read(2)?; // CR LF

            // a frame shorter than unit id + LRC is line noise
            if byte_count < 2 {
                tracing::warn!("discarding truncated ASCII frame of {} bytes", byte_count);
                continue;
            }

            let received_lrc = decoded[byte_count - 1];
            let expected_lrc = lrc(&decoded[..byte_count - 1]);
            if received_lrc != expected_lrc {
                return Err(
                    FrameParseError::LrcValidationFailure(received_lrc, expected_lrc).into(),
                );
            }

            let mut frame = Frame::new(FrameHeader::new_serial(UnitId::new(decoded[0])));
            frame.set(&decoded[1..byte_count - 1]);
            return Ok(Some(frame));
        }
    }
}

pub(crate) struct AsciiWriter {
    scratch: [u8; 1 + MAX_ADU_LENGTH],
    buffer: [u8; constants::MAX_FRAME_LENGTH],
}

impl AsciiWriter {
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
        let lrc = lrc(&self.scratch[..binary_len]);

        let mut pos = 0;
        self.buffer[pos] = constants::FRAME_START;
        pos += 1;
        for byte in self.scratch[..binary_len].iter().copied().chain([lrc]) {
            self.buffer[pos] = HEX[(byte >> 4) as usize];
            self.buffer[pos + 1] = HEX[(byte & 0x0F) as usize];
            pos += 2;
        }
        self.buffer[pos] = constants::CR;
        self.buffer[pos + 1] = constants::LF;
        pos += 2;

        Ok(&self.buffer[..pos])
    }
}
