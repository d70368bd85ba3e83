pub(crate) mod ascii;
pub(crate) mod bin;
pub(crate) mod mbap;
pub(crate) mod rtu;

use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::frame::{Frame, FrameHeader};
use crate::error::RequestError;
use crate::terminal::Terminal;

use ascii::{AsciiParser, AsciiWriter};
use bin::{BinParser, BinWriter};
use mbap::{MbapParser, MbapWriter};
use rtu::{RtuParser, RtuWriter};

/// Anything that can write itself as a PDU (function code + body)
pub(crate) trait SerializePdu {
    fn serialize_pdu(&self, cursor: &mut WriteCursor) -> Result<(), RequestError>;
}

/// Frame parser for one of the four wire encodings
pub(crate) enum FrameParser {
    Mbap(MbapParser),
    Rtu(RtuParser),
    Ascii(AsciiParser),
    Bin(BinParser),
}

impl FrameParser {
    pub(crate) fn mbap() -> Self {
        FrameParser::Mbap(MbapParser::new())
    }

    pub(crate) fn rtu_request() -> Self {
        FrameParser::Rtu(RtuParser::new_request_parser())
    }

    pub(crate) fn rtu_response() -> Self {
        FrameParser::Rtu(RtuParser::new_response_parser())
    }

    pub(crate) fn ascii() -> Self {
        FrameParser::Ascii(AsciiParser::new())
    }

    pub(crate) fn bin() -> Self {
        FrameParser::Bin(BinParser::new())
    }

    pub(crate) fn parse(&mut self, buffer: &mut ReadBuffer) -> Result<Option<Frame>, RequestError> {
        match self {
            FrameParser::Mbap(parser) => parser.parse(buffer),
            FrameParser::Rtu(parser) => parser.parse(buffer),
            FrameParser::Ascii(parser) => parser.parse(buffer),
            FrameParser::Bin(parser) => parser.parse(buffer),
        }
    }

    pub(crate) fn reset(&mut self) {
        match self {
            FrameParser::Mbap(parser) => parser.reset(),
            FrameParser::Rtu(parser) => parser.reset(),
            FrameParser::Ascii(_) => {}
            FrameParser::Bin(_) => {}
        }
    }
}

/// Formats a header and PDU into the bytes of one of the four wire encodings
pub(crate) enum FrameWriter {
    Mbap(MbapWriter),
    Rtu(RtuWriter),
    Ascii(AsciiWriter),
    Bin(BinWriter),
}

impl FrameWriter {
    pub(crate) fn mbap() -> Self {
        FrameWriter::Mbap(MbapWriter::new())
    }

    pub(crate) fn rtu() -> Self {
        FrameWriter::Rtu(RtuWriter::new())
    }

    pub(crate) fn ascii() -> Self {
        FrameWriter::Ascii(AsciiWriter::new())
    }

    pub(crate) fn bin() -> Self {
        FrameWriter::Bin(BinWriter::new())
    }

    pub(crate) fn format(
        &mut self,
        header: FrameHeader,
        msg: &dyn SerializePdu,
    ) -> Result<&[u8], RequestError> {
        match self {
            FrameWriter::Mbap(writer) => writer.format(header, msg),
            FrameWriter::Rtu(writer) => writer.format(header, msg),
            FrameWriter::Ascii(writer) => writer.format(header, msg),
            FrameWriter::Bin(writer) => writer.format(header, msg),
        }
    }
}

/// Pairs a parser with a receive buffer and pulls chunks off a terminal
/// until a full frame can be extracted
pub(crate) struct FramedReader {
    parser: FrameParser,
    buffer: ReadBuffer,
}

impl FramedReader {
    const RX_BUFFER_SIZE: usize = 300;

    pub(crate) fn new(parser: FrameParser) -> Self {
        FramedReader {
            parser,
            buffer: ReadBuffer::new(Self::RX_BUFFER_SIZE),
        }
    }

    /// Discard buffered bytes and reset the parser after a framing error
    pub(crate) fn reset(&mut self) {
        self.buffer.clear();
        self.parser.reset();
    }

    pub(crate) async fn next_frame(
        &mut self,
        terminal: &mut Terminal,
    ) -> Result<Frame, RequestError> {
        loop {
            if let Some(frame) = self.parser.parse(&mut self.buffer)? {
                return Ok(frame);
            }
            let chunk = terminal.receive().await?;
            self.buffer.append(&chunk);
        }
    }
}
