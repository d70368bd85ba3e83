use crate::exception::ExceptionCode;

/// Errors that can occur while executing a request or servicing a terminal
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// An I/O error occurred on the underlying channel
    Io(std::io::ErrorKind),
    /// An error occurred while parsing a frame off the wire
    BadFrame(FrameParseError),
    /// A well-formed reply could not be interpreted as a response to the request
    BadResponse(AduParseError),
    /// The request itself was invalid and was never sent
    BadArgument(InvalidArgument),
    /// The remote responded with a Modbus exception. The exchange succeeded at
    /// the wire level but the operation was rejected by the responder.
    Exception(ExceptionCode),
    /// No reply arrived within the configured window after exhausting retries
    ResponseTimeout,
    /// The terminal has not been activated, or was deactivated
    TerminalNotActive,
    /// The terminal background loops have shut down
    Shutdown,
    /// An internal bug while reading or writing buffers
    Internal(InternalError),
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => write!(f, "I/O error: {kind:?}"),
            RequestError::BadFrame(err) => write!(f, "framing error: {err}"),
            RequestError::BadResponse(err) => write!(f, "bad response: {err}"),
            RequestError::BadArgument(err) => write!(f, "invalid argument: {err}"),
            RequestError::Exception(ex) => write!(f, "Modbus exception: {ex}"),
            RequestError::ResponseTimeout => {
                f.write_str("timeout occurred before receiving a response")
            }
            RequestError::TerminalNotActive => f.write_str("terminal is not active"),
            RequestError::Shutdown => f.write_str("terminal background loops have shut down"),
            RequestError::Internal(err) => write!(f, "internal error: {err}"),
        }
    }
}

impl RequestError {
    /// Transport-level failures are eligible for a retry by the master.
    /// Exceptions and malformed responses are final.
    pub(crate) fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            RequestError::Io(_)
                | RequestError::BadFrame(_)
                | RequestError::ResponseTimeout
                | RequestError::TerminalNotActive
                | RequestError::Shutdown
        )
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadResponse(err)
    }
}

impl From<InvalidArgument> for RequestError {
    fn from(err: InvalidArgument) -> Self {
        RequestError::BadArgument(err)
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(ex: ExceptionCode) -> Self {
        RequestError::Exception(ex)
    }
}

impl From<InternalError> for RequestError {
    fn from(err: InternalError) -> Self {
        RequestError::Internal(err)
    }
}

/// Errors that occur while parsing a frame off a stream or datagram
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// Received MBAP frame with the length field set to zero
    MbapLengthZero,
    /// Received MBAP frame with a length that exceeds the maximum allowed size
    MbapLengthTooBig(usize, usize),
    /// Received MBAP frame with a non-Modbus protocol id
    UnknownProtocolId(u16),
    /// Cannot infer the frame length of an unknown function code
    UnknownFunctionCode(u8),
    /// Inferred frame length exceeds the maximum ADU size
    FrameLengthTooBig(usize, usize),
    /// CRC validation failed (received, expected)
    CrcValidationFailure(u16, u16),
    /// LRC validation failed (received, expected)
    LrcValidationFailure(u8, u8),
    /// Character outside the hex alphabet in an ASCII frame
    BadAsciiCharacter(u8),
    /// ASCII frame body has an odd number of hex characters
    OddAsciiLength(usize),
    /// ASCII frame terminator was not CR LF
    BadAsciiTerminator,
    /// BIN frame body ended in the middle of an escape sequence
    TruncatedEscape,
}

impl std::error::Error for FrameParseError {}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::MbapLengthZero => {
                f.write_str("received frame with the MBAP length field set to zero")
            }
            FrameParseError::MbapLengthTooBig(size, max) => write!(
                f,
                "received frame with MBAP length ({size}) that exceeds the maximum allowed size ({max})"
            ),
            FrameParseError::UnknownProtocolId(id) => {
                write!(f, "received frame with non-Modbus protocol id: {id}")
            }
            FrameParseError::UnknownFunctionCode(fc) => {
                write!(f, "cannot infer frame length of unknown function code: {fc:#04X}")
            }
            FrameParseError::FrameLengthTooBig(size, max) => write!(
                f,
                "inferred frame length ({size}) exceeds the maximum ADU size ({max})"
            ),
            FrameParseError::CrcValidationFailure(received, expected) => write!(
                f,
                "CRC validation failure: received {received:#06X}, expected {expected:#06X}"
            ),
            FrameParseError::LrcValidationFailure(received, expected) => write!(
                f,
                "LRC validation failure: received {received:#04X}, expected {expected:#04X}"
            ),
            FrameParseError::BadAsciiCharacter(ch) => {
                write!(f, "character outside the hex alphabet in ASCII frame: {ch:#04X}")
            }
            FrameParseError::OddAsciiLength(len) => {
                write!(f, "ASCII frame body has an odd number of hex characters: {len}")
            }
            FrameParseError::BadAsciiTerminator => {
                f.write_str("ASCII frame terminator was not CR LF")
            }
            FrameParseError::TruncatedEscape => {
                f.write_str("BIN frame ended in the middle of an escape sequence")
            }
        }
    }
}

/// Errors that occur while interpreting a request or response PDU
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// PDU is too short to be valid
    InsufficientBytes,
    /// Byte count does not match the actual number of bytes present
    InsufficientBytesForByteCount(usize, usize),
    /// PDU contains extra trailing bytes
    TrailingBytes(usize),
    /// A parameter expected to be echoed in the reply did not match
    ReplyEchoMismatch,
    /// An unknown response function code was received (actual, expected, expected error)
    UnknownResponseFunction(u8, u8, u8),
    /// Coil state was neither 0xFF00 nor 0x0000
    UnknownCoilState(u16),
    /// A file record sub-request used a reference type other than 6
    BadReferenceType(u8),
    /// Mismatch between a declared count and the data that follows it
    CountMismatch(usize, usize),
}

impl std::error::Error for AduParseError {}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AduParseError::InsufficientBytes => f.write_str("PDU is too short to be valid"),
            AduParseError::InsufficientBytesForByteCount(count, remaining) => write!(
                f,
                "byte count ({count}) does not match the actual number of bytes remaining ({remaining})"
            ),
            AduParseError::TrailingBytes(remaining) => {
                write!(f, "PDU contains {remaining} extra trailing bytes")
            }
            AduParseError::ReplyEchoMismatch => {
                f.write_str("a parameter expected to be echoed in the reply did not match")
            }
            AduParseError::UnknownResponseFunction(actual, expected, error) => write!(
                f,
                "received unknown response function code: {actual}, expected {expected} or {error}"
            ),
            AduParseError::UnknownCoilState(value) => {
                write!(f, "received coil state with unspecified value: {value:#06X}")
            }
            AduParseError::BadReferenceType(value) => {
                write!(f, "file record reference type must be 6, received {value}")
            }
            AduParseError::CountMismatch(declared, actual) => {
                write!(f, "declared count ({declared}) does not match data length ({actual})")
            }
        }
    }
}

/// Errors caused by invalid arguments supplied by the caller or the operator
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvalidArgument {
    /// Request contains a count of zero
    CountOfZero,
    /// Start + count would overflow the 16-bit address space
    AddressOverflow(u16, u16),
    /// Count exceeds the maximum allowed for the request type (count, max)
    CountTooBigForType(u16, u16),
    /// File number outside 0..=9999
    FileNumberOutOfRange(u16),
    /// Connection string has fewer than 2 colon-separated parts
    TooFewParts(usize),
    /// Connection string names an unknown protocol
    UnknownProtocol(String),
    /// A numeric field of a connection string failed to parse
    BadNumericField(String),
}

impl std::error::Error for InvalidArgument {}

impl std::fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidArgument::CountOfZero => f.write_str("request contains a count of zero"),
            InvalidArgument::AddressOverflow(start, count) => write!(
                f,
                "start == {start} and count == {count} would overflow the 16-bit address space"
            ),
            InvalidArgument::CountTooBigForType(count, max) => write!(
                f,
                "count of {count} exceeds the maximum allowed count of {max} for this request type"
            ),
            InvalidArgument::FileNumberOutOfRange(number) => {
                write!(f, "file number {number} is outside 0..=9999")
            }
            InvalidArgument::TooFewParts(count) => write!(
                f,
                "connection string must have at least 2 colon-separated parts, found {count}"
            ),
            InvalidArgument::UnknownProtocol(protocol) => {
                write!(f, "unknown protocol in connection string: {protocol}")
            }
            InvalidArgument::BadNumericField(field) => {
                write!(f, "numeric field of connection string failed to parse: {field}")
            }
        }
    }
}

/// Errors raised by the process image for absent or unoccupied addresses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressError {
    /// No object is mapped at the address
    Unoccupied(u16),
    /// A range request exceeds the current bound of the address space (start, count, size)
    RangeOutOfBounds(u16, u16, usize),
    /// No file carries the requested file number
    UnknownFileNumber(u16),
    /// File number outside the addressable 0..=9999 window
    FileNumberOutOfRange(u16),
    /// The file exists but does not contain the requested record
    UnknownRecord(u16, u16),
}

impl std::error::Error for AddressError {}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AddressError::Unoccupied(addr) => {
                write!(f, "no object is mapped at address {addr}")
            }
            AddressError::RangeOutOfBounds(start, count, size) => write!(
                f,
                "range start == {start} count == {count} exceeds the current bound ({size})"
            ),
            AddressError::UnknownFileNumber(number) => {
                write!(f, "no file carries file number {number}")
            }
            AddressError::FileNumberOutOfRange(number) => {
                write!(f, "file number {number} is outside 0..=9999")
            }
            AddressError::UnknownRecord(file, record) => {
                write!(f, "file {file} does not contain record {record}")
            }
        }
    }
}

/// The protocol layer reports every address error as ILLEGAL DATA ADDRESS
impl From<AddressError> for ExceptionCode {
    fn from(_: AddressError) -> Self {
        ExceptionCode::IllegalDataAddress
    }
}

/// Possible bugs in the library itself while reading or writing buffers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// Attempted to write more bytes than remain in the buffer
    InsufficientWriteSpace(usize, usize),
    /// Attempted to read more bytes than present
    InsufficientBytesForRead(usize, usize),
    /// Cursor seek operation exceeded the bounds of the underlying buffer
    BadSeekOperation,
    /// Byte count would exceed the maximum size of u8
    BadByteCount(usize),
    /// The formatted ADU exceeds the maximum allowed size
    AduTooBig(usize),
    /// A parsed response did not carry the variant its request implies
    BadResponseType,
}

impl std::error::Error for InternalError {}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientWriteSpace(requested, remaining) => write!(
                f,
                "attempted to write {requested} bytes with {remaining} bytes remaining"
            ),
            InternalError::InsufficientBytesForRead(requested, remaining) => write!(
                f,
                "attempted to read {requested} bytes with only {remaining} remaining"
            ),
            InternalError::BadSeekOperation => {
                f.write_str("cursor seek operation exceeded the bounds of the underlying buffer")
            }
            InternalError::BadByteCount(count) => {
                write!(f, "byte count would exceed the maximum size of u8: {count}")
            }
            InternalError::AduTooBig(size) => {
                write!(f, "ADU length of {size} exceeds the maximum allowed length")
            }
            InternalError::BadResponseType => {
                f.write_str("a parsed response did not carry the variant its request implies")
            }
        }
    }
}
