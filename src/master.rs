use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tokio::time::Instant;

use crate::common::frame::{Frame, FrameHeader, TxId};
use crate::config::ConnectionConfig;
use crate::constants::defaults;
use crate::error::{InternalError, RequestError};
use crate::framing::{FrameParser, FrameWriter, FramedReader};
use crate::pdu::{Request, Response};
use crate::terminal::Terminal;
use crate::types::{AddressRange, Indexed, RecordRef, RecordWrite, UnitId, WriteMultiple};

/// Seam between the transaction logic and the wire, so retry and
/// correlation behavior can be tested without sockets
pub(crate) trait MasterLink {
    /// Draw a fresh transaction id, or None when the framing carries none
    fn next_tx_id(&mut self) -> Option<TxId>;
    async fn send_request(
        &mut self,
        header: FrameHeader,
        request: &Request,
    ) -> Result<(), RequestError>;
    async fn next_frame(&mut self) -> Result<Frame, RequestError>;
    fn reset_framing(&mut self);
}

/// Terminal plus a matched parser/writer pair for one wire encoding
pub(crate) struct MasterTransport {
    terminal: Terminal,
    writer: FrameWriter,
    reader: FramedReader,
    tx_id: TxId,
    with_tx_id: bool,
}

impl MasterTransport {
    fn new(terminal: Terminal, writer: FrameWriter, parser: FrameParser, with_tx_id: bool) -> Self {
        MasterTransport {
            terminal,
            writer,
            reader: FramedReader::new(parser),
            tx_id: TxId::default(),
            with_tx_id,
        }
    }

    fn tcp(remote: SocketAddr) -> Self {
        Self::new(
            Terminal::tcp_client(remote),
            FrameWriter::mbap(),
            FrameParser::mbap(),
            true,
        )
    }

    fn udp(remote: SocketAddr) -> Self {
        Self::new(
            Terminal::udp_master(remote),
            FrameWriter::mbap(),
            FrameParser::mbap(),
            true,
        )
    }

    #[cfg(feature = "serial")]
    fn rtu(path: &str, baud_rate: u32) -> Self {
        Self::new(
            Terminal::serial(path, baud_rate),
            FrameWriter::rtu(),
            FrameParser::rtu_response(),
            false,
        )
    }

    #[cfg(feature = "serial")]
    fn ascii(path: &str, baud_rate: u32) -> Self {
        Self::new(
            Terminal::serial(path, baud_rate),
            FrameWriter::ascii(),
            FrameParser::ascii(),
            false,
        )
    }

    #[cfg(feature = "serial")]
    fn bin(path: &str, baud_rate: u32) -> Self {
        Self::new(
            Terminal::serial(path, baud_rate),
            FrameWriter::bin(),
            FrameParser::bin(),
            false,
        )
    }
}

impl MasterLink for MasterTransport {
    fn next_tx_id(&mut self) -> Option<TxId> {
        if self.with_tx_id {
            Some(self.tx_id.next())
        } else {
            None
        }
    }

    async fn send_request(
        &mut self,
        header: FrameHeader,
        request: &Request,
    ) -> Result<(), RequestError> {
        let bytes = self.writer.format(header, request)?.to_vec();
        self.terminal.send(bytes)
    }

    async fn next_frame(&mut self) -> Result<Frame, RequestError> {
        self.reader.next_frame(&mut self.terminal).await
    }

    fn reset_framing(&mut self) {
        self.reader.reset();
    }
}

/// One request/response exchange with retries.
///
/// The same transaction id is reused across attempts so that a late reply
/// to an earlier attempt still correlates. Transport failures and timeouts
/// are retried, exceptions and malformed responses are final.
pub(crate) async fn execute<L: MasterLink>(
    link: &mut L,
    unit_id: UnitId,
    request: &Request,
    response_timeout: Duration,
    max_retries: usize,
) -> Result<Response, RequestError> {
    request.validate()?;

    let tx_id = link.next_tx_id();
    let header = FrameHeader { tx_id, unit_id };
    let mut last_err = RequestError::ResponseTimeout;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tracing::debug!("retrying request, attempt {}", attempt + 1);
        }

        if let Err(err) = link.send_request(header, request).await {
            if err.is_transport_failure() {
                last_err = err;
                continue;
            }
            return Err(err);
        }

        let deadline = Instant::now() + response_timeout;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("no response within {:?}", response_timeout);
                    last_err = RequestError::ResponseTimeout;
                    break;
                }
                frame = link.next_frame() => {
                    match frame {
                        Ok(frame) => {
                            if let Some(expected) = tx_id {
                                if frame.header.tx_id != Some(expected) {
                                    tracing::warn!(
                                        "discarding frame with stale transaction id: {:?}",
                                        frame.header.tx_id
                                    );
                                    continue;
                                }
                            } else if frame.header.unit_id != unit_id {
                                tracing::warn!(
                                    "discarding frame from unexpected unit: {}",
                                    frame.header.unit_id
                                );
                                continue;
                            }
                            return request.parse_response(frame.payload());
                        }
                        Err(err) => {
                            if err.is_transport_failure() {
                                last_err = err;
                                link.reset_framing();
                                break;
                            }
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    Err(last_err)
}

/// Client side of the protocol: formats requests, correlates replies and
/// retries over the configured channel.
pub struct Master {
    transport: MasterTransport,
    response_timeout: Duration,
    max_retries: usize,
}

impl Master {
    /// Master speaking MBAP over a TCP connection
    pub fn tcp(remote: SocketAddr) -> Self {
        Self::from_transport(MasterTransport::tcp(remote))
    }

    /// Master speaking MBAP over connected UDP datagrams
    pub fn udp(remote: SocketAddr) -> Self {
        Self::from_transport(MasterTransport::udp(remote))
    }

    /// Master speaking RTU framing over a serial port
    #[cfg(feature = "serial")]
    pub fn rtu(path: &str, baud_rate: u32) -> Self {
        Self::from_transport(MasterTransport::rtu(path, baud_rate))
    }

    /// Master speaking ASCII framing over a serial port
    #[cfg(feature = "serial")]
    pub fn ascii(path: &str, baud_rate: u32) -> Self {
        Self::from_transport(MasterTransport::ascii(path, baud_rate))
    }

    /// Master speaking BIN framing over a serial port
    #[cfg(feature = "serial")]
    pub fn bin(path: &str, baud_rate: u32) -> Self {
        Self::from_transport(MasterTransport::bin(path, baud_rate))
    }

    /// Build a master from a parsed connection string
    pub fn from_config(config: &ConnectionConfig) -> Result<Self, RequestError> {
        match config {
            ConnectionConfig::Tcp { host, port, .. } => Ok(Self::tcp(resolve(host, *port)?)),
            ConnectionConfig::Udp { host, port, .. } => Ok(Self::udp(resolve(host, *port)?)),
            #[cfg(feature = "serial")]
            ConnectionConfig::Serial {
                encoding,
                port,
                baud_rate,
                ..
            } => {
                use crate::config::SerialEncoding;
                Ok(match encoding {
                    SerialEncoding::Rtu => Self::rtu(port, *baud_rate),
                    SerialEncoding::Ascii => Self::ascii(port, *baud_rate),
                    SerialEncoding::Bin => Self::bin(port, *baud_rate),
                })
            }
            #[cfg(not(feature = "serial"))]
            ConnectionConfig::Serial { .. } => {
                Err(RequestError::Io(std::io::ErrorKind::Unsupported))
            }
        }
    }

    fn from_transport(transport: MasterTransport) -> Self {
        Master {
            transport,
            response_timeout: defaults::RESPONSE_TIMEOUT,
            max_retries: 0,
        }
    }

    /// Override the per-attempt response timeout
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Number of additional attempts after a transport failure or timeout
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub async fn activate(&mut self) -> Result<(), RequestError> {
        self.transport.terminal.activate().await
    }

    pub async fn deactivate(&mut self) {
        self.transport.terminal.deactivate().await
    }

    /// Execute an arbitrary request against a unit
    pub async fn execute(
        &mut self,
        unit_id: UnitId,
        request: &Request,
    ) -> Result<Response, RequestError> {
        execute(
            &mut self.transport,
            unit_id,
            request,
            self.response_timeout,
            self.max_retries,
        )
        .await
    }

    pub async fn read_coils(
        &mut self,
        unit_id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<bool>, RequestError> {
        match self.execute(unit_id, &Request::ReadCoils(range)).await? {
            Response::Bits(bits) => Ok(bits),
            _ => Err(InternalError::BadResponseType.into()),
        }
    }

    pub async fn read_discrete_inputs(
        &mut self,
        unit_id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<bool>, RequestError> {
        match self
            .execute(unit_id, &Request::ReadDiscreteInputs(range))
            .await?
        {
            Response::Bits(bits) => Ok(bits),
            _ => Err(InternalError::BadResponseType.into()),
        }
    }

    pub async fn read_holding_registers(
        &mut self,
        unit_id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<u16>, RequestError> {
        match self
            .execute(unit_id, &Request::ReadHoldingRegisters(range))
            .await?
        {
            Response::Registers(values) => Ok(values),
            _ => Err(InternalError::BadResponseType.into()),
        }
    }

    pub async fn read_input_registers(
        &mut self,
        unit_id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<u16>, RequestError> {
        match self
            .execute(unit_id, &Request::ReadInputRegisters(range))
            .await?
        {
            Response::Registers(values) => Ok(values),
            _ => Err(InternalError::BadResponseType.into()),
        }
    }

    pub async fn write_single_coil(
        &mut self,
        unit_id: UnitId,
        value: Indexed<bool>,
    ) -> Result<(), RequestError> {
        self.execute(unit_id, &Request::WriteSingleCoil(value))
            .await
            .map(|_| ())
    }

    pub async fn write_single_register(
        &mut self,
        unit_id: UnitId,
        value: Indexed<u16>,
    ) -> Result<(), RequestError> {
        self.execute(unit_id, &Request::WriteSingleRegister(value))
            .await
            .map(|_| ())
    }

    pub async fn write_multiple_coils(
        &mut self,
        unit_id: UnitId,
        write: WriteMultiple<bool>,
    ) -> Result<(), RequestError> {
        self.execute(unit_id, &Request::WriteMultipleCoils(write))
            .await
            .map(|_| ())
    }

    pub async fn write_multiple_registers(
        &mut self,
        unit_id: UnitId,
        write: WriteMultiple<u16>,
    ) -> Result<(), RequestError> {
        self.execute(unit_id, &Request::WriteMultipleRegisters(write))
            .await
            .map(|_| ())
    }

    pub async fn read_file_record(
        &mut self,
        unit_id: UnitId,
        refs: Vec<RecordRef>,
    ) -> Result<Vec<Vec<u16>>, RequestError> {
        match self.execute(unit_id, &Request::ReadFileRecord(refs)).await? {
            Response::FileRecords(records) => Ok(records),
            _ => Err(InternalError::BadResponseType.into()),
        }
    }

    pub async fn write_file_record(
        &mut self,
        unit_id: UnitId,
        writes: Vec<RecordWrite>,
    ) -> Result<(), RequestError> {
        self.execute(unit_id, &Request::WriteFileRecord(writes))
            .await
            .map(|_| ())
    }

    pub async fn read_fifo_queue(
        &mut self,
        unit_id: UnitId,
        address: u16,
    ) -> Result<Vec<u16>, RequestError> {
        match self
            .execute(unit_id, &Request::ReadFifoQueue(address))
            .await?
        {
            Response::FifoQueue(values) => Ok(values),
            _ => Err(InternalError::BadResponseType.into()),
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, RequestError> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or(RequestError::Io(std::io::ErrorKind::AddrNotAvailable))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AduParseError;
    use std::collections::VecDeque;

    enum Reply {
        Frame(Vec<u8>),
        StaleTxId(Vec<u8>),
        Failure(RequestError),
        Silence,
    }

    struct MockLink {
        tx_id: TxId,
        replies: VecDeque<Reply>,
        sent: usize,
        resets: usize,
        last_tx_id: Option<TxId>,
    }

    impl MockLink {
        fn new(replies: Vec<Reply>) -> Self {
            MockLink {
                tx_id: TxId::default(),
                replies: replies.into(),
                sent: 0,
                resets: 0,
                last_tx_id: None,
            }
        }
    }

    impl MasterLink for MockLink {
        fn next_tx_id(&mut self) -> Option<TxId> {
            Some(self.tx_id.next())
        }

        async fn send_request(
            &mut self,
            header: FrameHeader,
            _request: &Request,
        ) -> Result<(), RequestError> {
            self.sent += 1;
            self.last_tx_id = header.tx_id;
            Ok(())
        }

        async fn next_frame(&mut self) -> Result<Frame, RequestError> {
            match self.replies.pop_front() {
                Some(Reply::Frame(payload)) => {
                    let header = FrameHeader {
                        tx_id: self.last_tx_id,
                        unit_id: UnitId::new(1),
                    };
                    let mut frame = Frame::new(header);
                    frame.set(&payload);
                    Ok(frame)
                }
                Some(Reply::StaleTxId(payload)) => {
                    let header = FrameHeader {
                        tx_id: Some(TxId::new(0xDEAD)),
                        unit_id: UnitId::new(1),
                    };
                    let mut frame = Frame::new(header);
                    frame.set(&payload);
                    Ok(frame)
                }
                Some(Reply::Failure(err)) => Err(err),
                Some(Reply::Silence) | None => {
                    // hold the call open past any deadline
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(RequestError::Shutdown)
                }
            }
        }

        fn reset_framing(&mut self) {
            self.resets += 1;
        }
    }

    fn read_coil_request() -> Request {
        Request::ReadCoils(AddressRange::try_from(0, 1).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn returns_response_on_first_attempt() {
        let mut link = MockLink::new(vec![Reply::Frame(vec![0x01, 0x01, 0x01])]);
        let response = execute(
            &mut link,
            UnitId::new(1),
            &read_coil_request(),
            Duration::from_secs(1),
            2,
        )
        .await
        .unwrap();
        assert_eq!(response, Response::Bits(vec![true]));
        assert_eq!(link.sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_transport_failures_then_succeeds() {
        let mut link = MockLink::new(vec![
            Reply::Failure(RequestError::Io(std::io::ErrorKind::ConnectionReset)),
            Reply::Failure(RequestError::Io(std::io::ErrorKind::ConnectionReset)),
            Reply::Frame(vec![0x01, 0x01, 0x01]),
        ]);
        let response = execute(
            &mut link,
            UnitId::new(1),
            &read_coil_request(),
            Duration::from_secs(1),
            2,
        )
        .await
        .unwrap();
        assert_eq!(response, Response::Bits(vec![true]));
        // two failed attempts plus the successful one
        assert_eq!(link.sent, 3);
        assert_eq!(link.resets, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_exhausting_retries() {
        let failure = || Reply::Failure(RequestError::Io(std::io::ErrorKind::ConnectionReset));
        let mut link = MockLink::new(vec![failure(), failure(), failure()]);
        let err = execute(
            &mut link,
            UnitId::new(1),
            &read_coil_request(),
            Duration::from_secs(1),
            2,
        )
        .await
        .unwrap_err();
        assert_eq!(err, RequestError::Io(std::io::ErrorKind::ConnectionReset));
        assert_eq!(link.sent, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_no_response_arrives() {
        let mut link = MockLink::new(vec![Reply::Silence]);
        let err = execute(
            &mut link,
            UnitId::new(1),
            &read_coil_request(),
            Duration::from_millis(50),
            0,
        )
        .await
        .unwrap_err();
        assert_eq!(err, RequestError::ResponseTimeout);
        assert_eq!(link.sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn discards_stale_transaction_ids() {
        let mut link = MockLink::new(vec![
            Reply::StaleTxId(vec![0x01, 0x01, 0x00]),
            Reply::Frame(vec![0x01, 0x01, 0x01]),
        ]);
        let response = execute(
            &mut link,
            UnitId::new(1),
            &read_coil_request(),
            Duration::from_secs(1),
            0,
        )
        .await
        .unwrap();
        // the stale frame carried a zero bit, the matching one a set bit
        assert_eq!(response, Response::Bits(vec![true]));
        assert_eq!(link.sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exception_response_is_not_retried() {
        let mut link = MockLink::new(vec![Reply::Frame(vec![0x81, 0x02])]);
        let err = execute(
            &mut link,
            UnitId::new(1),
            &read_coil_request(),
            Duration::from_secs(1),
            5,
        )
        .await
        .unwrap_err();
        assert_eq!(
            err,
            RequestError::Exception(crate::exception::ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(link.sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_response_is_not_retried() {
        let mut link = MockLink::new(vec![Reply::Frame(vec![0x01, 0x09, 0x01])]);
        let err = execute(
            &mut link,
            UnitId::new(1),
            &read_coil_request(),
            Duration::from_secs(1),
            5,
        )
        .await
        .unwrap_err();
        assert_eq!(
            err,
            RequestError::BadResponse(AduParseError::CountMismatch(9, 1))
        );
        assert_eq!(link.sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transaction_ids_advance_across_transactions() {
        let mut link = MockLink::new(vec![
            Reply::Frame(vec![0x01, 0x01, 0x01]),
            Reply::Frame(vec![0x01, 0x01, 0x01]),
        ]);
        let request = read_coil_request();
        execute(&mut link, UnitId::new(1), &request, Duration::from_secs(1), 0)
            .await
            .unwrap();
        assert_eq!(link.last_tx_id, Some(TxId::new(0)));
        execute(&mut link, UnitId::new(1), &request, Duration::from_secs(1), 0)
            .await
            .unwrap();
        assert_eq!(link.last_tx_id, Some(TxId::new(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_argument_is_rejected_before_sending() {
        let mut link = MockLink::new(vec![]);
        let request = Request::ReadFileRecord(vec![]);
        let err = execute(
            &mut link,
            UnitId::new(1),
            &request,
            Duration::from_secs(1),
            0,
        )
        .await
        .unwrap_err();
        assert_eq!(
            err,
            RequestError::BadArgument(crate::error::InvalidArgument::CountOfZero)
        );
        assert_eq!(link.sent, 0);
    }
}
