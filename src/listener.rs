use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;

use crate::common::cursor::ReadCursor;
use crate::common::frame::FrameHeader;
use crate::common::function::FunctionCode;
use crate::error::RequestError;
use crate::exception::ExceptionCode;
use crate::framing::{FrameParser, FrameWriter, FramedReader};
use crate::image::ProcessImage;
use crate::pdu::{ExceptionMessage, Request, Response, ResponseMessage};
use crate::terminal::Terminal;
use crate::types::UnitId;

/// Responder side of the protocol: parses requests off a terminal,
/// executes them against a process image and sends back replies.
///
/// Serial listeners only answer requests addressed to their image's unit
/// id. Broadcast requests are executed but never answered.
pub struct Listener {
    terminal: Terminal,
    reader: FramedReader,
    writer: FrameWriter,
    image: Arc<ProcessImage>,
    filter_unit: bool,
}

impl Listener {
    fn new(
        terminal: Terminal,
        parser: FrameParser,
        writer: FrameWriter,
        image: Arc<ProcessImage>,
        filter_unit: bool,
    ) -> Self {
        Listener {
            terminal,
            reader: FramedReader::new(parser),
            writer,
            image,
            filter_unit,
        }
    }

    /// Listener serving one accepted TCP connection
    pub fn tcp(stream: TcpStream, image: Arc<ProcessImage>) -> Self {
        Self::new(
            Terminal::from_tcp_stream(stream),
            FrameParser::mbap(),
            FrameWriter::mbap(),
            image,
            false,
        )
    }

    /// Listener answering datagrams from any number of masters
    pub fn udp(bind: SocketAddr, image: Arc<ProcessImage>) -> Self {
        Self::new(
            Terminal::udp_slave(bind),
            FrameParser::mbap(),
            FrameWriter::mbap(),
            image,
            false,
        )
    }

    /// Listener answering RTU requests on a serial line
    #[cfg(feature = "serial")]
    pub fn rtu(path: &str, baud_rate: u32, image: Arc<ProcessImage>) -> Self {
        Self::new(
            Terminal::serial(path, baud_rate),
            FrameParser::rtu_request(),
            FrameWriter::rtu(),
            image,
            true,
        )
    }

    /// Listener answering ASCII requests on a serial line
    #[cfg(feature = "serial")]
    pub fn ascii(path: &str, baud_rate: u32, image: Arc<ProcessImage>) -> Self {
        Self::new(
            Terminal::serial(path, baud_rate),
            FrameParser::ascii(),
            FrameWriter::ascii(),
            image,
            true,
        )
    }

    /// Listener answering BIN requests on a serial line
    #[cfg(feature = "serial")]
    pub fn bin(path: &str, baud_rate: u32, image: Arc<ProcessImage>) -> Self {
        Self::new(
            Terminal::serial(path, baud_rate),
            FrameParser::bin(),
            FrameWriter::bin(),
            image,
            true,
        )
    }

    #[cfg(test)]
    pub(crate) fn mock(io: tokio::io::DuplexStream, image: Arc<ProcessImage>) -> Self {
        Self::new(
            Terminal::mock(io),
            FrameParser::mbap(),
            FrameWriter::mbap(),
            image,
            false,
        )
    }

    /// Local address of the underlying socket, available while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.terminal.local_addr()
    }

    /// Bind or connect the underlying terminal without serving yet.
    /// [`run`](Self::run) activates on its own, this is only needed when
    /// the caller wants [`local_addr`](Self::local_addr) before serving.
    pub async fn activate(&mut self) -> Result<(), RequestError> {
        self.terminal.activate().await
    }

    /// Activate the terminal and serve requests until the channel closes.
    /// Framing errors are logged and the parser resynchronized, everything
    /// else ends the session.
    pub async fn run(&mut self) -> Result<(), RequestError> {
        self.terminal.activate().await?;
        loop {
            match self.run_one().await {
                Ok(()) => {}
                Err(RequestError::BadFrame(err)) => {
                    tracing::warn!("resynchronizing after framing error: {}", err);
                    self.reader.reset();
                }
                Err(err) => {
                    self.terminal.deactivate().await;
                    return Err(err);
                }
            }
        }
    }

    /// Stop the background loops. Replies already queued still go out.
    pub async fn shutdown(&mut self) {
        self.terminal.deactivate().await;
    }

    async fn run_one(&mut self) -> Result<(), RequestError> {
        let frame = self.reader.next_frame(&mut self.terminal).await?;
        let header = frame.header;

        if self.filter_unit
            && header.unit_id != self.image.unit_id()
            && header.unit_id != UnitId::broadcast()
        {
            tracing::debug!("ignoring request addressed to unit {}", header.unit_id);
            return Ok(());
        }
        let broadcast = self.filter_unit && header.unit_id == UnitId::broadcast();

        let mut cursor = ReadCursor::new(frame.payload());
        let raw_function = match cursor.read_u8() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("dropping frame with empty PDU");
                return Ok(());
            }
        };

        let function = match FunctionCode::get(raw_function) {
            Some(function) => function,
            None => {
                tracing::warn!("unsupported function code: {:#04X}", raw_function);
                return self.reply_exception(
                    header,
                    raw_function,
                    ExceptionCode::IllegalFunction,
                    broadcast,
                );
            }
        };

        let request = match Request::parse(function, &mut cursor) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!("malformed {} request: {}", function, err);
                return self.reply_exception(
                    header,
                    raw_function,
                    ExceptionCode::IllegalDataValue,
                    broadcast,
                );
            }
        };

        // requests over the per-function count limits must never reach
        // response serialization, the byte count field could not hold them
        if let Err(err) = request.validate() {
            tracing::warn!("rejecting {} request: {}", function, err);
            return self.reply_exception(
                header,
                raw_function,
                ExceptionCode::IllegalDataValue,
                broadcast,
            );
        }

        match handle(&self.image, &request) {
            Ok(response) => {
                if broadcast {
                    return Ok(());
                }
                let message = ResponseMessage {
                    function,
                    response: &response,
                };
                let bytes = self.writer.format(header, &message)?.to_vec();
                self.terminal.send(bytes)
            }
            Err(code) => {
                tracing::debug!("{} request rejected: {}", function, code);
                self.reply_exception(header, raw_function, code, broadcast)
            }
        }
    }

    fn reply_exception(
        &mut self,
        header: FrameHeader,
        function: u8,
        code: ExceptionCode,
        broadcast: bool,
    ) -> Result<(), RequestError> {
        if broadcast {
            return Ok(());
        }
        let message = ExceptionMessage { function, code };
        let bytes = self.writer.format(header, &message)?.to_vec();
        self.terminal.send(bytes)
    }
}

/// Execute a request against the image, mapping data-store errors to the
/// exception codes the protocol defines for them
fn handle(image: &ProcessImage, request: &Request) -> Result<Response, ExceptionCode> {
    if image.is_locked() && request_writes(request) {
        return Err(ExceptionCode::ServerDeviceBusy);
    }

    match request {
        Request::ReadCoils(range) => Ok(Response::Bits(image.coils().get_range(*range)?)),
        Request::ReadDiscreteInputs(range) => {
            Ok(Response::Bits(image.discrete_inputs().get_range(*range)?))
        }
        Request::ReadHoldingRegisters(range) => Ok(Response::Registers(
            image.holding_registers().get_range(*range)?,
        )),
        Request::ReadInputRegisters(range) => Ok(Response::Registers(
            image.input_registers().get_range(*range)?,
        )),
        Request::WriteSingleCoil(value) => {
            image.coils().update(value.index, value.value)?;
            Ok(Response::EchoBit(*value))
        }
        Request::WriteSingleRegister(value) => {
            image.holding_registers().update(value.index, value.value)?;
            Ok(Response::EchoRegister(*value))
        }
        Request::WriteMultipleCoils(write) => {
            image.coils().update_range(write.range(), &write.values)?;
            Ok(Response::WrittenRange(write.range()))
        }
        Request::WriteMultipleRegisters(write) => {
            image
                .holding_registers()
                .update_range(write.range(), &write.values)?;
            Ok(Response::WrittenRange(write.range()))
        }
        Request::ReadFileRecord(refs) => {
            let mut records = Vec::with_capacity(refs.len());
            for reference in refs {
                records.push(image.read_file_record(
                    reference.file,
                    reference.record,
                    reference.length,
                )?);
            }
            Ok(Response::FileRecords(records))
        }
        Request::WriteFileRecord(writes) => {
            for write in writes {
                image.write_file_record(write)?;
            }
            Ok(Response::WrittenRecords(writes.clone()))
        }
        Request::ReadFifoQueue(address) => match image.fifo_by_address(*address) {
            Some(fifo) => Ok(Response::FifoQueue(fifo.registers())),
            None => Err(ExceptionCode::IllegalDataAddress),
        },
    }
}

fn request_writes(request: &Request) -> bool {
    matches!(
        request,
        Request::WriteSingleCoil(_)
            | Request::WriteSingleRegister(_)
            | Request::WriteMultipleCoils(_)
            | Request::WriteMultipleRegisters(_)
            | Request::WriteFileRecord(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AddressRange, Indexed, RecordWrite, WriteMultiple};

    fn image() -> Arc<ProcessImage> {
        let image = ProcessImage::new(UnitId::new(1));
        image.coils().append(true);
        image.coils().append(false);
        image.holding_registers().insert(0x10, 0x1234);
        image.holding_registers().insert(0x11, 0x5678);
        image
            .files()
            .append(crate::image::RecordFile::new(4, vec![vec![1, 2, 3]]).unwrap());
        Arc::new(image)
    }

    fn handle_ok(image: &ProcessImage, request: Request) -> Response {
        handle(image, &request).unwrap()
    }

    #[test]
    fn reads_coils_from_the_image() {
        let image = image();
        let response = handle_ok(
            &image,
            Request::ReadCoils(AddressRange::try_from(0, 2).unwrap()),
        );
        assert_eq!(response, Response::Bits(vec![true, false]));
    }

    #[test]
    fn read_past_the_bound_is_an_illegal_address() {
        let image = image();
        let err = handle(
            &image,
            &Request::ReadCoils(AddressRange::try_from(0, 3).unwrap()),
        )
        .unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataAddress);
    }

    #[test]
    fn writes_update_occupied_addresses_only() {
        let image = image();
        let response = handle_ok(
            &image,
            Request::WriteSingleRegister(Indexed::new(0x10, 0x9999)),
        );
        assert_eq!(response, Response::EchoRegister(Indexed::new(0x10, 0x9999)));
        assert_eq!(image.holding_registers().get(0x10), Ok(0x9999));

        let err = handle(
            &image,
            &Request::WriteSingleRegister(Indexed::new(0x40, 0x9999)),
        )
        .unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataAddress);
    }

    #[test]
    fn write_multiple_registers_updates_each_address() {
        let image = image();
        let write = WriteMultiple::try_from(0x10, vec![1, 2]).unwrap();
        let response = handle_ok(&image, Request::WriteMultipleRegisters(write.clone()));
        assert_eq!(response, Response::WrittenRange(write.range()));
        assert_eq!(image.holding_registers().get(0x10), Ok(1));
        assert_eq!(image.holding_registers().get(0x11), Ok(2));
    }

    #[test]
    fn write_multiple_over_a_hole_leaves_the_image_untouched() {
        let image = image();
        // 0x10 and 0x11 are occupied, 0x12 is not
        let write = WriteMultiple::try_from(0x10, vec![1, 2, 3]).unwrap();
        let err = handle(&image, &Request::WriteMultipleRegisters(write)).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataAddress);
        assert_eq!(image.holding_registers().get(0x10), Ok(0x1234));
        assert_eq!(image.holding_registers().get(0x11), Ok(0x5678));
    }

    #[test]
    fn locked_image_answers_writes_with_busy_but_still_serves_reads() {
        let image = image();
        image.set_locked(true);

        let err = handle(
            &image,
            &Request::WriteSingleCoil(Indexed::new(0, false)),
        )
        .unwrap_err();
        assert_eq!(err, ExceptionCode::ServerDeviceBusy);

        let err = handle(
            &image,
            &Request::WriteFileRecord(vec![RecordWrite::try_from(4, 0, vec![9]).unwrap()]),
        )
        .unwrap_err();
        assert_eq!(err, ExceptionCode::ServerDeviceBusy);

        let response = handle_ok(
            &image,
            Request::ReadCoils(AddressRange::try_from(0, 1).unwrap()),
        );
        assert_eq!(response, Response::Bits(vec![true]));
    }

    #[test]
    fn file_and_fifo_requests_hit_the_image() {
        let image = image();
        let response = handle_ok(
            &image,
            Request::ReadFileRecord(vec![crate::types::RecordRef::try_from(4, 0, 2).unwrap()]),
        );
        assert_eq!(response, Response::FileRecords(vec![vec![1, 2]]));

        let err = handle(&image, &Request::ReadFifoQueue(0x55)).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataAddress);
    }

    #[tokio::test]
    async fn serves_mbap_requests_over_a_mock_channel() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (local, remote) = tokio::io::duplex(512);
        let mut listener = Listener::mock(local, image());
        let task = tokio::spawn(async move {
            let _ = listener.run().await;
        });

        let (mut rx, mut tx) = tokio::io::split(remote);

        // read coils 0..2
        tx.write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x02])
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        rx.read_exact(&mut reply).await.unwrap();
        assert_eq!(
            reply,
            [0x00, 0x01, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x01, 0x01]
        );

        // unsupported function code gets an exception reply
        tx.write_all(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x02, 0x01, 0x46])
            .await
            .unwrap();
        let mut reply = [0u8; 9];
        rx.read_exact(&mut reply).await.unwrap();
        assert_eq!(
            reply,
            [0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x01, 0xC6, 0x01]
        );

        task.abort();
    }

    #[tokio::test]
    async fn over_limit_read_gets_an_exception_and_the_session_keeps_serving() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let image = ProcessImage::new(UnitId::new(1));
        for _ in 0..200 {
            image.holding_registers().append(7);
        }

        let (local, remote) = tokio::io::duplex(512);
        let mut listener = Listener::mock(local, Arc::new(image));
        let task = tokio::spawn(async move {
            let _ = listener.run().await;
        });

        let (mut rx, mut tx) = tokio::io::split(remote);

        // read holding registers with a count of 0x82, past the 0x7D limit
        tx.write_all(&[0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x82])
            .await
            .unwrap();
        let mut reply = [0u8; 9];
        rx.read_exact(&mut reply).await.unwrap();
        assert_eq!(
            reply,
            [0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x03]
        );

        // the session is still alive and answers a legal request
        tx.write_all(&[0x00, 0x08, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01])
            .await
            .unwrap();
        let mut reply = [0u8; 11];
        rx.read_exact(&mut reply).await.unwrap();
        assert_eq!(
            reply,
            [0x00, 0x08, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x07]
        );

        task.abort();
    }
}
