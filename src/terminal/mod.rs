pub(crate) mod correlation;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::constants::defaults;
use crate::error::RequestError;
use correlation::CorrelationMap;

/// Size of the scratch buffer each receive loop reads into
const RECEIVE_BUFFER_SIZE: usize = 256;

enum Transport {
    TcpClient(SocketAddr),
    /// A stream accepted elsewhere. Consumed on first activation, so the
    /// terminal cannot be activated again after deactivation.
    TcpAdopted(Option<TcpStream>),
    UdpMaster(SocketAddr),
    UdpSlave(SocketAddr, Arc<CorrelationMap>),
    #[cfg(feature = "serial")]
    Serial(String, u32),
    #[cfg(test)]
    Mock(Option<tokio::io::DuplexStream>),
}

struct Active {
    /// Dropping the sender lets the send loop drain the queue and exit
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    stop: watch::Sender<bool>,
    sender: JoinHandle<()>,
    receiver: JoinHandle<()>,
    local: Option<SocketAddr>,
}

/// Bidirectional byte channel backed by two background tasks.
///
/// `send` enqueues without blocking and `receive` pulls whatever chunk the
/// receive loop last read off the wire. Deactivation drains the send queue
/// before the send loop exits, so already queued replies still go out.
pub struct Terminal {
    transport: Transport,
    read_timeout: Duration,
    state: Option<Active>,
}

impl Terminal {
    fn new(transport: Transport) -> Self {
        Terminal {
            transport,
            read_timeout: defaults::READ_TIMEOUT,
            state: None,
        }
    }

    /// Terminal that connects to a TCP server when activated
    pub fn tcp_client(remote: SocketAddr) -> Self {
        Self::new(Transport::TcpClient(remote))
    }

    /// Terminal wrapping an already accepted TCP stream
    pub fn from_tcp_stream(stream: TcpStream) -> Self {
        Self::new(Transport::TcpAdopted(Some(stream)))
    }

    /// Terminal that exchanges datagrams with a single remote responder
    pub fn udp_master(remote: SocketAddr) -> Self {
        Self::new(Transport::UdpMaster(remote))
    }

    /// Terminal that answers datagrams from any number of requesters,
    /// routing each reply by its transaction id
    pub fn udp_slave(bind: SocketAddr) -> Self {
        Self::new(Transport::UdpSlave(bind, Arc::new(CorrelationMap::new())))
    }

    /// Terminal backed by a serial port
    #[cfg(feature = "serial")]
    pub fn serial(path: &str, baud_rate: u32) -> Self {
        Self::new(Transport::Serial(path.to_string(), baud_rate))
    }

    #[cfg(test)]
    pub(crate) fn mock(io: tokio::io::DuplexStream) -> Self {
        Self::new(Transport::Mock(Some(io)))
    }

    /// Override the per-read timeout used by the receive loop
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Local address of the underlying socket, available while active
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.as_ref().and_then(|active| active.local)
    }

    /// Open the underlying channel and spawn the send and receive loops.
    /// Activating an already active terminal does nothing.
    pub async fn activate(&mut self) -> Result<(), RequestError> {
        if self.state.is_some() {
            return Ok(());
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (data_tx, data_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let read_timeout = self.read_timeout;

        let (sender, receiver, local) = match &mut self.transport {
            Transport::TcpClient(remote) => {
                let stream = connect_tcp(*remote).await?;
                let local = stream.local_addr().ok();
                let (read_half, write_half) = stream.into_split();
                (
                    tokio::spawn(run_stream_sender(write_half, cmd_rx)),
                    tokio::spawn(run_stream_receiver(
                        read_half,
                        data_tx,
                        stop_rx,
                        read_timeout,
                    )),
                    local,
                )
            }
            Transport::TcpAdopted(stream) => {
                let stream = stream.take().ok_or(RequestError::TerminalNotActive)?;
                size_stream_buffers(&stream);
                let local = stream.local_addr().ok();
                let (read_half, write_half) = stream.into_split();
                (
                    tokio::spawn(run_stream_sender(write_half, cmd_rx)),
                    tokio::spawn(run_stream_receiver(
                        read_half,
                        data_tx,
                        stop_rx,
                        read_timeout,
                    )),
                    local,
                )
            }
            Transport::UdpMaster(remote) => {
                let bind = unspecified_for(*remote);
                let socket = Arc::new(build_udp_socket(bind)?);
                socket.connect(*remote).await?;
                let local = socket.local_addr().ok();
                (
                    tokio::spawn(run_udp_master_sender(socket.clone(), cmd_rx)),
                    tokio::spawn(run_udp_master_receiver(
                        socket,
                        data_tx,
                        stop_rx,
                        read_timeout,
                    )),
                    local,
                )
            }
            Transport::UdpSlave(bind, correlation) => {
                let socket = Arc::new(build_udp_socket(*bind)?);
                let local = socket.local_addr().ok();
                (
                    tokio::spawn(run_udp_slave_sender(
                        socket.clone(),
                        cmd_rx,
                        correlation.clone(),
                    )),
                    tokio::spawn(run_udp_slave_receiver(
                        socket,
                        data_tx,
                        stop_rx,
                        read_timeout,
                        correlation.clone(),
                    )),
                    local,
                )
            }
            #[cfg(feature = "serial")]
            Transport::Serial(path, baud_rate) => {
                use tokio_serial::SerialPortBuilderExt;
                let port = tokio_serial::new(path.as_str(), *baud_rate)
                    .open_native_async()
                    .map_err(|err| RequestError::Io(std::io::Error::from(err).kind()))?;
                let (read_half, write_half) = tokio::io::split(port);
                (
                    tokio::spawn(run_stream_sender(write_half, cmd_rx)),
                    tokio::spawn(run_stream_receiver(
                        read_half,
                        data_tx,
                        stop_rx,
                        read_timeout,
                    )),
                    None,
                )
            }
            #[cfg(test)]
            Transport::Mock(io) => {
                let io = io.take().ok_or(RequestError::TerminalNotActive)?;
                let (read_half, write_half) = tokio::io::split(io);
                (
                    tokio::spawn(run_stream_sender(write_half, cmd_rx)),
                    tokio::spawn(run_stream_receiver(
                        read_half,
                        data_tx,
                        stop_rx,
                        read_timeout,
                    )),
                    None,
                )
            }
        };

        self.state = Some(Active {
            tx: Some(cmd_tx),
            rx: data_rx,
            stop: stop_tx,
            sender,
            receiver,
            local,
        });
        Ok(())
    }

    /// Stop both loops and release the channel. The send queue is drained
    /// before the send loop exits.
    pub async fn deactivate(&mut self) {
        if let Some(mut active) = self.state.take() {
            active.tx = None;
            let _ = active.stop.send(true);
            let _ = active.sender.await;
            let _ = active.receiver.await;
        }
    }

    /// Enqueue bytes for transmission without waiting for the wire
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), RequestError> {
        let active = self.state.as_ref().ok_or(RequestError::TerminalNotActive)?;
        let tx = active.tx.as_ref().ok_or(RequestError::TerminalNotActive)?;
        tx.send(bytes).map_err(|_| RequestError::Shutdown)
    }

    /// Wait for the next chunk read off the wire
    pub async fn receive(&mut self) -> Result<Vec<u8>, RequestError> {
        let active = self.state.as_mut().ok_or(RequestError::TerminalNotActive)?;
        active.rx.recv().await.ok_or(RequestError::Shutdown)
    }
}

fn unspecified_for(remote: SocketAddr) -> SocketAddr {
    if remote.is_ipv4() {
        "0.0.0.0:0".parse().unwrap_or(remote)
    } else {
        "[::]:0".parse().unwrap_or(remote)
    }
}

/// Apply the small socket buffer sizes to a stream accepted elsewhere.
/// Connect-style transports size their sockets before connecting.
fn size_stream_buffers(stream: &TcpStream) {
    let socket = socket2::SockRef::from(stream);
    if let Err(err) = socket.set_recv_buffer_size(defaults::SOCKET_BUFFER_SIZE) {
        tracing::warn!("unable to set receive buffer size: {}", err);
    }
    if let Err(err) = socket.set_send_buffer_size(defaults::SOCKET_BUFFER_SIZE) {
        tracing::warn!("unable to set send buffer size: {}", err);
    }
}

async fn connect_tcp(remote: SocketAddr) -> Result<TcpStream, RequestError> {
    let socket = if remote.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if let Err(err) = socket.set_recv_buffer_size(defaults::SOCKET_BUFFER_SIZE as u32) {
        tracing::warn!("unable to set receive buffer size: {}", err);
    }
    if let Err(err) = socket.set_send_buffer_size(defaults::SOCKET_BUFFER_SIZE as u32) {
        tracing::warn!("unable to set send buffer size: {}", err);
    }
    Ok(socket.connect(remote).await?)
}

fn build_udp_socket(bind: SocketAddr) -> Result<UdpSocket, RequestError> {
    let domain = if bind.is_ipv4() {
        socket2::Domain::IPV4
    } else {
        socket2::Domain::IPV6
    };
    let socket = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
    if let Err(err) = socket.set_recv_buffer_size(defaults::SOCKET_BUFFER_SIZE) {
        tracing::warn!("unable to set receive buffer size: {}", err);
    }
    if let Err(err) = socket.set_send_buffer_size(defaults::SOCKET_BUFFER_SIZE) {
        tracing::warn!("unable to set send buffer size: {}", err);
    }
    socket.bind(&bind.into())?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

async fn run_stream_sender<W>(mut io: W, mut queue: mpsc::UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    // recv keeps yielding queued chunks after the sender is dropped,
    // which is what drains the queue during deactivation
    while let Some(chunk) = queue.recv().await {
        if let Err(err) = io.write_all(&chunk).await {
            tracing::warn!("send loop terminated: {}", err);
            return;
        }
    }
    let _ = io.shutdown().await;
}

async fn run_stream_receiver<R>(
    mut io: R,
    queue: mpsc::UnboundedSender<Vec<u8>>,
    mut stop: watch::Receiver<bool>,
    read_timeout: Duration,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
    loop {
        let result = tokio::select! {
            biased;
            _ = stop.changed() => return,
            result = tokio::time::timeout(read_timeout, io.read(&mut buffer)) => result,
        };
        match result {
            // per-read timeout, loop around and observe a pending stop
            Err(_) => continue,
            Ok(Ok(0)) => {
                tracing::debug!("remote closed the connection");
                return;
            }
            Ok(Ok(count)) => {
                if queue.send(buffer[..count].to_vec()).is_err() {
                    return;
                }
            }
            Ok(Err(err)) => {
                tracing::warn!("receive loop terminated: {}", err);
                return;
            }
        }
    }
}

async fn run_udp_master_sender(socket: Arc<UdpSocket>, mut queue: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(chunk) = queue.recv().await {
        if let Err(err) = socket.send(&chunk).await {
            tracing::warn!("send loop terminated: {}", err);
            return;
        }
    }
}

async fn run_udp_master_receiver(
    socket: Arc<UdpSocket>,
    queue: mpsc::UnboundedSender<Vec<u8>>,
    mut stop: watch::Receiver<bool>,
    read_timeout: Duration,
) {
    let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
    loop {
        let result = tokio::select! {
            biased;
            _ = stop.changed() => return,
            result = tokio::time::timeout(read_timeout, socket.recv(&mut buffer)) => result,
        };
        match result {
            Err(_) => continue,
            Ok(Ok(count)) => {
                if queue.send(buffer[..count].to_vec()).is_err() {
                    return;
                }
            }
            Ok(Err(err)) => {
                tracing::warn!("receive loop terminated: {}", err);
                return;
            }
        }
    }
}

async fn run_udp_slave_sender(
    socket: Arc<UdpSocket>,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    correlation: Arc<CorrelationMap>,
) {
    while let Some(chunk) = queue.recv().await {
        if chunk.len() < 2 {
            tracing::warn!("dropping reply of {} bytes, too short for a header", chunk.len());
            continue;
        }
        let tx_id = u16::from_be_bytes([chunk[0], chunk[1]]);
        match correlation.take(tx_id) {
            Some(destination) => {
                if let Err(err) = socket.send_to(&chunk, destination).await {
                    tracing::warn!("send loop terminated: {}", err);
                    return;
                }
            }
            None => {
                tracing::warn!("no pending request for transaction id {:#06X}, dropping reply", tx_id);
            }
        }
    }
}

async fn run_udp_slave_receiver(
    socket: Arc<UdpSocket>,
    queue: mpsc::UnboundedSender<Vec<u8>>,
    mut stop: watch::Receiver<bool>,
    read_timeout: Duration,
    correlation: Arc<CorrelationMap>,
) {
    let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
    loop {
        let result = tokio::select! {
            biased;
            _ = stop.changed() => return,
            result = tokio::time::timeout(read_timeout, socket.recv_from(&mut buffer)) => result,
        };
        match result {
            Err(_) => continue,
            Ok(Ok((count, source))) => {
                if count < 2 {
                    tracing::warn!("dropping datagram of {} bytes from {}", count, source);
                    continue;
                }
                let tx_id = u16::from_be_bytes([buffer[0], buffer[1]]);
                correlation.record(tx_id, source);
                if queue.send(buffer[..count].to_vec()).is_err() {
                    return;
                }
            }
            Ok(Err(err)) => {
                tracing::warn!("receive loop terminated: {}", err);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_and_receive_require_activation() {
        let (local, _remote) = tokio::io::duplex(64);
        let mut terminal = Terminal::mock(local);

        assert_eq!(
            terminal.send(vec![0x01]),
            Err(RequestError::TerminalNotActive)
        );
        assert_eq!(
            terminal.receive().await,
            Err(RequestError::TerminalNotActive)
        );
    }

    #[tokio::test]
    async fn round_trips_bytes_through_the_loops() {
        let (local, remote) = tokio::io::duplex(64);
        let (mut remote_rx, mut remote_tx) = tokio::io::split(remote);

        let mut terminal = Terminal::mock(local).read_timeout(Duration::from_millis(10));
        terminal.activate().await.unwrap();
        assert!(terminal.is_active());

        terminal.send(vec![0x01, 0x02, 0x03]).unwrap();
        let mut bytes = [0u8; 3];
        remote_rx.read_exact(&mut bytes).await.unwrap();
        assert_eq!(bytes, [0x01, 0x02, 0x03]);

        remote_tx.write_all(&[0x0A, 0x0B]).await.unwrap();
        assert_eq!(terminal.receive().await.unwrap(), vec![0x0A, 0x0B]);
    }

    #[tokio::test]
    async fn deactivation_drains_queued_sends() {
        let (local, remote) = tokio::io::duplex(64);
        let (mut remote_rx, _remote_tx) = tokio::io::split(remote);

        let mut terminal = Terminal::mock(local).read_timeout(Duration::from_millis(10));
        terminal.activate().await.unwrap();

        terminal.send(vec![0x01]).unwrap();
        terminal.send(vec![0x02]).unwrap();
        terminal.deactivate().await;
        assert!(!terminal.is_active());

        let mut bytes = [0u8; 2];
        remote_rx.read_exact(&mut bytes).await.unwrap();
        assert_eq!(bytes, [0x01, 0x02]);
    }

    #[tokio::test]
    async fn adopted_channel_cannot_be_activated_twice() {
        let (local, _remote) = tokio::io::duplex(64);
        let mut terminal = Terminal::mock(local).read_timeout(Duration::from_millis(10));

        terminal.activate().await.unwrap();
        terminal.deactivate().await;
        assert_eq!(
            terminal.activate().await,
            Err(RequestError::TerminalNotActive)
        );
    }

    #[tokio::test]
    async fn adopted_streams_get_small_socket_buffers() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        size_stream_buffers(&accepted);
        let socket = socket2::SockRef::from(&accepted);
        // the kernel rounds the requested size up, but nowhere near the
        // multi-hundred-kilobyte default
        assert!(socket.recv_buffer_size().unwrap() <= 16 * defaults::SOCKET_BUFFER_SIZE);
        assert!(socket.send_buffer_size().unwrap() <= 16 * defaults::SOCKET_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn activation_is_idempotent() {
        let (local, _remote) = tokio::io::duplex(64);
        let mut terminal = Terminal::mock(local).read_timeout(Duration::from_millis(10));

        terminal.activate().await.unwrap();
        terminal.activate().await.unwrap();
        assert!(terminal.is_active());
        terminal.deactivate().await;
    }
}
