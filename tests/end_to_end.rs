use std::sync::Arc;

use fieldbus::error::RequestError;
use fieldbus::{
    AddressRange, ExceptionCode, Indexed, Listener, Master, ProcessImage, RecordFile, RecordRef,
    RecordWrite, UnitId, WriteMultiple,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn populated_image() -> Arc<ProcessImage> {
    let image = ProcessImage::new(UnitId::new(1));
    image.coils().append(true);
    image.coils().append(false);
    image.discrete_inputs().append(true);
    for value in [0xCAFEu16, 0x1234, 0x0000, 0xFFFF] {
        image.holding_registers().append(value);
    }
    image.input_registers().insert(0x100, 42);
    image
        .files()
        .append(RecordFile::new(7, vec![vec![10, 20, 30], vec![40, 50]]).unwrap());
    image.fifos().append(fieldbus::Fifo::new(0x20));
    image.push_fifo(0x20, 0x01B8);
    image.push_fifo(0x20, 0x1284);
    Arc::new(image)
}

async fn spawn_tcp_listener(image: Arc<ProcessImage>) -> std::net::SocketAddr {
    let socket = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = socket.accept().await.unwrap();
        let mut listener = Listener::tcp(stream, image);
        let _ = listener.run().await;
    });
    addr
}

#[tokio::test]
async fn tcp_master_reads_and_writes_a_served_image() {
    init_tracing();
    let image = populated_image();
    let addr = spawn_tcp_listener(image.clone()).await;

    let mut master = Master::tcp(addr);
    master.activate().await.unwrap();
    let unit = UnitId::new(1);

    let coils = master
        .read_coils(unit, AddressRange::try_from(0, 2).unwrap())
        .await
        .unwrap();
    assert_eq!(coils, vec![true, false]);

    let registers = master
        .read_holding_registers(unit, AddressRange::try_from(0, 4).unwrap())
        .await
        .unwrap();
    assert_eq!(registers, vec![0xCAFE, 0x1234, 0x0000, 0xFFFF]);

    master
        .write_single_register(unit, Indexed::new(2, 0x0777))
        .await
        .unwrap();
    master
        .write_multiple_coils(unit, WriteMultiple::try_from(0, vec![false, true]).unwrap())
        .await
        .unwrap();

    let registers = master
        .read_holding_registers(unit, AddressRange::try_from(2, 1).unwrap())
        .await
        .unwrap();
    assert_eq!(registers, vec![0x0777]);
    let coils = master
        .read_coils(unit, AddressRange::try_from(0, 2).unwrap())
        .await
        .unwrap();
    assert_eq!(coils, vec![false, true]);

    // addresses the image never defined produce a protocol exception
    let err = master
        .read_input_registers(unit, AddressRange::try_from(0, 1).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err, RequestError::Exception(ExceptionCode::IllegalDataAddress));

    master.deactivate().await;
}

#[tokio::test]
async fn tcp_master_exercises_file_and_fifo_services() {
    init_tracing();
    let image = populated_image();
    let addr = spawn_tcp_listener(image.clone()).await;

    let mut master = Master::tcp(addr);
    master.activate().await.unwrap();
    let unit = UnitId::new(1);

    let records = master
        .read_file_record(
            unit,
            vec![
                RecordRef::try_from(7, 0, 3).unwrap(),
                RecordRef::try_from(7, 1, 2).unwrap(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(records, vec![vec![10, 20, 30], vec![40, 50]]);

    master
        .write_file_record(unit, vec![RecordWrite::try_from(7, 1, vec![99]).unwrap()])
        .await
        .unwrap();
    let records = master
        .read_file_record(unit, vec![RecordRef::try_from(7, 1, 2).unwrap()])
        .await
        .unwrap();
    assert_eq!(records, vec![vec![99, 50]]);

    let queue = master.read_fifo_queue(unit, 0x20).await.unwrap();
    assert_eq!(queue, vec![0x01B8, 0x1284]);
    // reading the queue does not drain it
    let queue = master.read_fifo_queue(unit, 0x20).await.unwrap();
    assert_eq!(queue, vec![0x01B8, 0x1284]);

    master.deactivate().await;
}

#[tokio::test]
async fn locked_image_rejects_writes_until_unlocked() {
    init_tracing();
    let image = populated_image();
    let addr = spawn_tcp_listener(image.clone()).await;

    let mut master = Master::tcp(addr);
    master.activate().await.unwrap();
    let unit = UnitId::new(1);

    assert!(image.set_locked(true));

    let err = master
        .write_single_coil(unit, Indexed::new(0, false))
        .await
        .unwrap_err();
    assert_eq!(err, RequestError::Exception(ExceptionCode::ServerDeviceBusy));

    // reads keep working while the image is locked
    let coils = master
        .read_coils(unit, AddressRange::try_from(0, 1).unwrap())
        .await
        .unwrap();
    assert_eq!(coils, vec![true]);

    assert!(image.set_locked(false));
    master
        .write_single_coil(unit, Indexed::new(0, false))
        .await
        .unwrap();
    assert_eq!(image.coils().get(0), Ok(false));

    master.deactivate().await;
}

#[tokio::test]
async fn small_image_survives_a_full_poll_cycle() {
    init_tracing();
    let image = Arc::new(ProcessImage::new(UnitId::new(1)));
    image.coils().append(true);
    image.coils().append(false);
    image.holding_registers().append(251);
    let addr = spawn_tcp_listener(image.clone()).await;

    let mut master = Master::tcp(addr);
    master.activate().await.unwrap();
    let unit = UnitId::new(1);

    let coils = master
        .read_coils(unit, AddressRange::try_from(0, 2).unwrap())
        .await
        .unwrap();
    assert_eq!(coils, vec![true, false]);

    let registers = master
        .read_holding_registers(unit, AddressRange::try_from(0, 1).unwrap())
        .await
        .unwrap();
    assert_eq!(registers, vec![251]);

    master
        .write_single_register(unit, Indexed::new(0, 99))
        .await
        .unwrap();
    let registers = master
        .read_holding_registers(unit, AddressRange::try_from(0, 1).unwrap())
        .await
        .unwrap();
    assert_eq!(registers, vec![99]);

    image.set_locked(true);
    image.coils().append(true);
    assert_eq!(image.coils().count(), 2);

    master.deactivate().await;
}

#[tokio::test]
async fn udp_listener_answers_each_master_at_its_own_address() {
    init_tracing();
    let image = populated_image();
    let mut listener = Listener::udp("127.0.0.1:0".parse().unwrap(), image);
    listener.activate().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = listener.run().await;
    });

    let unit = UnitId::new(1);
    let mut first = Master::udp(addr);
    let mut second = Master::udp(addr);
    first.activate().await.unwrap();
    second.activate().await.unwrap();

    let coils = first
        .read_coils(unit, AddressRange::try_from(0, 1).unwrap())
        .await
        .unwrap();
    assert_eq!(coils, vec![true]);

    let registers = second
        .read_holding_registers(unit, AddressRange::try_from(1, 2).unwrap())
        .await
        .unwrap();
    assert_eq!(registers, vec![0x1234, 0x0000]);

    // the first master is still correlated correctly after the second spoke
    first
        .write_single_register(unit, Indexed::new(3, 0x0001))
        .await
        .unwrap();
    let registers = first
        .read_holding_registers(unit, AddressRange::try_from(3, 1).unwrap())
        .await
        .unwrap();
    assert_eq!(registers, vec![0x0001]);

    first.deactivate().await;
    second.deactivate().await;
}

#[tokio::test]
async fn udp_replies_reach_their_senders_while_both_requests_are_in_flight() {
    init_tracing();
    let image = populated_image();
    let mut listener = Listener::udp("127.0.0.1:0".parse().unwrap(), image);
    listener.activate().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = listener.run().await;
    });

    let first = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let second = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // both requests go out before either reply is read, so two
    // correlation entries with distinct transaction ids coexist
    first
        .send_to(
            &[0x00, 0x0A, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01],
            addr,
        )
        .await
        .unwrap();
    second
        .send_to(
            &[0x00, 0x0B, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01],
            addr,
        )
        .await
        .unwrap();

    let mut buffer = [0u8; 64];
    let (count, from) = first.recv_from(&mut buffer).await.unwrap();
    assert_eq!(from, addr);
    assert_eq!(
        &buffer[..count],
        &[0x00, 0x0A, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x01, 0x01]
    );

    let (count, from) = second.recv_from(&mut buffer).await.unwrap();
    assert_eq!(from, addr);
    assert_eq!(
        &buffer[..count],
        &[0x00, 0x0B, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0xCA, 0xFE]
    );
}
