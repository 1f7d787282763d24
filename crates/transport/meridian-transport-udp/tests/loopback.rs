//! 回环地址上的端到端收发：真实套接字 → reactor → 回调 → 出站应答。

use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use meridian_codec::{
    ClientId, InstanceId, Message, MessageCodec, MessageType, MethodId, ReturnCode, ServiceId,
    SessionId, SomeIpCodec,
};
use meridian_core::{
    Endpoint, LifecycleState, ManagingApplication, MessageSender, ReceiveCallback, RouterConfig,
    ServiceManagement, Transport, TransportError,
};
use meridian_transport_udp::UdpTransport;

const SERVICE: ServiceId = ServiceId(0x1234);
const INSTANCE: InstanceId = InstanceId(1);
const METHOD: MethodId = MethodId(0x0001);

struct Running {
    app: Arc<ManagingApplication>,
    transport: Arc<UdpTransport>,
    runner: thread::JoinHandle<()>,
}

impl Running {
    fn start() -> Self {
        let config = RouterConfig::default();
        let app = Arc::new(ManagingApplication::from_config(&config));
        let handle = app.init(&config).expect("init");
        let transport = UdpTransport::bind(([127, 0, 0, 1], 0).into(), &handle).expect("bind");
        app.attach_transport(transport.clone());
        let runner = {
            let app = Arc::clone(&app);
            thread::spawn(move || app.start().expect("start"))
        };
        Self {
            app,
            transport,
            runner,
        }
    }

    fn shutdown(self) {
        self.app.stop().expect("stop");
        self.runner.join().expect("runner");
        assert_eq!(self.app.state(), LifecycleState::Stopped);
    }
}

fn client_socket() -> StdUdpSocket {
    let socket = StdUdpSocket::bind("127.0.0.1:0").expect("client bind");
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    socket
}

fn request_bytes() -> Vec<u8> {
    SomeIpCodec::new()
        .serialize(
            &Message::request(SERVICE, INSTANCE, METHOD)
                .with_client(ClientId(0x0042))
                .with_session(SessionId(9))
                .with_payload(&b"hello"[..]),
        )
        .expect("serialize")
        .to_vec()
}

fn receive(socket: &StdUdpSocket) -> (Message, SocketAddr) {
    let mut buffer = [0u8; 1500];
    let (len, from) = socket.recv_from(&mut buffer).expect("reply datagram");
    let message = SomeIpCodec::new()
        .deserialize(&buffer[..len])
        .expect("decode reply");
    (message, from)
}

#[test]
fn request_is_dispatched_and_answered_over_udp() {
    let running = Running::start();
    let client = client_socket();
    let local = running.transport.local_endpoint();

    running
        .app
        .provide_service(SERVICE, INSTANCE, local)
        .expect("provide");
    running
        .app
        .start_service(SERVICE, INSTANCE)
        .expect("start service");

    let responder = Arc::clone(&running.app);
    running.app.register_cbk(
        SERVICE,
        INSTANCE,
        METHOD,
        ReceiveCallback::new(move |request: &Message| {
            let response = Message::response_to(request).with_payload(request.payload.clone());
            responder.send(&response, true).expect("respond");
        }),
    );

    client
        .send_to(&request_bytes(), local.addr())
        .expect("send request");
    let (response, from) = receive(&client);
    assert_eq!(from, local.addr());
    assert_eq!(response.message_type, MessageType::Response);
    assert_eq!(response.session, SessionId(9));
    assert_eq!(response.client, ClientId(0x0042));
    assert_eq!(&response.payload[..], b"hello");

    running.shutdown();
}

#[test]
fn unprovided_service_is_answered_with_error_datagram() {
    let running = Running::start();
    let client = client_socket();
    client
        .send_to(&request_bytes(), running.transport.local_endpoint().addr())
        .expect("send request");
    let (reply, _) = receive(&client);
    assert_eq!(reply.message_type, MessageType::Error);
    assert_eq!(reply.return_code, ReturnCode::UnknownService);
    assert_eq!(reply.session, SessionId(9));
    running.shutdown();
}

#[test]
fn stream_endpoints_are_rejected() {
    let running = Running::start();
    let target = Endpoint::tcp(([127, 0, 0, 1], 9).into());
    let error = running
        .transport
        .send(&[0u8; 16], &target, true)
        .expect_err("tcp target");
    assert!(matches!(error, TransportError::Rejected { .. }));
    running.shutdown();
}
