//! Loopback test for the gateway node
//!
//! Drives `Server::poll_once` on the test thread while plain std sockets
//! play two peers.
//!
//! Usage:
//!   cargo test --test gateway_loopback -- --nocapture

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use bytes::BytesMut;
use gateway_wire::network::Server;
use gateway_wire::protocol::{
    decode_node_ids, DecodeStatus, Message, MessageType, Options, OwnedMessage,
};
use gateway_wire::GatewayConfig;

static INIT: std::sync::Once = std::sync::Once::new();

fn init_logs() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("warn".parse().unwrap()),
            )
            .with_test_writer()
            .try_init();
    });
}

fn start_server() -> Server {
    let config = GatewayConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        node_id: b"gw".to_vec(),
        ..GatewayConfig::default()
    };
    Server::bind(config).unwrap()
}

/// A peer speaking the gateway protocol over a std socket
struct Peer {
    stream: TcpStream,
    buf: Vec<u8>,
    eof: bool,
}

impl Peer {
    fn connect(server: &mut Server) -> Self {
        let stream = TcpStream::connect(server.local_addr().unwrap()).unwrap();
        stream.set_nonblocking(true).unwrap();
        stream.set_nodelay(true).unwrap();
        Self {
            stream,
            buf: Vec::new(),
            eof: false,
        }
    }

    fn send(&mut self, msg: &mut Message<'_>) {
        let mut out = BytesMut::new();
        msg.encode(&mut out).unwrap();
        self.send_raw(&out);
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.set_nonblocking(false).unwrap();
        self.stream.write_all(bytes).unwrap();
        self.stream.set_nonblocking(true).unwrap();
    }

    /// Write a frame larger than the socket buffers, pumping the server
    /// while the kernel is full.
    fn send_pumped(&mut self, server: &mut Server, msg: &mut Message<'_>) {
        let mut out = BytesMut::new();
        msg.encode(&mut out).unwrap();
        let mut written = 0;
        for _ in 0..10_000 {
            if written == out.len() {
                return;
            }
            match self.stream.write(&out[written..]) {
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    server.poll_once(Some(Duration::from_millis(1))).unwrap();
                }
                Err(e) => panic!("write failed: {}", e),
            }
        }
        panic!("frame not written");
    }

    /// Pump the server until it closes this connection.
    fn wait_closed(&mut self, server: &mut Server) {
        for _ in 0..200 {
            server.poll_once(Some(Duration::from_millis(5))).unwrap();
            self.read_available();
            if self.eof {
                return;
            }
        }
        panic!("connection still open");
    }

    fn read_available(&mut self) {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return;
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    self.eof = true;
                    return;
                }
                Err(e) => panic!("read failed: {}", e),
            }
        }
    }

    fn try_frame(&mut self) -> Option<OwnedMessage> {
        let mut msg = Message::default();
        let consumed = match msg.decode(&self.buf).unwrap() {
            DecodeStatus::Complete(n) => n,
            DecodeStatus::Incomplete => return None,
        };
        let owned = msg.into_owned();
        self.buf.drain(..consumed);
        Some(owned)
    }

    /// Pump the server until a frame arrives for this peer.
    fn recv(&mut self, server: &mut Server) -> OwnedMessage {
        for _ in 0..200 {
            if let Some(frame) = self.try_frame() {
                return frame;
            }
            server.poll_once(Some(Duration::from_millis(5))).unwrap();
            self.read_available();
        }
        panic!("no frame received");
    }

    /// Pump the server and assert nothing arrives.
    fn expect_silence(&mut self, server: &mut Server) {
        for _ in 0..20 {
            server.poll_once(Some(Duration::from_millis(5))).unwrap();
            self.read_available();
        }
        assert!(self.try_frame().is_none());
    }

    fn handshake(&mut self, server: &mut Server, node_id: &[u8]) {
        self.send(&mut Message::new(MessageType::Handshake).with_seq(1).with_payload(node_id));
        let reply = self.recv(server);
        let reply = reply.as_message();
        assert_eq!(reply.message_type(), Some(MessageType::Handshake));
        assert!(reply.is_resp_packet());
        assert_eq!(reply.payload(), b"gw");
    }
}

#[test]
fn heartbeat_is_answered_with_same_seq() {
    init_logs();
    let mut server = start_server();
    let mut peer = Peer::connect(&mut server);

    peer.send(&mut Message::new(MessageType::Heartbeat).with_seq(77).with_ext(0x0100));
    let reply = peer.recv(&mut server);
    let reply = reply.as_message();

    assert_eq!(reply.message_type(), Some(MessageType::Heartbeat));
    assert_eq!(reply.seq(), 77);
    assert!(reply.is_resp_packet());
    assert_eq!(server.stats().replies_sent, 1);
}

#[test]
fn node_ids_and_routing() {
    init_logs();
    let mut server = start_server();
    let mut a = Peer::connect(&mut server);
    let mut b = Peer::connect(&mut server);
    let mut c = Peer::connect(&mut server);

    a.handshake(&mut server, b"node-a");
    b.handshake(&mut server, b"node-b");
    c.handshake(&mut server, b"node-c");

    // node ID listing
    a.send(&mut Message::new(MessageType::RequestNodeIDs).with_seq(5));
    let reply = a.recv(&mut server);
    let reply = reply.as_message();
    assert_eq!(reply.message_type(), Some(MessageType::ResponseNodeIDs));
    assert_eq!(reply.seq(), 5);
    let mut ids = decode_node_ids(reply.payload()).unwrap();
    ids.sort();
    assert_eq!(ids, vec![b"gw".to_vec(), b"node-b".to_vec(), b"node-c".to_vec()]);

    // peer-to-peer goes only to the listed destination
    let options = Options::new("group0", b"node-a".to_vec(), vec![b"node-b".to_vec()]).unwrap();
    let mut p2p = Message::new(MessageType::PeerToPeerMessage)
        .with_seq(9)
        .with_options(options)
        .with_payload(b"consensus");
    a.send(&mut p2p);

    let got = b.recv(&mut server);
    assert_eq!(got.as_message(), p2p);
    c.expect_silence(&mut server);

    // broadcast reaches everyone but the sender
    let options = Options::new("group0", b"node-c".to_vec(), Vec::new()).unwrap();
    let mut broadcast = Message::new(MessageType::BroadcastMessage)
        .with_seq(10)
        .with_options(options)
        .with_payload(b"block");
    c.send(&mut broadcast);

    assert_eq!(a.recv(&mut server).as_message(), broadcast);
    assert_eq!(b.recv(&mut server).as_message(), broadcast);
    c.expect_silence(&mut server);

    assert_eq!(server.stats().frames_forwarded, 3);
}

#[test]
fn routed_frame_before_handshake_is_dropped() {
    init_logs();
    let mut server = start_server();
    let mut a = Peer::connect(&mut server);
    let mut b = Peer::connect(&mut server);
    b.handshake(&mut server, b"node-b");

    let options = Options::new("group0", b"node-a".to_vec(), vec![b"node-b".to_vec()]).unwrap();
    a.send(
        &mut Message::new(MessageType::PeerToPeerMessage)
            .with_options(options)
            .with_payload(b"early"),
    );
    b.expect_silence(&mut server);
    assert_eq!(server.stats().frames_forwarded, 0);
}

#[test]
fn malformed_frame_drops_connection() {
    init_logs();
    let mut server = start_server();
    let mut peer = Peer::connect(&mut server);
    peer.handshake(&mut server, b"node-a");
    assert_eq!(server.peer_count(), 1);

    // declared length shorter than the header
    peer.send_raw(&[0, 0, 0, 4, 0, 1, 0, 1, 0, 0, 0, 0, 0, 0]);

    peer.wait_closed(&mut server);
    assert_eq!(server.peer_count(), 0);
    assert_eq!(server.stats().malformed_frames, 1);
}

#[test]
fn oversized_handshake_node_id_drops_only_that_peer() {
    init_logs();
    let mut server = start_server();
    let mut a = Peer::connect(&mut server);
    let mut bad = Peer::connect(&mut server);
    a.handshake(&mut server, b"node-a");

    let long_id = vec![b'x'; 70_000];
    bad.send_pumped(
        &mut server,
        &mut Message::new(MessageType::Handshake).with_seq(1).with_payload(&long_id),
    );
    bad.wait_closed(&mut server);
    assert_eq!(server.peer_count(), 1);
    assert_eq!(server.stats().malformed_frames, 1);

    a.send(&mut Message::new(MessageType::RequestNodeIDs).with_seq(6));
    let reply = a.recv(&mut server);
    let reply = reply.as_message();
    assert_eq!(reply.message_type(), Some(MessageType::ResponseNodeIDs));
    assert_eq!(reply.seq(), 6);
    assert_eq!(decode_node_ids(reply.payload()).unwrap(), vec![b"gw".to_vec()]);
    assert!(!a.eof);
}

#[test]
fn frame_split_across_writes() {
    init_logs();
    let mut server = start_server();
    let mut peer = Peer::connect(&mut server);

    let mut out = BytesMut::new();
    Message::new(MessageType::Heartbeat)
        .with_seq(3)
        .with_payload(&[1u8; 32])
        .encode(&mut out)
        .unwrap();

    let (head, tail) = out.split_at(10);
    peer.send_raw(head);
    for _ in 0..10 {
        server.poll_once(Some(Duration::from_millis(5))).unwrap();
    }
    peer.read_available();
    assert!(peer.try_frame().is_none());

    peer.send_raw(tail);
    let reply = peer.recv(&mut server);
    assert_eq!(reply.as_message().seq(), 3);
}
