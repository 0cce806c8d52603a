//! Gateway node dengan event-driven I/O
//!
//! Menggunakan mio untuk non-blocking I/O multiplexing.
//!
//! Frame handling:
//! - Heartbeat / Handshake / RequestNodeIDs are answered in place
//! - PeerToPeerMessage is relayed to the handshaken peers named in its options
//! - BroadcastMessage is relayed to every other handshaken peer
//! - a malformed frame drops the connection, since stream alignment is lost

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use super::connection::Connection;
use crate::config::GatewayConfig;
use crate::error::{CodecError, Result};
use crate::protocol::{
    decode_node_ids, encode_node_ids, Message, MessageType, NodeId, P2PMessageFactory,
    MAX_DST_NODE_ID_COUNT, MAX_NODE_ID_LENGTH,
};

const SERVER_TOKEN: Token = Token(0);
const MAX_CONNECTIONS: usize = 1024;
const EVENTS_CAPACITY: usize = 1024;

/// Counters since start
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerStats {
    pub connections_accepted: u64,
    pub frames_received: u64,
    pub frames_forwarded: u64,
    pub replies_sent: u64,
    pub malformed_frames: u64,
}

/// Connected peer
struct Peer {
    conn: Connection<TcpStream>,
    addr: SocketAddr,
    /// Known once the peer has handshaken.
    node_id: Option<NodeId>,
}

/// Work that needs access to other peers, deferred until the reading
/// connection's buffer is no longer borrowed.
enum Action {
    SendNodeIds { seq: u32 },
    Forward { frame: Bytes, dst: Option<Vec<NodeId>> },
}

/// Gateway node
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    peers: HashMap<Token, Peer>,
    next_token: usize,
    config: GatewayConfig,
    factory: P2PMessageFactory,
    stats: ServerStats,
}

impl Server {
    /// Bind and start listening
    pub fn bind(config: GatewayConfig) -> io::Result<Self> {
        if config.node_id.len() > MAX_NODE_ID_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "node ID too long: {} bytes (max: {})",
                    config.node_id.len(),
                    MAX_NODE_ID_LENGTH
                ),
            ));
        }

        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(config.bind_addr)?;

        poll.registry()
            .register(&mut listener, SERVER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener,
            peers: HashMap::with_capacity(MAX_CONNECTIONS),
            next_token: 1,
            config,
            factory: P2PMessageFactory,
            stats: ServerStats::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Run server event loop
    pub fn run(&mut self) -> io::Result<()> {
        tracing::info!(
            addr = %self.local_addr()?,
            node_id = %String::from_utf8_lossy(&self.config.node_id),
            "gateway listening"
        );

        loop {
            self.poll_once(Some(Duration::from_millis(100)))?;
        }
    }

    /// Wait for readiness once and handle every ready event.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e);
        }

        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|event| (event.token(), event.is_readable(), event.is_writable()))
            .collect();

        for (token, readable, writable) in ready {
            if token == SERVER_TOKEN {
                self.accept_connections();
                continue;
            }
            if readable {
                self.handle_read(token);
            }
            if writable {
                self.handle_write(token);
            }
        }
        Ok(())
    }

    /// Accept new connections
    ///
    /// A socket that fails setup is dropped; the listener keeps running.
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.peers.len() >= MAX_CONNECTIONS {
                        tracing::warn!(%addr, "max connections reached, rejecting");
                        continue;
                    }
                    if let Err(e) = self.add_peer(stream, addr) {
                        tracing::warn!(%addr, error = %e, "peer setup failed, dropping");
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // e.g. EMFILE: retried on the next listener event
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn add_peer(&mut self, mut stream: TcpStream, addr: SocketAddr) -> io::Result<Token> {
        // Disable Nagle's algorithm untuk lower latency
        stream.set_nodelay(true)?;
        if let Some(size) = self.config.socket_buffer_size {
            tune_socket_buffers(&stream, size);
        }

        let token = Token(self.next_token);
        self.poll.registry().register(
            &mut stream,
            token,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        self.next_token += 1;

        let conn = Connection::with_config(stream, self.config.connection.clone());
        self.peers.insert(
            token,
            Peer {
                conn,
                addr,
                node_id: None,
            },
        );
        self.stats.connections_accepted += 1;
        tracing::info!(%addr, token = token.0, "peer connected");
        Ok(token)
    }

    /// Handle readable event
    fn handle_read(&mut self, token: Token) {
        if let Err(e) = self.read_frames(token) {
            match e {
                CodecError::ConnectionClosed => {}
                ref e if e.is_malformed() => {
                    self.stats.malformed_frames += 1;
                    tracing::warn!(token = token.0, error = %e, "malformed frame, dropping peer");
                }
                ref e => tracing::warn!(token = token.0, error = %e, "read error"),
            }
            self.close(token);
        }
    }

    /// Handle writable event
    fn handle_write(&mut self, token: Token) {
        let failed = match self.peers.get_mut(&token) {
            Some(peer) => peer.conn.flush_write_buffer().is_err(),
            None => false,
        };
        if failed {
            self.close(token);
        }
    }

    /// Drain the socket (edge-triggered), handling frames as they complete.
    fn read_frames(&mut self, token: Token) -> Result<()> {
        loop {
            let peer = match self.peers.get_mut(&token) {
                Some(p) => p,
                None => return Ok(()),
            };
            let before = peer.conn.readable().len();
            let buffered = peer.conn.fill_read_buffer()?;

            let handled = self.process_frames(token)?;
            if buffered == before && handled == 0 {
                return Ok(());
            }
        }
    }

    /// Decode every complete frame buffered for `token`.
    fn process_frames(&mut self, token: Token) -> Result<usize> {
        let factory = self.factory;
        let Self {
            peers,
            config,
            stats,
            ..
        } = self;
        let peer = match peers.get_mut(&token) {
            Some(p) => p,
            None => return Ok(0),
        };

        let mut replies = BytesMut::new();
        let mut actions = Vec::new();
        let mut handled = 0;

        while let Some(mut msg) = peer.conn.next_frame(&factory)? {
            handled += 1;
            stats.frames_received += 1;
            tracing::trace!(peer = %peer.addr, %msg, "frame received");

            match msg.message_type() {
                Some(MessageType::Heartbeat) => {
                    if !msg.is_resp_packet() {
                        let mut reply = Message::new(MessageType::Heartbeat)
                            .with_version(config.version)
                            .with_seq(msg.seq());
                        reply.set_resp_packet();
                        reply.encode(&mut replies)?;
                        stats.replies_sent += 1;
                    }
                }
                Some(MessageType::Handshake) => {
                    if msg.payload().len() > MAX_NODE_ID_LENGTH {
                        return Err(CodecError::malformed(format!(
                            "handshake node ID too long: {} bytes (max: {})",
                            msg.payload().len(),
                            MAX_NODE_ID_LENGTH
                        )));
                    }
                    let node_id = msg.payload().to_vec();
                    tracing::info!(
                        peer = %peer.addr,
                        node_id = %String::from_utf8_lossy(&node_id),
                        "handshake"
                    );
                    peer.node_id = Some(node_id);
                    if !msg.is_resp_packet() {
                        let mut reply = Message::new(MessageType::Handshake)
                            .with_version(config.version)
                            .with_seq(msg.seq())
                            .with_payload(&config.node_id);
                        reply.set_resp_packet();
                        reply.encode(&mut replies)?;
                        stats.replies_sent += 1;
                    }
                }
                Some(MessageType::RequestNodeIDs) => {
                    actions.push(Action::SendNodeIds { seq: msg.seq() });
                }
                Some(MessageType::ResponseNodeIDs) => match decode_node_ids(msg.payload()) {
                    Ok(ids) => tracing::debug!(peer = %peer.addr, count = ids.len(), "node IDs"),
                    Err(e) => tracing::debug!(peer = %peer.addr, error = %e, "bad node ID list"),
                },
                Some(MessageType::PeerToPeerMessage) | Some(MessageType::BroadcastMessage) => {
                    if peer.node_id.is_none() {
                        tracing::warn!(peer = %peer.addr, seq = msg.seq(), "routed frame before handshake, dropped");
                        continue;
                    }
                    let dst = if msg.message_type() == Some(MessageType::PeerToPeerMessage) {
                        Some(msg.options().dst_node_ids().to_vec())
                    } else {
                        None
                    };
                    let mut frame = BytesMut::with_capacity(msg.length() as usize);
                    msg.encode(&mut frame)?;
                    actions.push(Action::Forward {
                        frame: frame.freeze(),
                        dst,
                    });
                }
                None => {
                    tracing::debug!(peer = %peer.addr, packet_type = msg.packet_type(), "unknown packet type ignored");
                }
            }
        }

        if !replies.is_empty() {
            peer.conn.queue_frame(&replies)?;
            peer.conn.flush_write_buffer()?;
        }

        for action in actions {
            match action {
                Action::SendNodeIds { seq } => self.send_node_ids(token, seq)?,
                Action::Forward { frame, dst } => self.forward(token, frame, dst.as_deref()),
            }
        }

        Ok(handled)
    }

    /// Answer RequestNodeIDs with this node's ID and every handshaken peer's.
    fn send_node_ids(&mut self, token: Token, seq: u32) -> Result<()> {
        let ids: Vec<&[u8]> = std::iter::once(self.config.node_id.as_slice())
            .chain(
                self.peers
                    .iter()
                    .filter(|(t, _)| **t != token)
                    .filter_map(|(_, p)| p.node_id.as_deref()),
            )
            .take(MAX_DST_NODE_ID_COUNT)
            .collect();

        let mut payload = BytesMut::new();
        encode_node_ids(&ids, &mut payload)?;

        let mut reply = Message::new(MessageType::ResponseNodeIDs)
            .with_version(self.config.version)
            .with_seq(seq)
            .with_payload(&payload);
        reply.set_resp_packet();

        if let Some(peer) = self.peers.get_mut(&token) {
            peer.conn.send(&mut reply)?;
            peer.conn.flush_write_buffer()?;
            self.stats.replies_sent += 1;
        }
        Ok(())
    }

    /// Relay one frame. The bytes are shared by every destination.
    fn forward(&mut self, source: Token, frame: Bytes, dst: Option<&[NodeId]>) {
        let mut failed = Vec::new();
        let mut delivered = 0;

        for (token, peer) in self.peers.iter_mut() {
            if *token == source {
                continue;
            }
            let node_id = match &peer.node_id {
                Some(id) => id,
                None => continue,
            };
            if let Some(dst) = dst {
                if !dst.iter().any(|d| d == node_id) {
                    continue;
                }
            }

            let sent = peer
                .conn
                .queue_frame(&frame)
                .and_then(|_| peer.conn.flush_write_buffer());
            match sent {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(peer = %peer.addr, error = %e, "forward failed");
                    failed.push(*token);
                }
            }
        }

        self.stats.frames_forwarded += delivered;
        tracing::debug!(len = frame.len(), delivered, "frame forwarded");

        for token in failed {
            self.close(token);
        }
    }

    fn close(&mut self, token: Token) {
        if let Some(mut peer) = self.peers.remove(&token) {
            let _ = self.poll.registry().deregister(peer.conn.stream_mut());
            tracing::info!(peer = %peer.addr, token = token.0, "peer disconnected");
        }
    }
}

#[cfg(unix)]
fn tune_socket_buffers(stream: &TcpStream, size: usize) {
    use std::os::unix::io::AsRawFd;

    let optval: libc::c_int = size.min(libc::c_int::MAX as usize) as libc::c_int;
    for opt in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
        // Ignore errors - not all platforms support this
        let ret = unsafe {
            libc::setsockopt(
                stream.as_raw_fd(),
                libc::SOL_SOCKET,
                opt,
                &optval as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            tracing::debug!(opt, "setsockopt failed");
        }
    }
}

#[cfg(not(unix))]
fn tune_socket_buffers(_stream: &TcpStream, _size: usize) {}
