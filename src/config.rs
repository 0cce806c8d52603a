//! Gateway node configuration

use std::net::SocketAddr;

use crate::network::ConnectionConfig;
use crate::protocol::NodeId;

/// Settings for a [`Server`](crate::network::Server)
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    /// Sent to peers in handshake replies.
    pub node_id: NodeId,
    /// Version stamped on frames this node originates.
    pub version: u16,
    pub connection: ConnectionConfig,
    /// SO_SNDBUF / SO_RCVBUF for accepted sockets. Kernel default when `None`.
    pub socket_buffer_size: Option<usize>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 30300)),
            node_id: b"gateway".to_vec(),
            version: 1,
            connection: ConnectionConfig::default(),
            socket_buffer_size: None,
        }
    }
}
