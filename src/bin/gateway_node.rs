//! Gateway Node Binary
//!
//! Accepts gateway peers, answers heartbeats/handshakes/node ID requests and
//! relays peer-to-peer and broadcast frames between handshaken peers.
//!
//! Usage:
//!   cargo run --release --bin gateway_node -- --bind 0.0.0.0:30300 --node-id node0

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use gateway_wire::network::{ConnectionConfig, Server};
use gateway_wire::GatewayConfig;

/// CLI definition
#[derive(Parser, Debug)]
#[command(name = "gateway_node", version, about = "P2P gateway node")]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:30300")]
    bind: SocketAddr,

    /// Node ID sent to peers during handshake
    #[arg(long, default_value = "gateway")]
    node_id: String,

    /// Protocol version stamped on frames this node originates
    #[arg(long, default_value_t = 1)]
    version: u16,

    /// Largest frame accepted from a peer, in bytes
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    max_frame_length: usize,

    /// SO_SNDBUF / SO_RCVBUF for peer sockets, in bytes
    #[arg(long)]
    socket_buffer: Option<usize>,
}

impl Cli {
    fn into_config(self) -> GatewayConfig {
        GatewayConfig {
            bind_addr: self.bind,
            node_id: self.node_id.into_bytes(),
            version: self.version,
            connection: ConnectionConfig {
                max_frame_length: self.max_frame_length,
                ..ConnectionConfig::default()
            },
            socket_buffer_size: self.socket_buffer,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = Cli::parse().into_config();

    let mut server = match Server::bind(config.clone()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(addr = %config.bind_addr, error = %e, "bind failed");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run() {
        tracing::error!(error = %e, "server stopped");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
