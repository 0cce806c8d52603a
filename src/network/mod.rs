//! Network Layer: framed TCP transport for the gateway
//!
//! `Connection` turns a byte stream into frames; `Server` is a mio-driven
//! gateway node built on it.

mod connection;
mod server;

pub use connection::{Connection, ConnectionConfig};
pub use server::{Server, ServerStats};
