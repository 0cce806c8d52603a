//! Gateway wire codec
//!
//! Frame format and codec for the peer-to-peer gateway that carries
//! consensus and group traffic between blockchain nodes:
//! - `protocol`: fixed header, addressing Options, zero-copy payloads
//! - `network`: stream framing driver and a mio-based gateway node

pub mod config;
pub mod error;
pub mod network;
pub mod protocol;

pub use config::GatewayConfig;
pub use error::{CodecError, Result};
