//! Protocol Layer: gateway frame codec
//!
//! Design:
//! - Fixed 14-byte big-endian header, self-delimiting via the length field
//! - Addressing Options only on routed packet types
//! - Zero-copy decode: payloads borrow the receive buffer
//! - Atomic encode: a failed encode never leaves a partial frame behind

mod factory;
mod message;
mod node_ids;
mod options;
mod status;

pub use factory::{MessageFactory, P2PMessageFactory, WireMessage};
pub use message::{ExtFlags, Message, MessageType, OwnedMessage, HEADER_LENGTH};
pub use node_ids::{decode_node_ids, encode_node_ids};
pub use options::{
    NodeId, Options, MAX_DST_NODE_ID_COUNT, MAX_GROUP_ID_LENGTH, MAX_NODE_ID_LENGTH,
    OPTIONS_MIN_LENGTH,
};
pub use status::{status_code, DecodeStatus, MESSAGE_ERROR, MESSAGE_INCOMPLETE};
