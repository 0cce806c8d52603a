//! Gateway frame format
//!
//! Layout (all integers big-endian):
//! ┌─────────────────────────────────────────────────────┐
//! │ length (4) │ version (2) │ packet type (2)          │
//! │ seq (4)    │ ext (2)                                │  14 bytes, fixed
//! ├─────────────────────────────────────────────────────┤
//! │ Options (PeerToPeerMessage / BroadcastMessage only) │
//! ├─────────────────────────────────────────────────────┤
//! │ Payload (length - 14 - options)                     │
//! └─────────────────────────────────────────────────────┘
//!
//! `length` counts the whole frame including itself, so a frame is
//! self-delimiting on a byte stream. Decoded payloads borrow the receive
//! buffer: a `Message<'a>` cannot outlive the bytes it was decoded from.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::options::Options;
use super::status::DecodeStatus;
use crate::error::{CodecError, Result};

/// length(4) + version(2) + packetType(2) + seq(4) + ext(2)
pub const HEADER_LENGTH: usize = 14;

/// Packet types understood by the gateway
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Connection keep-alive
    Heartbeat = 0x1,
    /// Session setup between two gateways
    Handshake = 0x2,
    /// Ask a peer for the node IDs it serves
    RequestNodeIDs = 0x3,
    /// Answer to RequestNodeIDs
    ResponseNodeIDs = 0x4,
    /// Routed to the listed destination nodes
    PeerToPeerMessage = 0x5,
    /// Routed to every node of a group
    BroadcastMessage = 0x6,
}

impl MessageType {
    #[inline(always)]
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x1 => Some(Self::Heartbeat),
            0x2 => Some(Self::Handshake),
            0x3 => Some(Self::RequestNodeIDs),
            0x4 => Some(Self::ResponseNodeIDs),
            0x5 => Some(Self::PeerToPeerMessage),
            0x6 => Some(Self::BroadcastMessage),
            _ => None,
        }
    }
}

/// Extension bits of the `ext` header field
///
/// Unassigned bits are carried through encode/decode untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtFlags(u16);

impl ExtFlags {
    /// Frame answers an earlier request with the same `seq`.
    pub const RESPONSE: Self = Self(0x0001);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// One gateway frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message<'a> {
    length: u32,
    version: u16,
    packet_type: u16,
    seq: u32,
    ext: u16,
    options: Options,
    payload: &'a [u8],
}

impl<'a> Message<'a> {
    pub fn new(packet_type: MessageType) -> Self {
        Self {
            packet_type: packet_type as u16,
            ..Self::default()
        }
    }

    /// Raw packet type, including values this crate does not know.
    pub fn with_packet_type(mut self, packet_type: u16) -> Self {
        self.packet_type = packet_type;
        self
    }

    pub fn with_version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn with_seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_ext(mut self, ext: u16) -> Self {
        self.ext = ext;
        self
    }

    /// Ignored on the wire unless the packet type carries options.
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_payload(mut self, payload: &'a [u8]) -> Self {
        self.payload = payload;
        self
    }

    /// Total frame length. Zero until the message has been encoded or decoded.
    #[inline(always)]
    pub fn length(&self) -> u32 {
        self.length
    }

    #[inline(always)]
    pub fn version(&self) -> u16 {
        self.version
    }

    #[inline(always)]
    pub fn packet_type(&self) -> u16 {
        self.packet_type
    }

    #[inline(always)]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u16(self.packet_type)
    }

    #[inline(always)]
    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn set_seq(&mut self, seq: u32) {
        self.seq = seq;
    }

    #[inline(always)]
    pub fn ext(&self) -> u16 {
        self.ext
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    #[inline(always)]
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Only routed packet types carry an Options block.
    #[inline(always)]
    pub fn has_options(&self) -> bool {
        self.packet_type == MessageType::PeerToPeerMessage as u16
            || self.packet_type == MessageType::BroadcastMessage as u16
    }

    pub fn set_resp_packet(&mut self) {
        self.ext |= ExtFlags::RESPONSE.bits();
    }

    #[inline(always)]
    pub fn is_resp_packet(&self) -> bool {
        ExtFlags::from_bits(self.ext).contains(ExtFlags::RESPONSE)
    }

    /// Read the fixed header from the front of `buf`.
    ///
    /// Does not require the rest of the frame to be buffered; callers use
    /// [`length`](Self::length) afterwards to know how much to wait for.
    pub fn decode_header(&mut self, buf: &[u8]) -> Result<DecodeStatus> {
        if buf.len() < HEADER_LENGTH {
            return Ok(DecodeStatus::Incomplete);
        }

        let mut cursor = &buf[..HEADER_LENGTH];
        let length = cursor.get_u32();
        if (length as usize) < HEADER_LENGTH {
            tracing::trace!(length, "frame length shorter than header");
            return Err(CodecError::malformed(format!(
                "declared length {} is shorter than the {}-byte header",
                length, HEADER_LENGTH
            )));
        }

        self.length = length;
        self.version = cursor.get_u16();
        self.packet_type = cursor.get_u16();
        self.seq = cursor.get_u32();
        self.ext = cursor.get_u16();

        Ok(DecodeStatus::Complete(HEADER_LENGTH))
    }

    /// Decode one whole frame from the front of `buf` (zero-copy for payload).
    ///
    /// Bytes after the frame are left alone; on success the consumed count is
    /// exactly the frame length.
    pub fn decode(&mut self, buf: &'a [u8]) -> Result<DecodeStatus> {
        if let DecodeStatus::Incomplete = self.decode_header(buf)? {
            return Ok(DecodeStatus::Incomplete);
        }

        let length = self.length as usize;
        if buf.len() < length {
            return Ok(DecodeStatus::Incomplete);
        }

        let frame = &buf[..length];
        let mut offset = HEADER_LENGTH;

        if self.has_options() {
            match Options::decode(&frame[offset..]) {
                Ok((options, consumed)) => {
                    self.options = options;
                    offset += consumed;
                }
                Err(e) => {
                    tracing::trace!(seq = self.seq, error = %e, "bad options block");
                    // nothing from an earlier decode may survive next to the new header
                    self.options = Options::default();
                    self.payload = &[];
                    return Err(e);
                }
            }
        } else {
            self.options = Options::default();
        }

        self.payload = &frame[offset..];
        Ok(DecodeStatus::Complete(length))
    }

    /// Append the encoded frame to `dst`.
    ///
    /// On error `dst` is restored to its length at entry, so no partial frame
    /// is ever left behind. On success the computed length is recorded on the
    /// message.
    pub fn encode(&mut self, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();

        let options_len = if self.has_options() {
            self.options.validate()?;
            self.options.encoded_len()
        } else {
            0
        };

        let total = HEADER_LENGTH + options_len + self.payload.len();
        if total > u32::MAX as usize {
            return Err(CodecError::FrameTooLarge {
                size: total,
                max: u32::MAX as usize,
            });
        }

        dst.reserve(total);

        // length is patched in once everything else is written
        dst.put_u32(0);
        dst.put_u16(self.version);
        dst.put_u16(self.packet_type);
        dst.put_u32(self.seq);
        dst.put_u16(self.ext);

        if self.has_options() {
            if let Err(e) = self.options.encode(dst) {
                dst.truncate(start);
                return Err(e);
            }
        }

        dst.put_slice(self.payload);

        let length = (dst.len() - start) as u32;
        dst[start..start + 4].copy_from_slice(&length.to_be_bytes());
        self.length = length;

        Ok(())
    }

    /// Detach from the receive buffer by copying the payload.
    pub fn into_owned(self) -> OwnedMessage {
        OwnedMessage {
            length: self.length,
            version: self.version,
            packet_type: self.packet_type,
            seq: self.seq,
            ext: self.ext,
            options: self.options,
            payload: Bytes::copy_from_slice(self.payload),
        }
    }
}

impl fmt::Display for Message<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message {{ length: {}, version: {}, packet_type: {}, seq: {}, ext: {} }}",
            self.length, self.version, self.packet_type, self.seq, self.ext
        )
    }
}

/// A decoded frame that no longer borrows the receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage {
    length: u32,
    version: u16,
    packet_type: u16,
    seq: u32,
    ext: u16,
    options: Options,
    payload: Bytes,
}

impl OwnedMessage {
    /// Borrowing view with the same field values.
    pub fn as_message(&self) -> Message<'_> {
        Message {
            length: self.length,
            version: self.version,
            packet_type: self.packet_type,
            seq: self.seq,
            ext: self.ext,
            options: self.options.clone(),
            payload: &self.payload,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}
