//! Message capability and factory
//!
//! The stream driver only needs to peek a header, decode a frame and encode a
//! reply. Anything implementing [`WireMessage`] can be plugged in through a
//! [`MessageFactory`] without touching the driver.

use bytes::BytesMut;

use super::message::Message;
use super::status::DecodeStatus;
use crate::error::Result;

/// What a frame type must support to travel through a gateway connection
pub trait WireMessage<'a> {
    fn length(&self) -> u32;
    fn packet_type(&self) -> u16;
    fn seq(&self) -> u32;
    fn is_resp_packet(&self) -> bool;
    fn has_options(&self) -> bool;

    fn decode_header(&mut self, buf: &[u8]) -> Result<DecodeStatus>;
    fn decode(&mut self, buf: &'a [u8]) -> Result<DecodeStatus>;
    fn encode(&mut self, dst: &mut BytesMut) -> Result<()>;
}

impl<'a> WireMessage<'a> for Message<'a> {
    fn length(&self) -> u32 {
        Message::length(self)
    }

    fn packet_type(&self) -> u16 {
        Message::packet_type(self)
    }

    fn seq(&self) -> u32 {
        Message::seq(self)
    }

    fn is_resp_packet(&self) -> bool {
        Message::is_resp_packet(self)
    }

    fn has_options(&self) -> bool {
        Message::has_options(self)
    }

    fn decode_header(&mut self, buf: &[u8]) -> Result<DecodeStatus> {
        Message::decode_header(self, buf)
    }

    fn decode(&mut self, buf: &'a [u8]) -> Result<DecodeStatus> {
        Message::decode(self, buf)
    }

    fn encode(&mut self, dst: &mut BytesMut) -> Result<()> {
        Message::encode(self, dst)
    }
}

/// Produces empty messages for the decoder to fill in
pub trait MessageFactory {
    type Message<'a>: WireMessage<'a>;

    fn build_message<'a>(&self) -> Self::Message<'a>;
}

/// Factory for the default gateway frame format
#[derive(Debug, Clone, Copy, Default)]
pub struct P2PMessageFactory;

impl MessageFactory for P2PMessageFactory {
    type Message<'a> = Message<'a>;

    #[inline(always)]
    fn build_message<'a>(&self) -> Message<'a> {
        Message::default()
    }
}
