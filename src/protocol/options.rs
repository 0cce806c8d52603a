//! Addressing block carried by PeerToPeerMessage and BroadcastMessage frames
//!
//! Layout:
//! ```text
//! +------------+----------+-------------+---------+-----------+---------------------------+
//! | group len  | group ID | src ID len  | src ID  | dst count | (ID len(2) + ID) x count  |
//! | 2B (BE)    | N bytes  | 2B (BE)     | N bytes | 1B        |                           |
//! +------------+----------+-------------+---------+-----------+---------------------------+
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{CodecError, Result};

/// group ID length(2) + node ID length(2) + dst node ID count(1)
pub const OPTIONS_MIN_LENGTH: usize = 5;

pub const MAX_GROUP_ID_LENGTH: usize = u16::MAX as usize;

pub const MAX_NODE_ID_LENGTH: usize = u16::MAX as usize;

/// The destination count is a full byte on the wire.
pub const MAX_DST_NODE_ID_COUNT: usize = u8::MAX as usize;

/// Opaque node identifier.
pub type NodeId = Vec<u8>;

/// Group, source and destinations of a routed frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    group_id: String,
    src_node_id: NodeId,
    dst_node_ids: Vec<NodeId>,
}

impl Options {
    /// Build a validated addressing block.
    pub fn new(
        group_id: impl Into<String>,
        src_node_id: impl Into<NodeId>,
        dst_node_ids: Vec<NodeId>,
    ) -> Result<Self> {
        let options = Self {
            group_id: group_id.into(),
            src_node_id: src_node_id.into(),
            dst_node_ids,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn src_node_id(&self) -> &[u8] {
        &self.src_node_id
    }

    pub fn dst_node_ids(&self) -> &[NodeId] {
        &self.dst_node_ids
    }

    /// Append one destination, keeping the count and length limits.
    pub fn push_dst_node_id(&mut self, node_id: impl Into<NodeId>) -> Result<()> {
        let node_id = node_id.into();
        if self.dst_node_ids.len() >= MAX_DST_NODE_ID_COUNT {
            return Err(CodecError::TooManyDestinations {
                count: self.dst_node_ids.len() + 1,
                max: MAX_DST_NODE_ID_COUNT,
            });
        }
        check_node_id(&node_id)?;
        self.dst_node_ids.push(node_id);
        Ok(())
    }

    /// Check every field against its wire capacity.
    pub fn validate(&self) -> Result<()> {
        if self.group_id.len() > MAX_GROUP_ID_LENGTH {
            return Err(CodecError::GroupIdTooLong {
                len: self.group_id.len(),
                max: MAX_GROUP_ID_LENGTH,
            });
        }
        check_node_id(&self.src_node_id)?;
        if self.dst_node_ids.len() > MAX_DST_NODE_ID_COUNT {
            return Err(CodecError::TooManyDestinations {
                count: self.dst_node_ids.len(),
                max: MAX_DST_NODE_ID_COUNT,
            });
        }
        self.dst_node_ids.iter().try_for_each(|id| check_node_id(id))
    }

    /// Exact number of bytes `encode` appends.
    pub fn encoded_len(&self) -> usize {
        OPTIONS_MIN_LENGTH
            + self.group_id.len()
            + self.src_node_id.len()
            + self.dst_node_ids.iter().map(|id| 2 + id.len()).sum::<usize>()
    }

    /// Append the block to `dst`.
    ///
    /// Limits are checked before the first byte is written, so on error `dst`
    /// is left untouched.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        self.validate()?;
        dst.reserve(self.encoded_len());

        dst.put_u16(self.group_id.len() as u16);
        dst.put_slice(self.group_id.as_bytes());

        dst.put_u16(self.src_node_id.len() as u16);
        dst.put_slice(&self.src_node_id);

        dst.put_u8(self.dst_node_ids.len() as u8);
        for node_id in &self.dst_node_ids {
            dst.put_u16(node_id.len() as u16);
            dst.put_slice(node_id);
        }
        Ok(())
    }

    /// Parse a block from the start of `buf`.
    ///
    /// `buf` must already hold the whole block; a short buffer is malformed,
    /// never incomplete. Returns the block and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < OPTIONS_MIN_LENGTH {
            return Err(CodecError::malformed(format!(
                "options block too short: {} bytes (min: {})",
                buf.len(),
                OPTIONS_MIN_LENGTH
            )));
        }

        let mut cursor = buf;

        let group_len = cursor.get_u16() as usize;
        let group_bytes = take(&mut cursor, group_len, "group ID")?;
        let group_id = std::str::from_utf8(group_bytes)
            .map_err(|_| CodecError::malformed("group ID is not valid UTF-8"))?
            .to_owned();

        let src_node_id = read_node_id(&mut cursor, "source node ID")?;

        let count = take(&mut cursor, 1, "destination count")?[0] as usize;
        // Every entry needs at least its 2-byte length prefix.
        if cursor.remaining() < count * 2 {
            return Err(CodecError::malformed(format!(
                "{} destination node IDs declared, only {} bytes left",
                count,
                cursor.remaining()
            )));
        }
        let mut dst_node_ids = Vec::with_capacity(count);
        for _ in 0..count {
            dst_node_ids.push(read_node_id(&mut cursor, "destination node ID")?);
        }

        let consumed = buf.len() - cursor.remaining();
        Ok((
            Self {
                group_id,
                src_node_id,
                dst_node_ids,
            },
            consumed,
        ))
    }
}

pub(super) fn check_node_id(node_id: &[u8]) -> Result<()> {
    if node_id.len() > MAX_NODE_ID_LENGTH {
        return Err(CodecError::NodeIdTooLong {
            len: node_id.len(),
            max: MAX_NODE_ID_LENGTH,
        });
    }
    Ok(())
}

/// Split `len` bytes off the front of `cursor`.
fn take<'b>(cursor: &mut &'b [u8], len: usize, what: &str) -> Result<&'b [u8]> {
    if cursor.len() < len {
        return Err(CodecError::malformed(format!(
            "{} overruns buffer: need {} bytes, have {}",
            what,
            len,
            cursor.len()
        )));
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}

pub(super) fn read_node_id(cursor: &mut &[u8], what: &str) -> Result<NodeId> {
    let len_bytes = take(cursor, 2, what)?;
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    Ok(take(cursor, len, what)?.to_vec())
}
