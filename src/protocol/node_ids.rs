//! Node ID list carried in ResponseNodeIDs payloads
//!
//! Same entry encoding as the destination list of [`Options`](super::Options):
//! a 1-byte count followed by 2-byte-length-prefixed IDs.

use bytes::{BufMut, BytesMut};

use super::options::{check_node_id, read_node_id, NodeId, MAX_DST_NODE_ID_COUNT};
use crate::error::{CodecError, Result};

/// Append `ids` to `dst`. Nothing is written if a limit is exceeded.
pub fn encode_node_ids<I: AsRef<[u8]>>(ids: &[I], dst: &mut BytesMut) -> Result<()> {
    if ids.len() > MAX_DST_NODE_ID_COUNT {
        return Err(CodecError::TooManyDestinations {
            count: ids.len(),
            max: MAX_DST_NODE_ID_COUNT,
        });
    }
    ids.iter().try_for_each(|id| check_node_id(id.as_ref()))?;

    dst.reserve(1 + ids.iter().map(|id| 2 + id.as_ref().len()).sum::<usize>());
    dst.put_u8(ids.len() as u8);
    for id in ids {
        let id = id.as_ref();
        dst.put_u16(id.len() as u16);
        dst.put_slice(id);
    }
    Ok(())
}

/// Parse a node ID list that must span all of `buf`.
pub fn decode_node_ids(buf: &[u8]) -> Result<Vec<NodeId>> {
    let (&count, mut cursor) = buf
        .split_first()
        .ok_or_else(|| CodecError::malformed("empty node ID list"))?;

    let mut ids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        ids.push(read_node_id(&mut cursor, "node ID")?);
    }
    if !cursor.is_empty() {
        return Err(CodecError::malformed(format!(
            "{} trailing bytes after node ID list",
            cursor.len()
        )));
    }
    Ok(ids)
}
