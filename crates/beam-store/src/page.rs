use crate::StoreError;
pub use beam_common::config::{
    HEADER_SIZE, KV_HEADER_SIZE, OFFSET_SIZE, PAGE_SIZE, POINTER_SIZE,
};

/// The on-disk tag stored in the first two bytes of every node page.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum NodeType {
    Internal = 1,
    Leaf = 2,
}

impl TryFrom<u16> for NodeType {
    type Error = StoreError;

    fn try_from(tag: u16) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(NodeType::Internal),
            2 => Ok(NodeType::Leaf),
            other => Err(StoreError::UnknownNodeType(other)),
        }
    }
}

/// Byte position of the pointer table entry `index`.
pub(crate) fn pointer_pos(index: u16) -> usize {
    HEADER_SIZE + POINTER_SIZE * index as usize
}

/// Byte position of offset table entry `index` in a node with `nkeys` keys.
pub(crate) fn offset_pos(nkeys: u16, index: u16) -> usize {
    HEADER_SIZE + POINTER_SIZE * nkeys as usize + OFFSET_SIZE * index as usize
}

/// First byte after the pointer and offset tables.
pub(crate) fn payload_start(nkeys: u16) -> usize {
    offset_pos(nkeys, nkeys) + OFFSET_SIZE
}

/// Total node size for `nkeys` entries carrying `payload` bytes of records.
pub fn node_size(nkeys: u16, payload: usize) -> usize {
    payload_start(nkeys) + payload
}

/// Size of one encoded `keyLen | valLen | key | value` record.
pub fn record_size(key_len: usize, value_len: usize) -> usize {
    KV_HEADER_SIZE + key_len + value_len
}
