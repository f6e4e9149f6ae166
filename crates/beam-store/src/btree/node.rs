//! Node codec.
//!
//! A node is one fixed-size page laid out as
//!
//! ```text
//! | type | nkeys | pointers   | offsets          | key-values |
//! |  2B  |  2B   | nkeys * 8B | (nkeys + 1) * 2B | ...        |
//! ```
//!
//! with every record encoded as `| klen 2B | vlen 2B | key | value |`.
//! Offsets are cumulative end positions relative to the start of the
//! payload, so `offsets[0]` is always 0 and the i-th record can be found
//! without walking the ones before it. All integers are big-endian.
//!
//! The accessors only check bounds. Sortedness and total size are the
//! caller's business; [`Node::verify`] checks them explicitly.

use crate::page::{
    node_size, offset_pos, payload_start, pointer_pos, NodeType, HEADER_SIZE, KV_HEADER_SIZE,
    PAGE_SIZE,
};
use crate::StoreError;
use bytes::Bytes;

/// A B+tree node over any byte container.
///
/// Reading needs `B: AsRef<[u8]>`, writing needs `B: AsMut<[u8]>` as well.
/// Mutators take the source node as `&Node<_>`, so a published node can
/// never be changed through them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<B = Vec<u8>> {
    buf: B,
}

impl Node<Vec<u8>> {
    /// A zeroed page of [`PAGE_SIZE`] bytes.
    pub fn new_page() -> Self {
        Self {
            buf: vec![0; PAGE_SIZE],
        }
    }

    /// A zeroed buffer of `len` bytes, e.g. a page of a non-default size.
    pub fn zeroed(len: usize) -> Result<Self, StoreError> {
        Self::from_buf(vec![0; len])
    }

    /// Hands the finished node over to readers. The bytes can no longer be
    /// written, and clones share the same allocation.
    pub fn freeze(self) -> Node<Bytes> {
        Node {
            buf: Bytes::from(self.buf),
        }
    }
}

impl<B: AsRef<[u8]>> Node<B> {
    /// Wraps an existing buffer. It must at least hold the header.
    pub fn from_buf(buf: B) -> Result<Self, StoreError> {
        let len = buf.as_ref().len();
        if len < HEADER_SIZE {
            return Err(StoreError::CorruptNode(format!(
                "buffer of {} bytes cannot hold a node header",
                len
            )));
        }
        Ok(Self { buf })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    /// Size of the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.as_bytes().len()
    }

    // --- Header ---

    pub fn node_type(&self) -> Result<NodeType, StoreError> {
        NodeType::try_from(self.header_u16(0))
    }

    pub fn key_count(&self) -> u16 {
        self.header_u16(2)
    }

    fn header_u16(&self, pos: usize) -> u16 {
        let buf = self.as_bytes();
        u16::from_be_bytes([buf[pos], buf[pos + 1]])
    }

    // --- Pointers ---

    /// Child page id at `index`. Always 0 in leaves.
    pub fn pointer(&self, index: u16) -> Result<u64, StoreError> {
        self.check_key_index("pointer", index)?;
        let raw = self.read_array::<8>(pointer_pos(index))?;
        Ok(u64::from_be_bytes(raw))
    }

    // --- Offsets ---

    /// Cumulative end offset of record `index - 1`; `offset(0)` is 0.
    pub fn offset(&self, index: u16) -> Result<u16, StoreError> {
        self.check_offset_index("offset", index)?;
        let raw = self.read_array::<2>(offset_pos(self.key_count(), index))?;
        Ok(u16::from_be_bytes(raw))
    }

    // --- Key-values ---

    /// Absolute buffer position of record `index`. `kv_pos(key_count())`
    /// is the end of the payload.
    pub fn kv_pos(&self, index: u16) -> Result<usize, StoreError> {
        self.check_offset_index("kv_pos", index)?;
        Ok(payload_start(self.key_count()) + self.offset(index)? as usize)
    }

    pub fn key(&self, index: u16) -> Result<&[u8], StoreError> {
        self.check_key_index("key", index)?;
        let (pos, klen, _) = self.record_header(index)?;
        let start = pos + KV_HEADER_SIZE;
        self.read_slice(start, klen)
    }

    pub fn value(&self, index: u16) -> Result<&[u8], StoreError> {
        self.check_key_index("value", index)?;
        let (pos, klen, vlen) = self.record_header(index)?;
        let start = pos + KV_HEADER_SIZE + klen;
        self.read_slice(start, vlen)
    }

    /// Bytes occupied by header, tables and payload through the last
    /// record. An empty node reports 0.
    pub fn used_bytes(&self) -> Result<usize, StoreError> {
        let nkeys = self.key_count();
        if nkeys == 0 {
            return Ok(0);
        }
        let (pos, klen, vlen) = self.record_header(nkeys - 1)?;
        Ok(pos + KV_HEADER_SIZE + klen + vlen)
    }

    pub fn entry(&self, index: u16) -> Result<(&[u8], &[u8]), StoreError> {
        Ok((self.key(index)?, self.value(index)?))
    }

    /// Iterates over `(key, value)` pairs in index order.
    pub fn entries(&self) -> impl Iterator<Item = Result<(&[u8], &[u8]), StoreError>> + '_ {
        (0..self.key_count()).map(move |i| self.entry(i))
    }

    /// Full structural check: offsets are monotonic and agree with the
    /// record lengths, keys strictly ascend, and everything fits the buffer.
    pub fn verify(&self) -> Result<(), StoreError> {
        self.node_type()?;
        let nkeys = self.key_count();
        if payload_start(nkeys) > self.capacity() {
            return Err(StoreError::CorruptNode(format!(
                "tables for {} keys overrun a {} byte buffer",
                nkeys,
                self.capacity()
            )));
        }
        if self.offset(0)? != 0 {
            return Err(StoreError::CorruptNode("first offset is not zero".into()));
        }

        let mut prev: Option<&[u8]> = None;
        for i in 0..nkeys {
            let (pos, klen, vlen) = self.record_header(i)?;
            let end = self.offset(i + 1)? as usize;
            let start = self.offset(i)? as usize;
            if end < start || end - start != KV_HEADER_SIZE + klen + vlen {
                return Err(StoreError::CorruptNode(format!(
                    "record {} spans {}..{} but encodes {} bytes",
                    i,
                    start,
                    end,
                    KV_HEADER_SIZE + klen + vlen
                )));
            }
            self.read_slice(pos, end - start)?;

            let key = self.key(i)?;
            if prev.is_some_and(|p| p >= key) {
                return Err(StoreError::UnsortedKeys(i as usize));
            }
            prev = Some(key);
        }

        let used = node_size(nkeys, self.offset(nkeys)? as usize);
        if used > self.capacity() {
            return Err(StoreError::CorruptNode(format!(
                "node uses {} bytes of a {} byte buffer",
                used,
                self.capacity()
            )));
        }
        Ok(())
    }

    // --- Helpers ---

    /// Position, key length and value length of record `index`.
    fn record_header(&self, index: u16) -> Result<(usize, usize, usize), StoreError> {
        let pos = self.kv_pos(index)?;
        let klen = u16::from_be_bytes(self.read_array::<2>(pos)?) as usize;
        let vlen = u16::from_be_bytes(self.read_array::<2>(pos + 2)?) as usize;
        Ok((pos, klen, vlen))
    }

    pub(crate) fn check_key_index(&self, field: &'static str, index: u16) -> Result<(), StoreError> {
        let nkeys = self.key_count();
        if index >= nkeys {
            return Err(StoreError::IndexOutOfBounds {
                field,
                index: index as usize,
                limit: nkeys as usize,
            });
        }
        Ok(())
    }

    fn check_offset_index(&self, field: &'static str, index: u16) -> Result<(), StoreError> {
        let nkeys = self.key_count();
        if index > nkeys {
            return Err(StoreError::IndexOutOfBounds {
                field,
                index: index as usize,
                limit: nkeys as usize + 1,
            });
        }
        Ok(())
    }

    pub(crate) fn read_slice(&self, start: usize, len: usize) -> Result<&[u8], StoreError> {
        self.as_bytes().get(start..start + len).ok_or_else(|| {
            StoreError::CorruptNode(format!(
                "read of {} bytes at {} runs past the {} byte buffer",
                len,
                start,
                self.capacity()
            ))
        })
    }

    fn read_array<const N: usize>(&self, pos: usize) -> Result<[u8; N], StoreError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(pos, N)?);
        Ok(out)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Node<B> {
    /// Writes type and key count. Must come before any append, since the
    /// key count fixes where the tables end.
    pub fn set_header(&mut self, node_type: NodeType, nkeys: u16) {
        let buf = self.buf.as_mut();
        buf[0..2].copy_from_slice(&(node_type as u16).to_be_bytes());
        buf[2..4].copy_from_slice(&nkeys.to_be_bytes());
    }

    pub fn set_pointer(&mut self, index: u16, ptr: u64) -> Result<(), StoreError> {
        self.check_key_index("pointer", index)?;
        self.write_at(pointer_pos(index), &ptr.to_be_bytes())
    }

    pub fn set_offset(&mut self, index: u16, offset: u16) -> Result<(), StoreError> {
        self.check_offset_index("offset", index)?;
        let pos = offset_pos(self.key_count(), index);
        self.write_at(pos, &offset.to_be_bytes())
    }

    pub(crate) fn write_at(&mut self, pos: usize, bytes: &[u8]) -> Result<(), StoreError> {
        let capacity = self.capacity();
        let end = pos + bytes.len();
        match self.buf.as_mut().get_mut(pos..end) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                Ok(())
            }
            None => Err(StoreError::CapacityExceeded {
                needed: end,
                capacity,
            }),
        }
    }
}
