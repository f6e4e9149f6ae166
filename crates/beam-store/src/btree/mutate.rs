//! Copy-on-write node updates.
//!
//! Every function here reads an old node and writes a separate new one.
//! The new node's header must be set first, and its indices must be filled
//! in ascending order starting at 0: each append derives its position from
//! the offset written by the previous one.

use crate::btree::lookup::lookup_le;
use crate::btree::node::Node;
use crate::page::{node_size, payload_start, record_size, NodeType, KV_HEADER_SIZE};
use crate::StoreError;
use beam_common::StoreConfig;
use tracing::{debug, trace};

/// Writes one record and its pointer at `index` of `new`.
pub fn append_kv<B>(
    new: &mut Node<B>,
    index: u16,
    ptr: u64,
    key: &[u8],
    value: &[u8],
) -> Result<(), StoreError>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    let klen = u16::try_from(key.len()).map_err(|_| StoreError::KeyTooLarge {
        len: key.len(),
        max: u16::MAX as usize,
    })?;
    let vlen = u16::try_from(value.len()).map_err(|_| StoreError::ValueTooLarge {
        len: value.len(),
        max: u16::MAX as usize,
    })?;

    new.check_key_index("append", index)?;
    // offset[0] is defined as 0; anything else is a stale base
    let base = if index == 0 { 0 } else { new.offset(index)? as usize };
    let size = record_size(key.len(), value.len());
    let pos = payload_start(new.key_count()) + base;
    let end = pos + size;
    if end > new.capacity() {
        return Err(StoreError::CapacityExceeded {
            needed: end,
            capacity: new.capacity(),
        });
    }
    let next = payload_offset(base + size, new.capacity())?;

    // pointer and offset slots sit before `pos`, so they fit as well
    new.set_pointer(index, ptr)?;
    if index == 0 {
        new.set_offset(0, 0)?;
    }
    new.write_at(pos, &klen.to_be_bytes())?;
    new.write_at(pos + 2, &vlen.to_be_bytes())?;
    new.write_at(pos + KV_HEADER_SIZE, key)?;
    new.write_at(pos + KV_HEADER_SIZE + key.len(), value)?;
    new.set_offset(index + 1, next)?;
    trace!(index, klen, vlen, "node.append_kv");
    Ok(())
}

/// Copies `n` records starting at `src_index` of `old` to `dst_index` of `new`.
pub fn append_range<W, R>(
    new: &mut Node<W>,
    old: &Node<R>,
    dst_index: u16,
    src_index: u16,
    n: u16,
) -> Result<(), StoreError>
where
    W: AsRef<[u8]> + AsMut<[u8]>,
    R: AsRef<[u8]>,
{
    if n == 0 {
        return Ok(());
    }
    check_range("source range", src_index, n, old.key_count())?;
    check_range("destination range", dst_index, n, new.key_count())?;

    let src_pos = old.kv_pos(src_index)?;
    let src_end = if src_index + n >= old.key_count() {
        old.used_bytes()?
    } else {
        old.kv_pos(src_index + n)?
    };
    let len = src_end.checked_sub(src_pos).ok_or_else(|| {
        StoreError::CorruptNode(format!(
            "record {} starts at {} past the range end {}",
            src_index, src_pos, src_end
        ))
    })?;
    let dst_base = if dst_index == 0 { 0 } else { new.offset(dst_index)? as usize };
    let dst_pos = payload_start(new.key_count()) + dst_base;
    if dst_pos + len > new.capacity() {
        return Err(StoreError::CapacityExceeded {
            needed: dst_pos + len,
            capacity: new.capacity(),
        });
    }

    let src_base = old.offset(src_index)?;
    let mut offsets = Vec::with_capacity(n as usize);
    for i in 1..=n {
        let rel = old
            .offset(src_index + i)?
            .checked_sub(src_base)
            .ok_or_else(|| StoreError::CorruptNode(format!("offset {} decreases", src_index + i)))?;
        offsets.push(payload_offset(dst_base + rel as usize, new.capacity())?);
    }
    let pointers = (0..n)
        .map(|i| old.pointer(src_index + i))
        .collect::<Result<Vec<_>, _>>()?;

    for (i, ptr) in (0..n).zip(pointers) {
        new.set_pointer(dst_index + i, ptr)?;
    }
    if dst_index == 0 {
        new.set_offset(0, 0)?;
    }
    new.write_at(dst_pos, old.read_slice(src_pos, len)?)?;
    for (i, offset) in (1..=n).zip(offsets) {
        new.set_offset(dst_index + i, offset)?;
    }
    trace!(dst_index, src_index, n, bytes = len, "node.append_range");
    Ok(())
}

/// Builds `new` as a copy of leaf `old` with `(key, value)` inserted at `index`.
pub fn insert_into_leaf<W, R>(
    new: &mut Node<W>,
    old: &Node<R>,
    index: u16,
    key: &[u8],
    value: &[u8],
) -> Result<(), StoreError>
where
    W: AsRef<[u8]> + AsMut<[u8]>,
    R: AsRef<[u8]>,
{
    expect_leaf(old)?;
    let nkeys = old.key_count();
    if index > nkeys {
        return Err(StoreError::IndexOutOfBounds {
            field: "insert",
            index: index as usize,
            limit: nkeys as usize + 1,
        });
    }
    let new_nkeys = nkeys.checked_add(1).ok_or(StoreError::CapacityExceeded {
        needed: nkeys as usize + 1,
        capacity: u16::MAX as usize,
    })?;
    let payload = payload_len(old)? + record_size(key.len(), value.len());
    ensure_fits(new, node_size(new_nkeys, payload))?;

    new.set_header(NodeType::Leaf, new_nkeys);
    append_range(new, old, 0, 0, index)?;
    append_kv(new, index, 0, key, value)?;
    append_range(new, old, index + 1, index, nkeys - index)?;
    Ok(())
}

/// Builds `new` as a copy of leaf `old` with the value of record `index`
/// replaced. `key` must be the key already stored there.
pub fn update_leaf<W, R>(
    new: &mut Node<W>,
    old: &Node<R>,
    index: u16,
    key: &[u8],
    value: &[u8],
) -> Result<(), StoreError>
where
    W: AsRef<[u8]> + AsMut<[u8]>,
    R: AsRef<[u8]>,
{
    expect_leaf(old)?;
    old.check_key_index("update", index)?;
    if old.key(index)? != key {
        return Err(StoreError::KeyMismatch(index));
    }
    let nkeys = old.key_count();
    let replaced = record_size(old.key(index)?.len(), old.value(index)?.len());
    let payload = payload_len(old)?
        .checked_sub(replaced)
        .ok_or_else(|| StoreError::CorruptNode(format!("record {} overruns the payload", index)))?
        + record_size(key.len(), value.len());
    ensure_fits(new, node_size(nkeys, payload))?;

    new.set_header(NodeType::Leaf, nkeys);
    append_range(new, old, 0, 0, index)?;
    append_kv(new, index, 0, key, value)?;
    append_range(new, old, index + 1, index + 1, nkeys - index - 1)?;
    Ok(())
}

/// Builds a fresh leaf from entries that are already sorted and unique.
pub fn new_leaf<K, V>(config: &StoreConfig, entries: &[(K, V)]) -> Result<Node, StoreError>
where
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let nkeys = u16::try_from(entries.len()).map_err(|_| StoreError::CapacityExceeded {
        needed: entries.len(),
        capacity: u16::MAX as usize,
    })?;
    let mut payload = 0;
    for (i, (key, value)) in entries.iter().enumerate() {
        check_limits(config, key.as_ref(), value.as_ref())?;
        if i > 0 && entries[i - 1].0.as_ref() >= key.as_ref() {
            return Err(StoreError::UnsortedKeys(i));
        }
        payload += record_size(key.as_ref().len(), value.as_ref().len());
    }

    let mut node = Node::zeroed(config.page_size)?;
    ensure_fits(&node, node_size(nkeys, payload))?;
    node.set_header(NodeType::Leaf, nkeys);
    for (i, (key, value)) in entries.iter().enumerate() {
        append_kv(&mut node, i as u16, 0, key.as_ref(), value.as_ref())?;
    }
    Ok(node)
}

/// Inserts or replaces `key` in leaf `old`, returning the new page.
/// `old` is left untouched.
pub fn leaf_put<R: AsRef<[u8]>>(
    config: &StoreConfig,
    old: &Node<R>,
    key: &[u8],
    value: &[u8],
) -> Result<Node, StoreError> {
    check_limits(config, key, value)?;
    let mut new = Node::zeroed(config.page_size)?;
    match lookup_le(old, key)? {
        Some(i) if old.key(i)? == key => {
            update_leaf(&mut new, old, i, key, value)?;
            debug!(index = i, nkeys = new.key_count(), "node.leaf_update");
        }
        found => {
            let index = found.map_or(0, |i| i + 1);
            insert_into_leaf(&mut new, old, index, key, value)?;
            debug!(index, nkeys = new.key_count(), "node.leaf_insert");
        }
    }
    Ok(new)
}

// --- Helpers ---

fn expect_leaf<B: AsRef<[u8]>>(node: &Node<B>) -> Result<(), StoreError> {
    match node.node_type()? {
        NodeType::Leaf => Ok(()),
        found => Err(StoreError::UnexpectedNodeType {
            expected: NodeType::Leaf,
            found,
        }),
    }
}

fn check_limits(config: &StoreConfig, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
    if key.len() > config.max_key_size {
        return Err(StoreError::KeyTooLarge {
            len: key.len(),
            max: config.max_key_size,
        });
    }
    if value.len() > config.max_value_size {
        return Err(StoreError::ValueTooLarge {
            len: value.len(),
            max: config.max_value_size,
        });
    }
    Ok(())
}

fn check_range(field: &'static str, start: u16, n: u16, nkeys: u16) -> Result<(), StoreError> {
    let end = start as usize + n as usize;
    if end > nkeys as usize {
        return Err(StoreError::IndexOutOfBounds {
            field,
            index: end,
            limit: nkeys as usize,
        });
    }
    Ok(())
}

/// Payload bytes of `node`, i.e. the final cumulative offset.
fn payload_len<B: AsRef<[u8]>>(node: &Node<B>) -> Result<usize, StoreError> {
    Ok(node.offset(node.key_count())? as usize)
}

fn ensure_fits<B: AsRef<[u8]>>(node: &Node<B>, needed: usize) -> Result<(), StoreError> {
    if needed > node.capacity() {
        return Err(StoreError::CapacityExceeded {
            needed,
            capacity: node.capacity(),
        });
    }
    Ok(())
}

fn payload_offset(offset: usize, capacity: usize) -> Result<u16, StoreError> {
    u16::try_from(offset).map_err(|_| StoreError::CapacityExceeded {
        needed: offset,
        capacity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PAGE_SIZE;

    fn leaf(entries: &[(&str, &str)]) -> Node {
        let entries: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_bytes(), v.as_bytes()))
            .collect();
        new_leaf(&StoreConfig::default(), &entries).unwrap()
    }

    fn pairs<B: AsRef<[u8]>>(node: &Node<B>) -> Vec<(String, String)> {
        node.entries()
            .map(|e| {
                let (k, v) = e.unwrap();
                (
                    String::from_utf8(k.to_vec()).unwrap(),
                    String::from_utf8(v.to_vec()).unwrap(),
                )
            })
            .collect()
    }

    fn owned(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_append_kv_sets_offsets() {
        let mut node = Node::new_page();
        node.set_header(NodeType::Leaf, 2);
        append_kv(&mut node, 0, 0, b"k1", b"hi").unwrap();
        append_kv(&mut node, 1, 0, b"k3", b"hello").unwrap();

        assert_eq!(node.offset(0).unwrap(), 0);
        assert_eq!(node.offset(1).unwrap(), 8);
        assert_eq!(node.offset(2).unwrap(), 19);
        assert_eq!(node.kv_pos(0).unwrap(), payload_start(2));
        assert_eq!(node.used_bytes().unwrap(), payload_start(2) + 19);
        assert_eq!(node.key(1).unwrap(), b"k3");
        assert_eq!(node.value(1).unwrap(), b"hello");
    }

    #[test]
    fn test_append_kv_on_internal_node_keeps_pointers() {
        let mut node = Node::new_page();
        node.set_header(NodeType::Internal, 2);
        append_kv(&mut node, 0, 11, b"a", b"").unwrap();
        append_kv(&mut node, 1, 12, b"m", b"").unwrap();
        assert_eq!(node.pointer(0).unwrap(), 11);
        assert_eq!(node.pointer(1).unwrap(), 12);
        assert_eq!(node.value(1).unwrap(), b"");
        assert!(node.verify().is_ok());
    }

    #[test]
    fn test_append_kv_out_of_range() {
        let mut node = Node::new_page();
        node.set_header(NodeType::Leaf, 1);
        let err = append_kv(&mut node, 1, 0, b"k", b"v").unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_append_kv_capacity_exceeded() {
        let mut node = Node::zeroed(32).unwrap();
        node.set_header(NodeType::Leaf, 1);
        let err = append_kv(&mut node, 0, 0, b"key", &[7u8; 64]).unwrap_err();
        assert!(matches!(err, StoreError::CapacityExceeded { capacity: 32, .. }));
    }

    #[test]
    fn test_append_kv_overflow_leaves_buffer_untouched() {
        let mut node = Node::from_buf(vec![0xAA; 32]).unwrap();
        node.set_header(NodeType::Leaf, 1);
        let before = node.as_bytes().to_vec();

        let err = append_kv(&mut node, 0, 0xDEAD_BEEF, b"key", &[7u8; 64]).unwrap_err();

        assert!(matches!(err, StoreError::CapacityExceeded { needed: 87, capacity: 32 }));
        assert_eq!(node.as_bytes(), &before[..]);
    }

    #[test]
    fn test_append_range_overflow_leaves_buffer_untouched() {
        let long = "v".repeat(40);
        let old = leaf(&[("a", long.as_str()), ("b", long.as_str())]);
        let mut new = Node::from_buf(vec![0xAA; 64]).unwrap();
        new.set_header(NodeType::Leaf, 2);
        let before = new.as_bytes().to_vec();

        let err = append_range(&mut new, &old, 0, 0, 2).unwrap_err();

        assert!(matches!(err, StoreError::CapacityExceeded { capacity: 64, .. }));
        assert_eq!(new.as_bytes(), &before[..]);
    }

    #[test]
    fn test_append_range_copies_and_rebases() {
        let old = leaf(&[("a", "1"), ("bb", "22"), ("ccc", "333")]);
        let mut new = Node::new_page();
        new.set_header(NodeType::Leaf, 3);
        append_kv(&mut new, 0, 0, b"0", b"zero").unwrap();
        append_range(&mut new, &old, 1, 1, 2).unwrap();

        assert_eq!(pairs(&new), owned(&[("0", "zero"), ("bb", "22"), ("ccc", "333")]));
        assert!(new.verify().is_ok());
    }

    #[test]
    fn test_append_range_middle_slice() {
        let old = leaf(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]);
        let mut new = Node::new_page();
        new.set_header(NodeType::Leaf, 2);
        append_range(&mut new, &old, 0, 1, 2).unwrap();
        assert_eq!(pairs(&new), owned(&[("b", "2"), ("c", "3")]));
        assert_eq!(new.used_bytes().unwrap(), node_size(2, 2 * record_size(1, 1)));
    }

    #[test]
    fn test_append_range_zero_is_noop() {
        let old = leaf(&[("a", "1")]);
        let mut new = Node::new_page();
        new.set_header(NodeType::Leaf, 1);
        let before = new.clone();
        append_range(&mut new, &old, 0, 1, 0).unwrap();
        assert_eq!(new, before);
    }

    #[test]
    fn test_append_range_rejects_overlong_source() {
        let old = leaf(&[("a", "1"), ("b", "2")]);
        let mut new = Node::new_page();
        new.set_header(NodeType::Leaf, 3);
        let err = append_range(&mut new, &old, 0, 1, 2).unwrap_err();
        assert!(matches!(
            err,
            StoreError::IndexOutOfBounds { field: "source range", index: 3, limit: 2 }
        ));
    }

    #[test]
    fn test_insert_scenario_after_single_entry() {
        let old = leaf(&[("a", "1")]);
        let index = lookup_le(&old, b"b").unwrap().map_or(0, |i| i + 1);
        let mut new = Node::new_page();
        insert_into_leaf(&mut new, &old, index, b"b", b"2").unwrap();

        assert_eq!(new.key_count(), 2);
        assert_eq!(new.key(0).unwrap(), b"a");
        assert_eq!(new.key(1).unwrap(), b"b");
        assert_eq!(new.value(1).unwrap(), b"2");
    }

    #[test]
    fn test_insert_scenario_between_entries() {
        let old = leaf(&[("b", "2"), ("d", "4")]);
        let mut new = Node::new_page();
        insert_into_leaf(&mut new, &old, 1, b"c", b"3").unwrap();
        assert_eq!(pairs(&new), owned(&[("b", "2"), ("c", "3"), ("d", "4")]));
        assert!(new.verify().is_ok());
    }

    #[test]
    fn test_insert_at_front_and_back() {
        let old = leaf(&[("m", "13")]);
        let mut front = Node::new_page();
        insert_into_leaf(&mut front, &old, 0, b"a", b"1").unwrap();
        assert_eq!(pairs(&front), owned(&[("a", "1"), ("m", "13")]));

        let mut back = Node::new_page();
        insert_into_leaf(&mut back, &front, 2, b"z", b"26").unwrap();
        assert_eq!(pairs(&back), owned(&[("a", "1"), ("m", "13"), ("z", "26")]));
    }

    #[test]
    fn test_insert_into_empty_leaf() {
        let old = leaf(&[]);
        let mut new = Node::new_page();
        insert_into_leaf(&mut new, &old, 0, b"k", b"v").unwrap();
        assert_eq!(pairs(&new), owned(&[("k", "v")]));
        assert_eq!(new.used_bytes().unwrap(), node_size(1, record_size(1, 1)));
    }

    #[test]
    fn test_insert_leaves_old_node_untouched() {
        let old = leaf(&[("b", "2"), ("d", "4")]).freeze();
        let snapshot = old.as_bytes().to_vec();
        let mut new = Node::new_page();
        insert_into_leaf(&mut new, &old, 0, b"a", b"1").unwrap();
        assert_eq!(old.as_bytes(), &snapshot[..]);
    }

    #[test]
    fn test_insert_past_end_is_rejected() {
        let old = leaf(&[("a", "1")]);
        let mut new = Node::new_page();
        let err = insert_into_leaf(&mut new, &old, 2, b"b", b"2").unwrap_err();
        assert!(matches!(err, StoreError::IndexOutOfBounds { field: "insert", .. }));
    }

    #[test]
    fn test_insert_into_internal_is_rejected() {
        let mut old = Node::new_page();
        old.set_header(NodeType::Internal, 1);
        append_kv(&mut old, 0, 3, b"a", b"").unwrap();
        let mut new = Node::new_page();
        let err = insert_into_leaf(&mut new, &old, 1, b"b", b"").unwrap_err();
        assert!(matches!(err, StoreError::UnexpectedNodeType { found: NodeType::Internal, .. }));
    }

    #[test]
    fn test_insert_checks_capacity_before_writing() {
        let big = "x".repeat(2000);
        let old = leaf(&[("a", big.as_str())]);
        let mut new = Node::new_page();
        let err = insert_into_leaf(&mut new, &old, 1, b"b", &[1u8; 2100]).unwrap_err();
        assert!(matches!(err, StoreError::CapacityExceeded { capacity: PAGE_SIZE, .. }));
        assert!(new.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_update_replaces_value() {
        let old = leaf(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let mut new = Node::new_page();
        update_leaf(&mut new, &old, 1, b"b", b"twenty-two").unwrap();
        assert_eq!(pairs(&new), owned(&[("a", "1"), ("b", "twenty-two"), ("c", "3")]));
        assert!(new.verify().is_ok());

        let mut last = Node::new_page();
        update_leaf(&mut last, &new, 2, b"c", b"").unwrap();
        assert_eq!(pairs(&last), owned(&[("a", "1"), ("b", "twenty-two"), ("c", "")]));
    }

    #[test]
    fn test_update_rejects_a_different_key() {
        let old = leaf(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let mut new = Node::new_page();

        let err = update_leaf(&mut new, &old, 1, b"x", b"v").unwrap_err();

        assert!(matches!(err, StoreError::KeyMismatch(1)));
        assert!(err.is_invariant_violation());
        assert!(new.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_leaf_put_inserts_and_updates() {
        let config = StoreConfig::default();
        let empty = leaf(&[]);
        let one = leaf_put(&config, &empty, b"m", b"1").unwrap();
        let two = leaf_put(&config, &one, b"a", b"2").unwrap();
        let three = leaf_put(&config, &two, b"z", b"3").unwrap();
        let updated = leaf_put(&config, &three, b"m", b"4").unwrap();

        assert_eq!(pairs(&three), owned(&[("a", "2"), ("m", "1"), ("z", "3")]));
        assert_eq!(pairs(&updated), owned(&[("a", "2"), ("m", "4"), ("z", "3")]));
        assert_eq!(pairs(&one), owned(&[("m", "1")]));
    }

    #[test]
    fn test_leaf_put_enforces_limits() {
        let config = StoreConfig::default();
        let empty = leaf(&[]);
        let big_key = vec![b'k'; config.max_key_size + 1];
        assert!(matches!(
            leaf_put(&config, &empty, &big_key, b"v"),
            Err(StoreError::KeyTooLarge { len: 1001, max: 1000 })
        ));
        let big_value = vec![b'v'; config.max_value_size + 1];
        assert!(matches!(
            leaf_put(&config, &empty, b"k", &big_value),
            Err(StoreError::ValueTooLarge { len: 3001, max: 3000 })
        ));
    }

    #[test]
    fn test_leaf_put_fills_page_then_reports_capacity() {
        let config = StoreConfig::default();
        let mut node = leaf(&[]);
        let value = [0u8; 100];
        let mut inserted = 0u32;
        loop {
            let key = format!("key{:05}", inserted);
            match leaf_put(&config, &node, key.as_bytes(), &value) {
                Ok(next) => {
                    node = next;
                    inserted += 1;
                }
                Err(StoreError::CapacityExceeded { needed, capacity }) => {
                    assert!(needed > capacity);
                    break;
                }
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        // each entry: 8 pointer + 2 offset + 4 header + 8 key + 100 value
        assert_eq!(inserted, ((PAGE_SIZE - 6) / 122) as u32);
        assert!(node.used_bytes().unwrap() <= PAGE_SIZE);
        assert!(node.verify().is_ok());
    }

    #[test]
    fn test_new_leaf_rejects_unsorted_input() {
        let entries: Vec<(&[u8], &[u8])> = vec![(b"b", b"1"), (b"a", b"2")];
        assert!(matches!(
            new_leaf(&StoreConfig::default(), &entries),
            Err(StoreError::UnsortedKeys(1))
        ));
        let dupes: Vec<(&[u8], &[u8])> = vec![(b"a", b"1"), (b"a", b"2")];
        assert!(new_leaf(&StoreConfig::default(), &dupes).is_err());
    }
}
