use crate::btree::node::Node;
use crate::StoreError;
use std::cmp::Ordering;

/// Finds the last key that is less than or equal to `key`.
///
/// Returns `None` when `key` sorts before every stored key (or the node is
/// empty). For a leaf the new entry then goes to index 0; otherwise it goes
/// right after the returned index, unless that key is equal and the entry is
/// replaced. For an internal node the index names the child to descend into.
pub fn lookup_le<B: AsRef<[u8]>>(node: &Node<B>, key: &[u8]) -> Result<Option<u16>, StoreError> {
    // keys[..lo] <= key < keys[hi..]
    let mut lo = 0u16;
    let mut hi = node.key_count();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match node.key(mid)?.cmp(key) {
            Ordering::Equal => return Ok(Some(mid)),
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
        }
    }
    Ok(lo.checked_sub(1))
}
