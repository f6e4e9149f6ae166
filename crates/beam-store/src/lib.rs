pub mod btree;
pub mod file_io;
pub mod page;


pub use btree::lookup::lookup_le;
pub use btree::mutate::{append_kv, append_range, insert_into_leaf, leaf_put, new_leaf, update_leaf};
pub use btree::node::Node;
pub use file_io::save_data;
pub use page::NodeType;

use beam_common::BeamError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] BeamError),
    #[error("Index out of bounds: {field}[{index}] (limit {limit})")]
    IndexOutOfBounds {
        field: &'static str,
        index: usize,
        limit: usize,
    },
    #[error("Unknown node type tag: {0}")]
    UnknownNodeType(u16),
    #[error("Expected a {expected:?} node, found {found:?}")]
    UnexpectedNodeType { expected: NodeType, found: NodeType },
    #[error("Corrupt node: {0}")]
    CorruptNode(String),
    #[error("Keys out of order at index {0}")]
    UnsortedKeys(usize),
    #[error("Key at index {0} differs from the key being updated")]
    KeyMismatch(u16),
    #[error("Capacity exceeded: need {needed} bytes, buffer holds {capacity}")]
    CapacityExceeded { needed: usize, capacity: usize },
    #[error("Key too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },
    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },
}

impl StoreError {
    /// Misuse of the node format or a corrupt page, as opposed to content
    /// that simply does not fit or a failing disk.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Config(BeamError::Config(_))
                | StoreError::IndexOutOfBounds { .. }
                | StoreError::UnknownNodeType(_)
                | StoreError::UnexpectedNodeType { .. }
                | StoreError::CorruptNode(_)
                | StoreError::UnsortedKeys(_)
                | StoreError::KeyMismatch(_)
        )
    }
}
