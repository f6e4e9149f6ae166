use crate::BeamError;
use serde::{Deserialize, Serialize};

/// Size of one node page on disk (one OS page).
pub const PAGE_SIZE: usize = 4096;
pub const MAX_KEY_SIZE: usize = 1000;
pub const MAX_VALUE_SIZE: usize = 3000;

/// `type (2B) | nkeys (2B)`
pub const HEADER_SIZE: usize = 4;
pub const POINTER_SIZE: usize = 8;
pub const OFFSET_SIZE: usize = 2;
/// `keyLen (2B) | valLen (2B)` in front of every record.
pub const KV_HEADER_SIZE: usize = 4;

/// Bytes taken by a node holding a single entry of the given sizes.
pub const fn single_entry_node_size(key_len: usize, value_len: usize) -> usize {
    HEADER_SIZE + POINTER_SIZE + 2 * OFFSET_SIZE + KV_HEADER_SIZE + key_len + value_len
}

const _: () = {
    assert!(PAGE_SIZE <= (1 << 16), "page size must fit the 16-bit offset field");
    assert!(
        single_entry_node_size(MAX_KEY_SIZE, MAX_VALUE_SIZE) <= PAGE_SIZE,
        "a maximum-size entry must fit in one page"
    );
};

/// Page geometry and entry limits.
/// The built-in defaults are checked at compile time; anything loaded at
/// runtime goes through [`StoreConfig::validate`] before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub page_size: usize,
    pub max_key_size: usize,
    pub max_value_size: usize,
}

impl StoreConfig {
    /// Worst-case size of a node carrying one entry at the configured limits.
    pub fn max_node_size(&self) -> usize {
        single_entry_node_size(self.max_key_size, self.max_value_size)
    }

    pub fn validate(&self) -> Result<(), BeamError> {
        if self.page_size > (1 << 16) {
            return Err(BeamError::Config(format!(
                "page size {} does not fit the 16-bit offset field",
                self.page_size
            )));
        }
        if self.max_key_size == 0 {
            return Err(BeamError::Config("max key size must be non-zero".into()));
        }
        if self.max_key_size > u16::MAX as usize || self.max_value_size > u16::MAX as usize {
            return Err(BeamError::Config(
                "key and value limits must fit the 16-bit length prefix".into(),
            ));
        }
        let node_max = self.max_node_size();
        if node_max > self.page_size {
            return Err(BeamError::Config(format!(
                "node size {} exceeds page size {}",
                node_max, self.page_size
            )));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            max_key_size: MAX_KEY_SIZE,
            max_value_size: MAX_VALUE_SIZE,
        }
    }
}
