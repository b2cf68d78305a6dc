use crate::buffer::BUFFER_POOL_SIZE;
use crate::storage::page::{INTERNAL_NODE_MAX_SIZE, LEAF_NODE_MAX_SIZE};

#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub buffer_pool_size: usize,
    pub lru_k_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            buffer_pool_size: BUFFER_POOL_SIZE,
            lru_k_k: 2,
        }
    }
}

/// Node capacities for a freshly created index. Existing nodes carry their
/// capacity in the page header, so these only apply to new nodes.
#[derive(Debug, Clone, Copy)]
pub struct BTreeConfig {
    pub leaf_max_size: u32,
    pub internal_max_size: u32,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        BTreeConfig {
            leaf_max_size: LEAF_NODE_MAX_SIZE as u32,
            internal_max_size: INTERNAL_NODE_MAX_SIZE as u32,
        }
    }
}
