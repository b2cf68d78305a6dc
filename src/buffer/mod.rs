mod buffer_pool;

pub use buffer_pool::{BufferPoolManager, FileId};

pub type PageId = u32;
pub type FrameId = usize;

pub const PAGE_SIZE: usize = 4096;
/// Page 0 is never allocated; it doubles as the "no sibling" marker on
/// leaf right-links and the empty-child sentinel.
pub const INVALID_PAGE_ID: PageId = 0;
pub const BUFFER_POOL_SIZE: usize = 1000;
