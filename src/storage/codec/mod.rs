mod common;
mod index_page;
mod table_page;

pub use common::CommonCodec;
pub use index_page::{IndexPage, IndexPageCodec, InternalNodeCodec, LeafNodeCodec};
pub use table_page::{HeapHeaderPageCodec, TablePageCodec};

/// Decoded value plus the number of bytes consumed.
pub type DecodedData<T> = (T, usize);
