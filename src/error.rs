use thiserror::Error;

use crate::buffer::PageId;

pub type ArborResult<T, E = ArborError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum ArborError {
    #[error("Not support: {0}")]
    NotSupport(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("file already exists: {0}")]
    FileExists(String),

    #[error("existing index metadata does not match: {0}")]
    BadIndexInfo(String),

    #[error("scan comparators must be GT/GTE for the low bound and LT/LTE for the high bound")]
    BadOpcodes,

    #[error("scan range low value exceeds high value")]
    BadScanrange,

    #[error("scan has not been initialized")]
    ScanNotInitialized,

    #[error("index scan completed")]
    IndexScanCompleted,

    #[error("no such key found")]
    NoSuchKeyFound,

    #[error("page {0} is not pinned")]
    PageNotPinned(PageId),

    #[error("page {0} is still pinned")]
    PagePinned(PageId),
}
