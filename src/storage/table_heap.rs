use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use log::warn;

use crate::buffer::{BufferPoolManager, FileId, PageId, INVALID_PAGE_ID};
use crate::error::ArborResult;
use crate::storage::codec::{HeapHeaderPageCodec, TablePageCodec};
use crate::storage::page::{HeapHeaderPage, RecordId, TablePage};

/// Page 1 of a heap file holds the chain header; data pages follow.
pub const HEAP_HEADER_PAGE_ID: PageId = 1;

/// A heap-file relation: an append-only chain of slotted pages holding
/// opaque record bytes. The index build scans it sequentially.
#[derive(Debug)]
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    file: FileId,
    path: PathBuf,
    first_page_id: PageId,
    last_page_id: PageId,
}

impl TableHeap {
    /// Create the heap file with one empty data page.
    pub fn create(buffer_pool: Arc<BufferPoolManager>, path: impl AsRef<Path>) -> ArborResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = buffer_pool.create_file(&path)?;

        let header_page_id = buffer_pool.alloc_page(file)?;
        debug_assert_eq!(header_page_id, HEAP_HEADER_PAGE_ID);
        let first_page_id = match buffer_pool.alloc_page(file) {
            Ok(id) => id,
            Err(e) => {
                let _ = buffer_pool.unpin_page(file, header_page_id, false);
                return Err(e);
            }
        };

        let heap = Self {
            buffer_pool,
            file,
            path,
            first_page_id,
            last_page_id: first_page_id,
        };
        heap.write_and_unpin(first_page_id, &TablePageCodec::encode(&TablePage::new()))?;
        heap.write_and_unpin(
            header_page_id,
            &HeapHeaderPageCodec::encode(&HeapHeaderPage {
                first_page_id,
                last_page_id: first_page_id,
            }),
        )?;
        Ok(heap)
    }

    /// Open an existing heap file and read the chain bounds.
    pub fn open(buffer_pool: Arc<BufferPoolManager>, path: impl AsRef<Path>) -> ArborResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = buffer_pool.open_file(&path)?;
        let bytes = buffer_pool.read_page(file, HEAP_HEADER_PAGE_ID)?;
        let decoded = HeapHeaderPageCodec::decode(&bytes);
        buffer_pool.unpin_page(file, HEAP_HEADER_PAGE_ID, false)?;
        let (header, _) = decoded?;
        Ok(Self {
            buffer_pool,
            file,
            path,
            first_page_id: header.first_page_id,
            last_page_id: header.last_page_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record to the last page, growing the chain when it is full.
    pub fn insert_record(&mut self, record: &[u8]) -> ArborResult<RecordId> {
        let last_page_id = self.last_page_id;
        let bytes = self.buffer_pool.read_page(self.file, last_page_id)?;
        let mut page = match TablePageCodec::decode(&bytes) {
            Ok((page, _)) => page,
            Err(e) => {
                let _ = self.buffer_pool.unpin_page(self.file, last_page_id, false);
                return Err(e);
            }
        };

        match page.insert_record(record) {
            Ok(slot_num) => {
                self.write_and_unpin(last_page_id, &TablePageCodec::encode(&page))?;
                return Ok(RecordId::new(last_page_id, slot_num as u32));
            }
            Err(_) if page.num_records() > 0 => {
                // Page full: fall through and start a new one.
            }
            Err(e) => {
                // Even an empty page cannot hold this record.
                let _ = self.buffer_pool.unpin_page(self.file, last_page_id, false);
                return Err(e);
            }
        }

        let new_page_id = match self.buffer_pool.alloc_page(self.file) {
            Ok(id) => id,
            Err(e) => {
                let _ = self.buffer_pool.unpin_page(self.file, last_page_id, false);
                return Err(e);
            }
        };
        let mut new_page = TablePage::new();
        let slot_num = match new_page.insert_record(record) {
            Ok(slot) => slot,
            Err(e) => {
                let _ = self.buffer_pool.unpin_page(self.file, new_page_id, false);
                let _ = self.buffer_pool.unpin_page(self.file, last_page_id, false);
                return Err(e);
            }
        };
        self.write_and_unpin(new_page_id, &TablePageCodec::encode(&new_page))?;

        page.header.next_page_id = new_page_id;
        self.write_and_unpin(last_page_id, &TablePageCodec::encode(&page))?;

        self.last_page_id = new_page_id;
        self.write_header()?;
        Ok(RecordId::new(new_page_id, slot_num as u32))
    }

    fn write_header(&self) -> ArborResult<()> {
        // Pin the header frame before overwriting it.
        self.buffer_pool.read_page(self.file, HEAP_HEADER_PAGE_ID)?;
        self.write_and_unpin(
            HEAP_HEADER_PAGE_ID,
            &HeapHeaderPageCodec::encode(&HeapHeaderPage {
                first_page_id: self.first_page_id,
                last_page_id: self.last_page_id,
            }),
        )
    }

    fn write_and_unpin(&self, page_id: PageId, bytes: &[u8]) -> ArborResult<()> {
        let write = self.buffer_pool.write_page(self.file, page_id, bytes);
        let unpin = self
            .buffer_pool
            .unpin_page(self.file, page_id, write.is_ok());
        write.and(unpin)
    }

    /// Sequential scan over every record in chain order.
    pub fn iter(&self) -> TableIterator<'_> {
        TableIterator {
            heap: self,
            next_page_id: self.first_page_id,
            page: None,
            page_id: INVALID_PAGE_ID,
            next_slot: 0,
        }
    }
}

impl Drop for TableHeap {
    fn drop(&mut self) {
        if let Err(e) = self.buffer_pool.close_file(self.file) {
            warn!("failed to close heap file {}: {}", self.path.display(), e);
        }
    }
}

/// Cursor over a heap file. Pages are snapshotted on entry, so no pin is
/// held between `next` calls.
#[derive(Debug)]
pub struct TableIterator<'a> {
    heap: &'a TableHeap,
    next_page_id: PageId,
    page: Option<TablePage>,
    page_id: PageId,
    next_slot: u32,
}

impl TableIterator<'_> {
    pub fn next(&mut self) -> ArborResult<Option<(RecordId, Bytes)>> {
        loop {
            if let Some(page) = &self.page {
                if self.next_slot < page.num_records() as u32 {
                    let rid = RecordId::new(self.page_id, self.next_slot);
                    let record = page.record(self.next_slot)?;
                    self.next_slot += 1;
                    return Ok(Some((rid, record)));
                }
                self.next_page_id = page.header.next_page_id;
                self.page = None;
            }

            if self.next_page_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let page_id = self.next_page_id;
            let pool = &self.heap.buffer_pool;
            let bytes = pool.read_page(self.heap.file, page_id)?;
            let decoded = TablePageCodec::decode(&bytes);
            pool.unpin_page(self.heap.file, page_id, false)?;
            let (page, _) = decoded?;
            self.page = Some(page);
            self.page_id = page_id;
            self.next_slot = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferPoolConfig;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<BufferPoolManager>) {
        let dir = TempDir::new().unwrap();
        let pool = Arc::new(BufferPoolManager::new(BufferPoolConfig {
            buffer_pool_size: 16,
            ..Default::default()
        }));
        (dir, pool)
    }

    #[test]
    fn insert_and_scan_in_order() {
        let (dir, pool) = setup();
        let mut heap = TableHeap::create(pool.clone(), dir.path().join("tbl")).unwrap();
        let mut rids = Vec::new();
        for i in 0..10u8 {
            rids.push(heap.insert_record(&[i; 16]).unwrap());
        }

        let mut iter = heap.iter();
        for (i, expected_rid) in rids.iter().enumerate() {
            let (rid, record) = iter.next().unwrap().unwrap();
            assert_eq!(rid, *expected_rid);
            assert_eq!(record.as_ref(), &[i as u8; 16]);
        }
        assert!(iter.next().unwrap().is_none());
        assert_eq!(pool.pinned_page_count(heap.file), 0);
    }

    #[test]
    fn records_spill_across_pages() {
        let (dir, pool) = setup();
        let mut heap = TableHeap::create(pool.clone(), dir.path().join("tbl")).unwrap();
        let record = vec![9u8; 1500];
        let mut rids = Vec::new();
        for _ in 0..8 {
            rids.push(heap.insert_record(&record).unwrap());
        }
        let pages: std::collections::HashSet<_> = rids.iter().map(|r| r.page_id).collect();
        assert!(pages.len() > 1);

        let mut iter = heap.iter();
        let mut count = 0;
        while let Some((_, rec)) = iter.next().unwrap() {
            assert_eq!(rec.len(), 1500);
            count += 1;
        }
        assert_eq!(count, 8);
    }

    #[test]
    fn reopen_resumes_the_chain() {
        let (dir, pool) = setup();
        let path = dir.path().join("tbl");
        {
            let mut heap = TableHeap::create(pool.clone(), &path).unwrap();
            heap.insert_record(b"before close").unwrap();
        }
        let mut heap = TableHeap::open(pool.clone(), &path).unwrap();
        heap.insert_record(b"after reopen").unwrap();

        let mut iter = heap.iter();
        assert_eq!(iter.next().unwrap().unwrap().1.as_ref(), b"before close");
        assert_eq!(iter.next().unwrap().unwrap().1.as_ref(), b"after reopen");
        assert!(iter.next().unwrap().is_none());
    }
}
