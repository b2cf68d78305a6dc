//! BufferPoolManager: a fixed pool of page frames shared by every open
//! paged file, with pin-count reference tracking and LRU-K replacement.
//!
//! Callers address pages as `(FileId, PageId)`. Every `alloc_page` or
//! `read_page` takes one pin that must be released with `unpin_page`;
//! a page is only evictable while its pin count is zero.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use bytes::Bytes;
use log::debug;
use parking_lot::Mutex;

use crate::buffer::{FrameId, PageId, PAGE_SIZE};
use crate::config::BufferPoolConfig;
use crate::error::{ArborError, ArborResult};
use crate::storage::disk_manager::DiskManager;
use crate::utils::cache::lru_k::LruKReplacer;
use crate::utils::cache::Replacer;

pub type FileId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PageKey {
    file: FileId,
    page_id: PageId,
}

#[derive(Debug)]
struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    key: Option<PageKey>,
    pin_count: u32,
    is_dirty: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Box::new([0; PAGE_SIZE]),
            key: None,
            pin_count: 0,
            is_dirty: false,
        }
    }

    fn reset(&mut self) {
        self.data.fill(0);
        self.key = None;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

#[derive(Debug)]
struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<PageKey, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
    files: HashMap<FileId, DiskManager>,
    next_file_id: FileId,
}

#[derive(Debug)]
pub struct BufferPoolManager {
    state: Mutex<PoolState>,
}

impl BufferPoolManager {
    pub fn new(config: BufferPoolConfig) -> Self {
        let pool_size = config.buffer_pool_size;
        assert!(pool_size > 0, "buffer pool must hold at least one frame");
        let frames = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list = (0..pool_size).collect();
        Self {
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::new(),
                free_list,
                replacer: LruKReplacer::with_k(pool_size, config.lru_k_k),
                files: HashMap::new(),
                next_file_id: 0,
            }),
        }
    }

    /// Create a paged file and register it with the pool. Fails with
    /// `FileExists` when the path is already present on disk.
    pub fn create_file(&self, path: impl AsRef<Path>) -> ArborResult<FileId> {
        let disk_manager = DiskManager::create(path.as_ref())?;
        Ok(self.state.lock().register(disk_manager))
    }

    /// Open an existing paged file and register it with the pool.
    pub fn open_file(&self, path: impl AsRef<Path>) -> ArborResult<FileId> {
        let disk_manager = DiskManager::open(path.as_ref())?;
        Ok(self.state.lock().register(disk_manager))
    }

    /// Flush the file's dirty pages, drop its frames, and release the
    /// underlying file handle.
    pub fn close_file(&self, file: FileId) -> ArborResult<()> {
        let mut state = self.state.lock();
        state.purge_file(file)?;
        state
            .files
            .remove(&file)
            .ok_or_else(|| ArborError::Internal(format!("file {} is not open", file)))?;
        Ok(())
    }

    /// Allocate a fresh page (ids start at 1) and pin it. The frame is
    /// zeroed and starts out dirty.
    pub fn alloc_page(&self, file: FileId) -> ArborResult<PageId> {
        let mut state = self.state.lock();
        let frame_id = state.acquire_frame()?;
        let page_id = match state.disk_manager(file) {
            Ok(dm) => dm.allocate_page(),
            Err(e) => {
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        };
        let key = PageKey { file, page_id };
        let frame = &mut state.frames[frame_id];
        frame.data.fill(0);
        frame.key = Some(key);
        frame.pin_count = 1;
        frame.is_dirty = true;
        state.page_table.insert(key, frame_id);
        state.replacer.record_access(frame_id)?;
        state.replacer.set_evictable(frame_id, false)?;
        debug!("allocated page {} of file {} in frame {}", page_id, file, frame_id);
        Ok(page_id)
    }

    /// Pin a page and return a snapshot of its contents. The pin keeps the
    /// frame resident until the matching `unpin_page`.
    pub fn read_page(&self, file: FileId, page_id: PageId) -> ArborResult<Bytes> {
        let mut state = self.state.lock();
        let key = PageKey { file, page_id };
        if let Some(&frame_id) = state.page_table.get(&key) {
            let frame = &mut state.frames[frame_id];
            frame.pin_count += 1;
            let data = Bytes::copy_from_slice(frame.data.as_ref());
            state.replacer.record_access(frame_id)?;
            state.replacer.set_evictable(frame_id, false)?;
            return Ok(data);
        }

        let frame_id = state.acquire_frame()?;
        let page_data = match state
            .disk_manager(file)
            .and_then(|dm| dm.read_page(page_id))
        {
            Ok(data) => data,
            Err(e) => {
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        };
        let frame = &mut state.frames[frame_id];
        frame.data.copy_from_slice(&page_data);
        frame.key = Some(key);
        frame.pin_count = 1;
        frame.is_dirty = false;
        let data = Bytes::copy_from_slice(frame.data.as_ref());
        state.page_table.insert(key, frame_id);
        state.replacer.record_access(frame_id)?;
        state.replacer.set_evictable(frame_id, false)?;
        Ok(data)
    }

    /// Overwrite a resident, pinned page and mark its frame dirty.
    pub fn write_page(&self, file: FileId, page_id: PageId, data: &[u8]) -> ArborResult<()> {
        if data.len() != PAGE_SIZE {
            return Err(ArborError::Internal(format!(
                "page write of {} bytes, expected {}",
                data.len(),
                PAGE_SIZE
            )));
        }
        let mut state = self.state.lock();
        let key = PageKey { file, page_id };
        let frame_id = *state.page_table.get(&key).ok_or_else(|| {
            ArborError::Internal(format!("write to non-resident page {} of file {}", page_id, file))
        })?;
        let frame = &mut state.frames[frame_id];
        if frame.pin_count == 0 {
            return Err(ArborError::PageNotPinned(page_id));
        }
        frame.data.copy_from_slice(data);
        frame.is_dirty = true;
        Ok(())
    }

    /// Release one pin; `dirty` ORs into the frame's dirty flag. Signals
    /// `PageNotPinned` when the page holds no pin.
    pub fn unpin_page(&self, file: FileId, page_id: PageId, dirty: bool) -> ArborResult<()> {
        let mut state = self.state.lock();
        let key = PageKey { file, page_id };
        let Some(&frame_id) = state.page_table.get(&key) else {
            return Err(ArborError::PageNotPinned(page_id));
        };
        let frame = &mut state.frames[frame_id];
        if frame.pin_count == 0 {
            return Err(ArborError::PageNotPinned(page_id));
        }
        frame.pin_count -= 1;
        if dirty {
            frame.is_dirty = true;
        }
        if frame.pin_count == 0 {
            state.replacer.set_evictable(frame_id, true)?;
        }
        Ok(())
    }

    /// Write back the file's dirty pages and release its frames. The file
    /// stays registered and can keep serving page requests.
    pub fn flush_file(&self, file: FileId) -> ArborResult<()> {
        self.state.lock().purge_file(file)
    }

    /// Number of pages of `file` currently holding at least one pin.
    pub fn pinned_page_count(&self, file: FileId) -> usize {
        let state = self.state.lock();
        state
            .frames
            .iter()
            .filter(|f| f.pin_count > 0 && f.key.is_some_and(|k| k.file == file))
            .count()
    }
}

impl PoolState {
    fn register(&mut self, disk_manager: DiskManager) -> FileId {
        let file = self.next_file_id;
        self.next_file_id += 1;
        self.files.insert(file, disk_manager);
        file
    }

    fn disk_manager(&mut self, file: FileId) -> ArborResult<&mut DiskManager> {
        self.files
            .get_mut(&file)
            .ok_or_else(|| ArborError::Internal(format!("file {} is not open", file)))
    }

    /// Take a frame from the free list, or evict a victim (writing it back
    /// if dirty).
    fn acquire_frame(&mut self) -> ArborResult<FrameId> {
        if let Some(frame_id) = self.free_list.pop_front() {
            return Ok(frame_id);
        }
        let frame_id = self.replacer.evict().ok_or_else(|| {
            ArborError::Storage("buffer pool is full and no page is evictable".to_string())
        })?;
        let key = self.frames[frame_id].key;
        if let Some(key) = key {
            debug_assert_eq!(self.frames[frame_id].pin_count, 0);
            if self.frames[frame_id].is_dirty {
                debug!("evicting dirty page {} of file {}", key.page_id, key.file);
                if let Err(e) = self.write_back(frame_id, key) {
                    // Put the victim back under replacement so the frame is
                    // not stranded outside both the free list and the
                    // replacer.
                    let _ = self.replacer.record_access(frame_id);
                    let _ = self.replacer.set_evictable(frame_id, true);
                    return Err(e);
                }
            }
            self.page_table.remove(&key);
        }
        self.frames[frame_id].reset();
        Ok(frame_id)
    }

    fn write_back(&mut self, frame_id: FrameId, key: PageKey) -> ArborResult<()> {
        let dm = self
            .files
            .get_mut(&key.file)
            .ok_or_else(|| ArborError::Internal(format!("file {} is not open", key.file)))?;
        dm.write_page(key.page_id, self.frames[frame_id].data.as_ref())?;
        self.frames[frame_id].is_dirty = false;
        Ok(())
    }

    fn purge_file(&mut self, file: FileId) -> ArborResult<()> {
        let keys: Vec<(PageKey, FrameId)> = self
            .page_table
            .iter()
            .filter(|(k, _)| k.file == file)
            .map(|(&k, &f)| (k, f))
            .collect();
        for (key, frame_id) in &keys {
            if self.frames[*frame_id].pin_count > 0 {
                return Err(ArborError::PagePinned(key.page_id));
            }
        }
        for (key, frame_id) in keys {
            if self.frames[frame_id].is_dirty {
                self.write_back(frame_id, key)?;
            }
            self.page_table.remove(&key);
            self.replacer.remove(frame_id);
            self.frames[frame_id].reset();
            self.free_list.push_back(frame_id);
        }
        Ok(())
    }
}

impl Default for BufferPoolManager {
    fn default() -> Self {
        Self::new(BufferPoolConfig::default())
    }
}
