use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::buffer::{PageId, PAGE_SIZE};
use crate::error::{ArborError, ArborResult};

/// Paged I/O on a single file. Page ids start at 1; the zero page is never
/// allocated so id 0 can serve as a sentinel everywhere above this layer.
#[derive(Debug)]
pub struct DiskManager {
    file: File,
    path: PathBuf,
    num_pages: u32,
}

impl DiskManager {
    /// Create the file exclusively. Fails with `FileExists` when the path
    /// is already present.
    pub fn create(path: &Path) -> ArborResult<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    ArborError::FileExists(path.display().to_string())
                } else {
                    ArborError::Io(e)
                }
            })?;
        Ok(DiskManager {
            file,
            path: path.to_path_buf(),
            num_pages: 1,
        })
    }

    /// Open an existing file.
    pub fn open(path: &Path) -> ArborResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_size = file.metadata()?.len();
        if file_size % PAGE_SIZE as u64 != 0 {
            return Err(ArborError::Storage(format!(
                "file {} size {} is not page aligned",
                path.display(),
                file_size
            )));
        }
        let num_pages = (file_size / PAGE_SIZE as u64).max(1) as u32;
        Ok(DiskManager {
            file,
            path: path.to_path_buf(),
            num_pages,
        })
    }

    pub fn read_page(&mut self, page_id: PageId) -> ArborResult<[u8; PAGE_SIZE]> {
        if page_id == 0 || page_id >= self.num_pages {
            return Err(ArborError::Storage(format!(
                "read of unallocated page {} in {}",
                page_id,
                self.path.display()
            )));
        }
        let mut data = [0u8; PAGE_SIZE];
        self.file
            .seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        match self.file.read_exact(&mut data) {
            Ok(()) => Ok(data),
            // A page allocated but never written back reads as zeros.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(data),
            Err(e) => Err(ArborError::Io(e)),
        }
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> ArborResult<()> {
        if page_id == 0 {
            return Err(ArborError::Storage(
                "write to reserved page 0".to_string(),
            ));
        }
        self.file
            .seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(data)?;
        self.num_pages = self.num_pages.max(page_id + 1);
        Ok(())
    }

    /// Hand out the next page id. No disk I/O happens until the page is
    /// first written back.
    pub fn allocate_page(&mut self) -> PageId {
        let page_id = self.num_pages;
        self.num_pages += 1;
        page_id
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
