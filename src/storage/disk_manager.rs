//! Disk Manager - low-level file I/O for database pages.
//!
//! The [`DiskManager`] handles all direct file operations:
//! - Reading and writing pages
//! - Appending new pages
//! - Truncating the file after a crash

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, PageId, Result};
use crate::storage::page::PageData;

/// Manages disk I/O for a single database file.
///
/// # File Layout
/// The database is stored as a single file with pages laid out sequentially:
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Page 1  │ Page 2  │ Page 3  │  ...    │ Page N  │
/// │ (8KB)   │ (8KB)   │ (8KB)   │         │ (8KB)   │
/// └─────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0      8192    16384    ...   (N-1)×8192
/// ```
///
/// # Thread Safety
/// `DiskManager` is **single-threaded**. The `PageCache` is responsible
/// for serializing access to the disk manager.
pub struct DiskManager {
    file: File,
    /// Number of pages in the file.
    page_count: u32,
}

impl DiskManager {
    /// Create a new database file.
    ///
    /// # Errors
    /// Returns `Error::FileExists` if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => Error::FileExists(path.to_path_buf()),
                _ => Error::Io(e),
            })?;

        Ok(Self {
            file,
            page_count: 0,
        })
    }

    /// Open an existing database file.
    ///
    /// # Errors
    /// Returns `Error::FileNotExists` if the file doesn't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::FileNotExists(path.to_path_buf()),
                _ => Error::Io(e),
            })?;

        // Calculate page count from file size
        let file_size = file.metadata()?.len();
        let page_count = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self { file, page_count })
    }

    /// Read a page from disk.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page doesn't exist.
    pub fn read_page(&mut self, page_id: PageId) -> Result<PageData> {
        self.check_exists(page_id)?;

        self.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        let mut page = PageData::new();
        self.file.read_exact(page.as_mut_slice())?;

        Ok(page)
    }

    /// Write a page to disk and sync it.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page hasn't been allocated.
    pub fn write_page(&mut self, page_id: PageId, page: &PageData) -> Result<()> {
        self.check_exists(page_id)?;

        self.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        self.file.write_all(page.as_slice())?;
        self.file.sync_data()?;

        Ok(())
    }

    /// Append a page holding `init` and sync it.
    ///
    /// Returns the `PageId` of the new page.
    pub fn allocate_page(&mut self, init: &PageData) -> Result<PageId> {
        let page_id = PageId::new(self.page_count + 1);

        self.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        self.file.write_all(init.as_slice())?;
        self.file.sync_data()?;

        self.page_count += 1;
        Ok(page_id)
    }

    /// Shrink (or zero-extend) the file to exactly `page_count` pages.
    pub fn truncate(&mut self, page_count: u32) -> Result<()> {
        self.file.set_len(page_count as u64 * PAGE_SIZE as u64)?;
        self.file.sync_all()?;
        self.page_count = page_count;
        Ok(())
    }

    /// Sync file contents and metadata.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Get the number of pages in the database.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Get the total size of the database file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        (self.page_count as u64) * (PAGE_SIZE as u64)
    }

    fn check_exists(&self, page_id: PageId) -> Result<()> {
        if !page_id.is_valid() || page_id.0 > self.page_count {
            return Err(Error::PageNotFound(page_id.0));
        }
        Ok(())
    }
}
