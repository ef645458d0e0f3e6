//! Page Cache - the page caching layer over the database file.
//!
//! The [`PageCache`] provides:
//! - Reference-counted page caching between disk and memory
//! - Write-back of dirty pages on eviction
//! - Page allocation that persists the new page immediately
//! - Forced flush and truncation for page 1 and recovery

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::buffer::cache::{CacheSource, RefCountCache};
use crate::buffer::{CacheStats, Page};
use crate::common::config::MIN_CACHE_PAGES;
use crate::common::{Error, PageId, Result};
use crate::storage::page::PageData;
use crate::storage::DiskManager;

/// Loads pages from the database file and writes dirty ones back.
struct PageStore {
    disk: Mutex<DiskManager>,
}

impl PageStore {
    fn flush(&self, page: &Page) -> Result<()> {
        let data = page.read();
        self.disk.lock().write_page(page.page_id(), &data)?;
        page.clear_dirty();
        Ok(())
    }
}

impl CacheSource for PageStore {
    type Key = PageId;
    type Item = Page;

    fn fetch(&self, page_id: PageId) -> Result<Arc<Page>> {
        let data = self.disk.lock().read_page(page_id)?;
        Ok(Arc::new(Page::new(page_id, data)))
    }

    fn write_back(&self, page: &Page) -> Result<()> {
        if page.is_dirty() {
            self.flush(page)?;
        }
        Ok(())
    }
}

/// Caches pages of one database file.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────┐
/// │                   PageCache                     │
/// │  ┌───────────────────────────────────────────┐  │
/// │  │        RefCountCache<PageStore>           │  │
/// │  │   PageId → Arc<Page>, refs, loading set   │  │
/// │  └───────────────────┬───────────────────────┘  │
/// │                      │ fetch / write_back       │
/// │  ┌───────────────────▼───────────────────────┐  │
/// │  │         Mutex<DiskManager>                │  │
/// │  └───────────────────────────────────────────┘  │
/// └─────────────────────────────────────────────────┘
/// ```
///
/// # Usage
/// ```ignore
/// let pages = PageCache::create("test.db", 16)?;
/// let page_id = pages.new_page(&PageData::new())?;
///
/// let page = pages.get_page(page_id)?;
/// page.mark_dirty();
/// page.write().as_mut_slice()[0] = 0xAB;
/// pages.release(&page)?; // last reference: written back
/// ```
pub struct PageCache {
    cache: RefCountCache<PageStore>,
}

impl PageCache {
    /// Create a new database file with room for `capacity` cached pages.
    ///
    /// # Errors
    /// - `Error::MemoryTooSmall` if `capacity` is below the minimum
    /// - `Error::FileExists` if the file exists
    pub fn create<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        Self::check_capacity(capacity)?;
        let disk = DiskManager::create(&path)?;
        info!(path = %path.as_ref().display(), capacity, "created page file");
        Ok(Self::with_disk(disk, capacity))
    }

    /// Open an existing database file.
    ///
    /// # Errors
    /// - `Error::MemoryTooSmall` if `capacity` is below the minimum
    /// - `Error::FileNotExists` if the file is missing
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        Self::check_capacity(capacity)?;
        let disk = DiskManager::open(&path)?;
        info!(
            path = %path.as_ref().display(),
            capacity,
            pages = disk.page_count(),
            "opened page file"
        );
        Ok(Self::with_disk(disk, capacity))
    }

    fn with_disk(disk: DiskManager, capacity: usize) -> Self {
        let store = PageStore {
            disk: Mutex::new(disk),
        };
        Self {
            cache: RefCountCache::new(store, capacity),
        }
    }

    fn check_capacity(capacity: usize) -> Result<()> {
        if capacity < MIN_CACHE_PAGES {
            return Err(Error::MemoryTooSmall {
                pages: capacity,
                min: MIN_CACHE_PAGES,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Public API
    // ========================================================================

    /// Append a page holding `init` to the file. The page is written
    /// immediately and is not cached.
    pub fn new_page(&self, init: &PageData) -> Result<PageId> {
        let page_id = self.cache.source().disk.lock().allocate_page(init)?;
        debug!(%page_id, "allocated page");
        Ok(page_id)
    }

    /// Get a page, reading it from disk on a miss.
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page is past the end of the file
    /// - `Error::CacheFull` if every cached page is referenced
    pub fn get_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        self.cache.get(page_id)
    }

    /// Release one reference; the last one writes the page back if dirty.
    pub fn release(&self, page: &Page) -> Result<()> {
        self.cache.release(page.page_id())
    }

    /// Write a page through to disk right now.
    pub fn flush_page(&self, page: &Page) -> Result<()> {
        self.cache.source().flush(page)
    }

    /// Shrink the file to exactly `page_count` pages.
    pub fn truncate_by_page_no(&self, page_count: u32) -> Result<()> {
        self.cache.source().disk.lock().truncate(page_count)
    }

    /// Number of pages in the file.
    pub fn page_count(&self) -> u32 {
        self.cache.source().disk.lock().page_count()
    }

    /// Write back every cached page and sync the file.
    pub fn close(&self) -> Result<()> {
        self.cache.close()?;
        self.cache.source().disk.lock().sync()
    }

    /// Current reference count of a page (0 if not cached).
    pub fn ref_count(&self, page_id: PageId) -> usize {
        self.cache.ref_count(page_id)
    }

    pub fn stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }
}
