//! Page - a cached database page.
//!
//! A [`Page`] holds a [`PageData`] plus the metadata the page cache needs:
//! - Which page is loaded
//! - Dirty flag for write-back tracking
//!
//! Reference counting lives in the cache, not here.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::PageId;
use crate::storage::page::PageData;

/// A page resident in the page cache.
///
/// # Thread Safety
/// - `data`: `RwLock` for read/write synchronization
/// - `dirty`: `AtomicBool` for lock-free dirty tracking
pub struct Page {
    page_id: PageId,

    /// The page bytes, protected by RwLock.
    data: RwLock<PageData>,

    /// Whether the page has been modified since it was last written.
    dirty: AtomicBool,
}

impl Page {
    /// Wrap page bytes read from (or about to be written to) disk.
    pub fn new(page_id: PageId, data: PageData) -> Self {
        Self {
            page_id,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    // ========================================================================
    // Data access (RwLock)
    // ========================================================================

    /// Acquire read lock on the page bytes.
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, PageData> {
        self.data.read()
    }

    /// Acquire write lock on the page bytes.
    ///
    /// Writers are expected to call [`Page::mark_dirty`] as well.
    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, PageData> {
        self.data.write()
    }

    // ========================================================================
    // Dirty flag operations (Atomic)
    // ========================================================================

    /// Mark the page as dirty (modified).
    #[inline]
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clear the dirty flag.
    #[inline]
    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Check if the page is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
