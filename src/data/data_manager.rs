//! Data Manager - the record layer.
//!
//! The [`DataManager`] turns pages into records:
//! - Inserting records into pages picked by the free-space index
//! - Reading records by uid through a reference-counted item cache
//! - Startup validity check, recovery and free-space rebuild at open
//! - Clean-shutdown marker at close

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::buffer::cache::{CacheSource, RefCountCache};
use crate::buffer::{Page, PageCache};
use crate::common::config::PAGE_SIZE;
use crate::common::{Error, PageId, Result, Uid, Xid};
use crate::concurrency::TransactionManager;
use crate::data::data_item::{self, DataItem};
use crate::data::FreeSpaceIndex;
use crate::recovery::{log_record, recover, Wal};
use crate::storage::page::{page_one, page_x};
use crate::storage::path_with_suffix;

const DB_SUFFIX: &str = ".db";
const LOG_SUFFIX: &str = ".log";

/// Attempts to find or make a page with room before giving up.
const INSERT_ATTEMPTS: usize = 5;

/// Loads data items from the page cache and releases their pages on eviction.
struct ItemStore {
    pages: Arc<PageCache>,
    wal: Arc<Wal>,
}

impl CacheSource for ItemStore {
    type Key = Uid;
    type Item = DataItem;

    fn fetch(&self, uid: Uid) -> Result<Arc<DataItem>> {
        let page = self.pages.get_page(uid.page_id())?;
        match DataItem::parse(uid, Arc::clone(&page), Arc::clone(&self.wal)) {
            Ok(item) => Ok(Arc::new(item)),
            Err(e) => {
                self.pages.release(&page)?;
                Err(e)
            }
        }
    }

    fn write_back(&self, item: &DataItem) -> Result<()> {
        self.pages.release(item.page())
    }
}

/// The record layer over one database file and its log.
///
/// # Usage
/// ```ignore
/// let dm = DataManager::create("db", 64 * MB, tm)?;
/// let uid = dm.insert(xid, b"payload")?;
///
/// if let Some(item) = dm.read(uid)? {
///     assert_eq!(item.data(), b"payload");
///     dm.release(&item)?;
/// }
/// dm.close()?;
/// ```
///
/// Dropping a `DataManager` without [`close`](Self::close) behaves like a
/// crash: the next open runs recovery.
pub struct DataManager {
    pages: Arc<PageCache>,
    wal: Arc<Wal>,
    tm: Arc<TransactionManager>,
    items: RefCountCache<ItemStore>,
    free_space: FreeSpaceIndex,
    page_one: Mutex<Option<Arc<Page>>>,
}

impl DataManager {
    /// Create `<path>.db` and `<path>.log` with a fresh page 1.
    pub fn create<P: AsRef<Path>>(
        path: P,
        memory: u64,
        tm: Arc<TransactionManager>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let pages = Arc::new(PageCache::create(
            path_with_suffix(path, DB_SUFFIX),
            capacity_for(memory),
        )?);
        let wal = Arc::new(Wal::create(path_with_suffix(path, LOG_SUFFIX))?);

        let dm = Self::assemble(pages, wal, tm);
        let page_id = dm.pages.new_page(&page_one::init_raw())?;
        debug_assert_eq!(page_id, PageId::FIRST);

        let page_one = dm.pages.get_page(PageId::FIRST)?;
        dm.pages.flush_page(&page_one)?;
        *dm.page_one.lock() = Some(page_one);

        info!(path = %path.display(), "created data files");
        Ok(dm)
    }

    /// Open existing files, recovering first if the last run did not close
    /// cleanly.
    pub fn open<P: AsRef<Path>>(path: P, memory: u64, tm: Arc<TransactionManager>) -> Result<Self> {
        let path = path.as_ref();
        let pages = Arc::new(PageCache::open(
            path_with_suffix(path, DB_SUFFIX),
            capacity_for(memory),
        )?);
        let wal = Arc::new(Wal::open(path_with_suffix(path, LOG_SUFFIX))?);

        let dm = Self::assemble(pages, wal, tm);
        let page_one = dm.pages.get_page(PageId::FIRST)?;
        if !page_one::check_vc(&page_one) {
            info!(path = %path.display(), "unclean shutdown detected");
            recover(&dm.tm, &dm.wal, &dm.pages)?;
        }

        dm.fill_free_space()?;

        page_one::set_vc_open(&page_one);
        dm.pages.flush_page(&page_one)?;
        *dm.page_one.lock() = Some(page_one);

        info!(
            path = %path.display(),
            pages = dm.pages.page_count(),
            "opened data files"
        );
        Ok(dm)
    }

    fn assemble(pages: Arc<PageCache>, wal: Arc<Wal>, tm: Arc<TransactionManager>) -> Self {
        let store = ItemStore {
            pages: Arc::clone(&pages),
            wal: Arc::clone(&wal),
        };
        Self {
            pages,
            wal,
            tm,
            items: RefCountCache::new(store, 0),
            free_space: FreeSpaceIndex::new(),
            page_one: Mutex::new(None),
        }
    }

    /// Touch every data page once and file its free space.
    fn fill_free_space(&self) -> Result<()> {
        let count = self.pages.page_count();
        for no in 2..=count {
            let page = self.pages.get_page(PageId::new(no))?;
            self.free_space.add(page.page_id(), page_x::free_space(&page));
            self.pages.release(&page)?;
        }
        debug!(pages = count.saturating_sub(1), "rebuilt free-space index");
        Ok(())
    }

    // ========================================================================
    // Public API
    // ========================================================================

    /// Read the item at `uid`. Deleted items read as `None`.
    ///
    /// A returned item must be handed back with [`release`](Self::release).
    pub fn read(&self, uid: Uid) -> Result<Option<Arc<DataItem>>> {
        let item = self.items.get(uid)?;
        if !item.is_valid() {
            self.items.release(uid)?;
            return Ok(None);
        }
        Ok(Some(item))
    }

    /// Insert `data` as a new item under `xid` and return its uid.
    ///
    /// # Errors
    /// - `Error::DataTooLarge` if the item cannot fit in an empty page
    /// - `Error::DatabaseBusy` if no page with room could be claimed
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let raw = data_item::wrap(data);
        if raw.len() > page_x::MAX_FREE_SPACE {
            return Err(Error::DataTooLarge {
                size: raw.len(),
                max: page_x::MAX_FREE_SPACE,
            });
        }

        let mut claimed = None;
        for _ in 0..INSERT_ATTEMPTS {
            if let Some(info) = self.free_space.select(raw.len()) {
                claimed = Some(info);
                break;
            }
            let page_id = self.pages.new_page(&page_x::init_raw())?;
            self.free_space.add(page_id, page_x::MAX_FREE_SPACE);
        }
        let info = claimed.ok_or(Error::DatabaseBusy)?;

        let page = match self.pages.get_page(info.page_id) {
            Ok(page) => page,
            Err(e) => {
                // Keep the page out of circulation rather than double-claim it.
                self.free_space.add(info.page_id, 0);
                return Err(e);
            }
        };

        let inserted = self.insert_into(&page, xid, &raw);
        let free = match inserted {
            Ok(_) => page_x::free_space(&page),
            Err(_) => 0,
        };
        self.free_space.add(info.page_id, free);
        self.pages.release(&page)?;
        inserted
    }

    /// Log, then append. The caller owns `page` through the free-space index.
    fn insert_into(&self, page: &Page, xid: Xid, raw: &[u8]) -> Result<Uid> {
        let offset = page_x::fso(page);
        if offset as usize + raw.len() > PAGE_SIZE {
            return Err(Error::DataTooLarge {
                size: raw.len(),
                max: PAGE_SIZE - offset as usize,
            });
        }

        self.wal
            .log(&log_record::encode_insert(xid, page.page_id(), offset, raw))?;
        let written = page_x::insert(page, raw);
        debug_assert_eq!(written, offset);

        Ok(Uid::new(page.page_id(), offset))
    }

    /// Hand back an item returned by [`read`](Self::read).
    pub fn release(&self, item: &DataItem) -> Result<()> {
        self.items.release(item.uid())
    }

    /// Flush everything and write the clean-shutdown marker.
    pub fn close(&self) -> Result<()> {
        self.items.close()?;
        self.wal.close()?;

        if let Some(page_one) = self.page_one.lock().take() {
            page_one::set_vc_close(&page_one);
            self.pages.release(&page_one)?;
        }
        self.pages.close()?;
        info!("closed data files");
        Ok(())
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.tm
    }

    pub fn page_cache(&self) -> &PageCache {
        &self.pages
    }

    pub fn wal(&self) -> &Wal {
        &self.wal
    }
}

/// Page-cache capacity for a memory budget in bytes.
fn capacity_for(memory: u64) -> usize {
    (memory / PAGE_SIZE as u64) as usize
}
