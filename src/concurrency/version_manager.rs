//! Version Manager - MVCC over the record layer.
//!
//! The [`VersionManager`] provides:
//! - Transaction begin/commit/abort with read-committed or repeatable-read
//!   isolation
//! - Versioned insert/read/delete on top of [`DataManager`]
//! - Two-phase locking of deleted records, with deadlock detection
//! - Automatic abort on deadlock or version skip

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::buffer::cache::{CacheSource, RefCountCache};
use crate::common::{Error, Result, Uid, Xid, SUPER_XID};
use crate::concurrency::entry::{self, Entry};
use crate::concurrency::transaction::AbortReason;
use crate::concurrency::{visibility, IsolationLevel, LockTable, Transaction, TransactionManager};
use crate::data::DataManager;

/// Loads entries through the data manager.
struct EntryStore {
    dm: Arc<DataManager>,
}

impl CacheSource for EntryStore {
    type Key = Uid;
    type Item = Entry;

    fn fetch(&self, uid: Uid) -> Result<Arc<Entry>> {
        match self.dm.read(uid)? {
            Some(item) => Ok(Arc::new(Entry::new(uid, item))),
            None => Err(Error::NullEntry),
        }
    }

    fn write_back(&self, entry: &Entry) -> Result<()> {
        self.dm.release(entry.item())
    }
}

/// Multi-version transactional access to records.
///
/// # Thread Safety
/// - `active`: one `Mutex` over the active-transaction map
/// - `lock_table`: its own `Mutex`; waiting happens outside it
/// - `entries`: reference-counted cache shared by all transactions
///
/// # Usage
/// ```ignore
/// let xid = vm.begin(IsolationLevel::RepeatableRead)?;
/// let uid = vm.insert(xid, b"row")?;
/// assert_eq!(vm.read(xid, uid)?, Some(b"row".to_vec()));
/// vm.commit(xid)?;
/// ```
pub struct VersionManager {
    tm: Arc<TransactionManager>,
    dm: Arc<DataManager>,
    entries: RefCountCache<EntryStore>,
    active: Mutex<HashMap<Xid, Arc<Transaction>>>,
    lock_table: LockTable,
}

impl VersionManager {
    pub fn new(tm: Arc<TransactionManager>, dm: Arc<DataManager>) -> Self {
        let mut active = HashMap::new();
        active.insert(SUPER_XID, Arc::new(Transaction::super_transaction()));

        Self {
            tm,
            entries: RefCountCache::new(
                EntryStore {
                    dm: Arc::clone(&dm),
                },
                0,
            ),
            dm,
            active: Mutex::new(active),
            lock_table: LockTable::new(),
        }
    }

    fn transaction(&self, xid: Xid) -> Result<Arc<Transaction>> {
        self.active
            .lock()
            .get(&xid)
            .cloned()
            .ok_or(Error::NoSuchTransaction(xid))
    }

    /// Run `f` on the entry at `uid`, releasing it afterwards.
    ///
    /// Returns `None` if no valid record lives at `uid`.
    fn with_entry<T>(&self, uid: Uid, f: impl FnOnce(&Entry) -> Result<T>) -> Result<Option<T>> {
        let entry = match self.entries.get(uid) {
            Ok(entry) => entry,
            Err(Error::NullEntry) => return Ok(None),
            Err(e) => return Err(e),
        };

        let result = f(&entry);
        self.entries.release(uid)?;
        result.map(Some)
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Start a transaction.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        let mut active = self.active.lock();
        let xid = self.tm.begin()?;
        let t = Transaction::new(xid, level, &active);
        active.insert(xid, Arc::new(t));
        debug!(xid, ?level, "began transaction");
        Ok(xid)
    }

    /// Commit `xid`, releasing its locks.
    ///
    /// # Errors
    /// Returns the transaction's stored error if it was aborted on a
    /// deadlock or version skip; the caller must then [`abort`](Self::abort).
    pub fn commit(&self, xid: Xid) -> Result<()> {
        if xid == SUPER_XID {
            return Ok(());
        }

        let t = self.transaction(xid)?;
        t.check()?;

        self.active.lock().remove(&xid);
        // Waiters woken below must already see the commit.
        self.tm.commit(xid)?;
        self.lock_table.remove(xid);
        debug!(xid, "committed transaction");
        Ok(())
    }

    /// Abort `xid`. A no-op beyond bookkeeping if it was already aborted
    /// automatically.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        if xid == SUPER_XID {
            return Ok(());
        }
        self.intern_abort(xid, false)
    }

    fn intern_abort(&self, xid: Xid, auto: bool) -> Result<()> {
        let t = {
            let mut active = self.active.lock();
            let t = active
                .get(&xid)
                .cloned()
                .ok_or(Error::NoSuchTransaction(xid))?;
            if !auto {
                active.remove(&xid);
            }
            t
        };

        let already = if auto {
            t.mark_auto_aborted()
        } else {
            t.is_auto_aborted()
        };
        if already {
            return Ok(());
        }

        self.lock_table.remove(xid);
        self.tm.abort(xid)?;
        debug!(xid, auto, "aborted transaction");
        Ok(())
    }

    /// Record `reason` on `t` and abort it on its owner's behalf.
    fn auto_abort(&self, t: &Transaction, reason: AbortReason) -> Error {
        warn!(xid = t.xid, ?reason, "auto-aborting transaction");
        t.set_error(reason);
        match self.intern_abort(t.xid, true) {
            Ok(()) => reason.into(),
            Err(e) => e,
        }
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Read the version of `uid` visible to `xid`.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let t = self.transaction(xid)?;
        t.check()?;

        let data = self.with_entry(uid, |entry| {
            if visibility::is_visible(&self.tm, &t, entry.stamps()) {
                Ok(Some(entry.data()))
            } else {
                Ok(None)
            }
        })?;
        Ok(data.flatten())
    }

    /// Insert a new version created by `xid`.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let t = self.transaction(xid)?;
        t.check()?;

        self.dm.insert(xid, &entry::wrap(xid, data))
    }

    /// Delete the version of `uid` visible to `xid`.
    ///
    /// Blocks while another transaction holds `uid`. Returns `false` if
    /// nothing visible lives at `uid` or `xid` already deleted it.
    ///
    /// # Errors
    /// - `Error::Deadlock` if waiting would deadlock
    /// - `Error::ConcurrentUpdate` on a repeatable-read version skip
    ///
    /// Both abort the transaction.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        let t = self.transaction(xid)?;
        t.check()?;

        let deleted = self.with_entry(uid, |entry| {
            if !visibility::is_visible(&self.tm, &t, entry.stamps()) {
                return Ok(false);
            }

            match self.lock_table.add(xid, uid) {
                Ok(Some(waiter)) => waiter.wait(),
                Ok(None) => {}
                Err(Error::Deadlock) => return Err(self.auto_abort(&t, AbortReason::Deadlock)),
                Err(e) => return Err(e),
            }

            let stamps = entry.stamps();
            if stamps.xmax == xid {
                return Ok(false);
            }
            if visibility::is_version_skip(&self.tm, &t, stamps) {
                return Err(self.auto_abort(&t, AbortReason::ConcurrentUpdate));
            }
            // The previous holder may have deleted it while we waited.
            if !visibility::is_visible(&self.tm, &t, stamps) {
                return Ok(false);
            }

            entry.set_xmax(xid)?;
            Ok(true)
        })?;
        Ok(deleted.unwrap_or(false))
    }

    /// Whether `xid` is registered as active.
    pub fn is_active(&self, xid: Xid) -> bool {
        self.active.lock().contains_key(&xid)
    }

    pub fn data_manager(&self) -> &Arc<DataManager> {
        &self.dm
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.tm
    }

    /// Release every cached entry.
    pub fn close(&self) -> Result<()> {
        self.entries.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::MB;
    use crate::storage::path_with_suffix;
    use tempfile::{tempdir, TempDir};

    fn create_test_vm(dir: &TempDir) -> VersionManager {
        let base = dir.path().join("db");
        let tm = Arc::new(TransactionManager::create(path_with_suffix(&base, ".xid")).unwrap());
        let dm = Arc::new(DataManager::create(&base, MB, Arc::clone(&tm)).unwrap());
        VersionManager::new(tm, dm)
    }

    #[test]
    fn test_insert_read_own_write() {
        let dir = tempdir().unwrap();
        let vm = create_test_vm(&dir);

        let xid = vm.begin(IsolationLevel::ReadCommitted).unwrap();
        let uid = vm.insert(xid, b"row").unwrap();
        assert_eq!(vm.read(xid, uid).unwrap(), Some(b"row".to_vec()));
        vm.commit(xid).unwrap();
        assert!(!vm.is_active(xid));
    }

    #[test]
    fn test_uncommitted_insert_is_hidden() {
        let dir = tempdir().unwrap();
        let vm = create_test_vm(&dir);

        let writer = vm.begin(IsolationLevel::ReadCommitted).unwrap();
        let reader = vm.begin(IsolationLevel::ReadCommitted).unwrap();
        let uid = vm.insert(writer, b"row").unwrap();

        assert_eq!(vm.read(reader, uid).unwrap(), None);
        vm.commit(writer).unwrap();
        assert_eq!(vm.read(reader, uid).unwrap(), Some(b"row".to_vec()));
    }

    #[test]
    fn test_aborted_insert_is_hidden() {
        let dir = tempdir().unwrap();
        let vm = create_test_vm(&dir);

        let writer = vm.begin(IsolationLevel::ReadCommitted).unwrap();
        let uid = vm.insert(writer, b"row").unwrap();
        vm.abort(writer).unwrap();

        let reader = vm.begin(IsolationLevel::ReadCommitted).unwrap();
        assert_eq!(vm.read(reader, uid).unwrap(), None);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let vm = create_test_vm(&dir);

        let setup = vm.begin(IsolationLevel::ReadCommitted).unwrap();
        let uid = vm.insert(setup, b"row").unwrap();
        vm.commit(setup).unwrap();

        let xid = vm.begin(IsolationLevel::ReadCommitted).unwrap();
        assert!(vm.delete(xid, uid).unwrap());
        // Own deletion hides the row from the deleter.
        assert!(!vm.delete(xid, uid).unwrap());
        assert_eq!(vm.read(xid, uid).unwrap(), None);
        vm.commit(xid).unwrap();
    }

    #[test]
    fn test_unknown_transaction() {
        let dir = tempdir().unwrap();
        let vm = create_test_vm(&dir);

        assert!(matches!(
            vm.read(99, Uid::from_raw(0)),
            Err(Error::NoSuchTransaction(99))
        ));
        assert!(matches!(vm.commit(99), Err(Error::NoSuchTransaction(99))));
    }

    #[test]
    fn test_super_transaction_is_always_registered() {
        let dir = tempdir().unwrap();
        let vm = create_test_vm(&dir);

        let uid = vm.insert(SUPER_XID, b"boot").unwrap();
        vm.commit(SUPER_XID).unwrap();
        assert!(vm.is_active(SUPER_XID));

        let xid = vm.begin(IsolationLevel::RepeatableRead).unwrap();
        assert_eq!(vm.read(xid, uid).unwrap(), Some(b"boot".to_vec()));
    }

    #[test]
    fn test_read_missing_uid() {
        let dir = tempdir().unwrap();
        let vm = create_test_vm(&dir);

        let setup = vm.begin(IsolationLevel::ReadCommitted).unwrap();
        let uid = vm.insert(setup, b"row").unwrap();
        vm.commit(setup).unwrap();

        // Mark the underlying item invalid, as recovery would for a rolled
        // back insert.
        let pages = vm.data_manager().page_cache();
        let page = pages.get_page(uid.page_id()).unwrap();
        page.mark_dirty();
        page.write().as_mut_slice()[uid.offset() as usize] = 1;
        pages.release(&page).unwrap();

        let xid = vm.begin(IsolationLevel::ReadCommitted).unwrap();
        assert_eq!(vm.read(xid, uid).unwrap(), None);
        assert!(!vm.delete(xid, uid).unwrap());
    }
}
