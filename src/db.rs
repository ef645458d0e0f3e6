//! Database - the engine's files and managers behind one handle.
//!
//! A database named `path` lives in four files:
//!
//! | File         | Contents                                  |
//! |--------------|-------------------------------------------|
//! | `<path>.xid` | transaction outcomes                      |
//! | `<path>.db`  | data pages                                |
//! | `<path>.log` | write-ahead log                           |
//! | `<path>.bt`  | boot file, 8 bytes for the caller's root  |
//!
//! # Example
//! ```no_run
//! use kestreldb::{Config, Database, IsolationLevel};
//!
//! # fn main() -> kestreldb::Result<()> {
//! let db = Database::create("/tmp/kestrel", Config::default())?;
//! let uid = db.run_implicit(|vm, xid| vm.insert(xid, b"hello"))?;
//!
//! let vm = db.version_manager();
//! let xid = vm.begin(IsolationLevel::RepeatableRead)?;
//! assert_eq!(vm.read(xid, uid)?, Some(b"hello".to_vec()));
//! vm.commit(xid)?;
//! db.close()?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::common::config::Config;
use crate::common::{Result, Uid, Xid};
use crate::concurrency::{IsolationLevel, TransactionManager, VersionManager};
use crate::data::DataManager;
use crate::index::BPlusTree;
use crate::storage::{path_with_suffix, Booter};

const XID_SUFFIX: &str = ".xid";

/// An open database.
pub struct Database {
    path: PathBuf,
    tm: Arc<TransactionManager>,
    dm: Arc<DataManager>,
    vm: VersionManager,
    booter: Booter,
}

impl Database {
    /// Create every file of a new database.
    ///
    /// # Errors
    /// Returns `Error::FileExists` if any of the files already exists, and
    /// `Error::MemoryTooSmall` if `config` leaves the page cache too small.
    pub fn create<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let path = path.as_ref();
        let tm = Arc::new(TransactionManager::create(path_with_suffix(
            path, XID_SUFFIX,
        ))?);
        let dm = Arc::new(DataManager::create(path, config.memory, Arc::clone(&tm))?);
        let booter = Booter::create(path)?;
        booter.update_uid(Uid::from_raw(0))?;

        info!(path = %path.display(), "created database");
        Ok(Self::assemble(path, tm, dm, booter))
    }

    /// Open an existing database, recovering it if it was not closed.
    ///
    /// # Errors
    /// Returns `Error::FileNotExists` if a file is missing, or a `Bad*File`
    /// error if one is malformed.
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let path = path.as_ref();
        let tm = Arc::new(TransactionManager::open(path_with_suffix(
            path, XID_SUFFIX,
        ))?);
        let dm = Arc::new(DataManager::open(path, config.memory, Arc::clone(&tm))?);
        let booter = Booter::open(path)?;

        info!(path = %path.display(), xids = tm.xid_count(), "opened database");
        Ok(Self::assemble(path, tm, dm, booter))
    }

    fn assemble(
        path: &Path,
        tm: Arc<TransactionManager>,
        dm: Arc<DataManager>,
        booter: Booter,
    ) -> Self {
        let vm = VersionManager::new(Arc::clone(&tm), Arc::clone(&dm));
        Self {
            path: path.to_path_buf(),
            tm,
            dm,
            vm,
            booter,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version_manager(&self) -> &VersionManager {
        &self.vm
    }

    pub fn data_manager(&self) -> &Arc<DataManager> {
        &self.dm
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.tm
    }

    pub fn booter(&self) -> &Booter {
        &self.booter
    }

    /// Build an empty index and open it.
    pub fn create_index(&self) -> Result<BPlusTree> {
        let boot = BPlusTree::create(&self.dm)?;
        BPlusTree::load(boot, Arc::clone(&self.dm))
    }

    /// Open the index whose boot record is at `boot_uid`.
    pub fn load_index(&self, boot_uid: Uid) -> Result<BPlusTree> {
        BPlusTree::load(boot_uid, Arc::clone(&self.dm))
    }

    /// Run `f` in its own read-committed transaction.
    ///
    /// The transaction commits if `f` succeeds. If `f` or the commit fails
    /// the transaction is aborted and that error is returned.
    pub fn run_implicit<T>(&self, f: impl FnOnce(&VersionManager, Xid) -> Result<T>) -> Result<T> {
        let xid = self.vm.begin(IsolationLevel::ReadCommitted)?;
        match f(&self.vm, xid).and_then(|value| self.vm.commit(xid).map(|()| value)) {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_fatal() {
                    error!(xid, error = %e, "statement hit damaged data");
                }
                if let Err(abort_err) = self.vm.abort(xid) {
                    warn!(xid, error = %abort_err, "abort after failed statement failed");
                }
                Err(e)
            }
        }
    }

    /// Flush everything and mark the data file cleanly closed.
    pub fn close(&self) -> Result<()> {
        self.vm.close()?;
        self.dm.close()?;
        self.tm.close()?;
        info!(path = %self.path.display(), "closed database");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("xids", &self.tm.xid_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::MB;
    use crate::common::Error;
    use tempfile::tempdir;

    #[test]
    fn test_create_writes_zero_boot() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("db"), Config::with_memory(MB)).unwrap();
        assert_eq!(db.booter().load().unwrap(), vec![0u8; 8]);
        db.close().unwrap();
    }

    #[test]
    fn test_create_twice_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        Database::create(&path, Config::with_memory(MB))
            .unwrap()
            .close()
            .unwrap();

        assert!(matches!(
            Database::create(&path, Config::with_memory(MB)),
            Err(Error::FileExists(_))
        ));
    }

    #[test]
    fn test_run_implicit_aborts_on_error() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("db"), Config::with_memory(MB)).unwrap();

        let mut seen = 0;
        let result: Result<()> = db.run_implicit(|vm, xid| {
            seen = xid;
            vm.insert(xid, b"doomed")?;
            Err(Error::DatabaseBusy)
        });
        assert!(matches!(result, Err(Error::DatabaseBusy)));
        assert!(db.transaction_manager().is_aborted(seen));
    }
}
