//! Transaction-status store.
//!
//! # XID File Layout
//! ```text
//! ┌───────────┬──────────┬──────────┬─────┬──────────┐
//! │ count (8) │ xid 1    │ xid 2    │ ... │ xid N    │
//! └───────────┴──────────┴──────────┴─────┴──────────┘
//!              1 byte each: 0 active, 1 committed, 2 aborted
//! ```
//!
//! The status bytes are mirrored in memory, so status queries never touch
//! the file. Every change is written through and synced before returning.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{Error, Result, Xid, SUPER_XID};

const LEN_XID_HEADER: u64 = 8;

/// Durable state of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum XidStatus {
    Active = 0,
    Committed = 1,
    Aborted = 2,
}

impl XidStatus {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(XidStatus::Active),
            1 => Some(XidStatus::Committed),
            2 => Some(XidStatus::Aborted),
            _ => None,
        }
    }
}

struct TmInner {
    file: File,
    /// Status of xid `i + 1` at index `i`.
    statuses: Vec<XidStatus>,
}

/// Allocates transaction ids and records their outcome.
///
/// Xid 0 is the super transaction: it is never stored and always reads as
/// committed.
pub struct TransactionManager {
    inner: Mutex<TmInner>,
}

impl TransactionManager {
    /// Create an empty XID file.
    ///
    /// # Errors
    /// Returns `Error::FileExists` if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => Error::FileExists(path.to_path_buf()),
                _ => Error::Io(e),
            })?;

        file.write_all(&0u64.to_be_bytes())?;
        file.sync_all()?;
        debug!(path = %path.display(), "created xid file");

        Ok(Self {
            inner: Mutex::new(TmInner {
                file,
                statuses: Vec::new(),
            }),
        })
    }

    /// Open an XID file and validate its length.
    ///
    /// # Errors
    /// - `Error::FileNotExists` if the file is missing
    /// - `Error::BadXidFile` if its length disagrees with its header
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::FileNotExists(path.to_path_buf()),
                _ => Error::Io(e),
            })?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        if (raw.len() as u64) < LEN_XID_HEADER {
            return Err(Error::BadXidFile(format!(
                "file is {} bytes, shorter than its header",
                raw.len()
            )));
        }

        let mut header = [0u8; LEN_XID_HEADER as usize];
        header.copy_from_slice(&raw[..LEN_XID_HEADER as usize]);
        let count = u64::from_be_bytes(header);
        if raw.len() as u64 != LEN_XID_HEADER + count {
            return Err(Error::BadXidFile(format!(
                "header counts {} transactions but file is {} bytes",
                count,
                raw.len()
            )));
        }

        let statuses = raw[LEN_XID_HEADER as usize..]
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                XidStatus::from_byte(b).ok_or_else(|| {
                    Error::BadXidFile(format!("xid {} has status byte {}", i + 1, b))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(path = %path.display(), count, "opened xid file");
        Ok(Self {
            inner: Mutex::new(TmInner { file, statuses }),
        })
    }

    /// Allocate the next xid and record it as active.
    pub fn begin(&self) -> Result<Xid> {
        let mut inner = self.inner.lock();
        let xid = inner.statuses.len() as Xid + 1;

        write_status(&mut inner.file, xid, XidStatus::Active)?;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&xid.to_be_bytes())?;
        inner.file.sync_data()?;

        inner.statuses.push(XidStatus::Active);
        Ok(xid)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.update(xid, XidStatus::Committed)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.update(xid, XidStatus::Aborted)
    }

    fn update(&self, xid: Xid, status: XidStatus) -> Result<()> {
        if xid == SUPER_XID {
            return Ok(());
        }

        let mut inner = self.inner.lock();
        if xid > inner.statuses.len() as Xid {
            return Err(Error::NoSuchTransaction(xid));
        }
        write_status(&mut inner.file, xid, status)?;
        inner.file.sync_data()?;
        inner.statuses[(xid - 1) as usize] = status;
        Ok(())
    }

    /// Recorded status of `xid`, or `None` for the super transaction and
    /// xids never allocated.
    pub fn status(&self, xid: Xid) -> Option<XidStatus> {
        if xid == SUPER_XID {
            return None;
        }
        self.inner.lock().statuses.get((xid - 1) as usize).copied()
    }

    pub fn is_active(&self, xid: Xid) -> bool {
        self.status(xid) == Some(XidStatus::Active)
    }

    pub fn is_committed(&self, xid: Xid) -> bool {
        xid == SUPER_XID || self.status(xid) == Some(XidStatus::Committed)
    }

    pub fn is_aborted(&self, xid: Xid) -> bool {
        self.status(xid) == Some(XidStatus::Aborted)
    }

    /// Number of xids allocated so far.
    pub fn xid_count(&self) -> u64 {
        self.inner.lock().statuses.len() as u64
    }

    pub fn close(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

fn write_status(file: &mut File, xid: Xid, status: XidStatus) -> Result<()> {
    file.seek(SeekFrom::Start(LEN_XID_HEADER + xid - 1))?;
    file.write_all(&[status as u8])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_begin_commit_abort() {
        let dir = tempdir().unwrap();
        let tm = TransactionManager::create(dir.path().join("t.xid")).unwrap();

        let a = tm.begin().unwrap();
        let b = tm.begin().unwrap();
        assert_eq!((a, b), (1, 2));
        assert!(tm.is_active(a) && tm.is_active(b));

        tm.commit(a).unwrap();
        tm.abort(b).unwrap();
        assert!(tm.is_committed(a));
        assert!(tm.is_aborted(b));
        assert!(!tm.is_active(a));
    }

    #[test]
    fn test_super_xid() {
        let dir = tempdir().unwrap();
        let tm = TransactionManager::create(dir.path().join("t.xid")).unwrap();

        assert!(tm.is_committed(SUPER_XID));
        assert!(!tm.is_active(SUPER_XID));
        assert!(!tm.is_aborted(SUPER_XID));
        tm.abort(SUPER_XID).unwrap();
        assert!(tm.is_committed(SUPER_XID));
    }

    #[test]
    fn test_statuses_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.xid");

        {
            let tm = TransactionManager::create(&path).unwrap();
            let a = tm.begin().unwrap();
            tm.begin().unwrap();
            tm.commit(a).unwrap();
        }

        let tm = TransactionManager::open(&path).unwrap();
        assert_eq!(tm.xid_count(), 2);
        assert!(tm.is_committed(1));
        assert!(tm.is_active(2));
        assert_eq!(tm.begin().unwrap(), 3);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8 + 3);
    }

    #[test]
    fn test_open_rejects_length_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.xid");
        {
            let tm = TransactionManager::create(&path).unwrap();
            tm.begin().unwrap();
        }

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0]).unwrap();
        drop(file);

        assert!(matches!(
            TransactionManager::open(&path),
            Err(Error::BadXidFile(_))
        ));
    }

    #[test]
    fn test_unknown_xid() {
        let dir = tempdir().unwrap();
        let tm = TransactionManager::create(dir.path().join("t.xid")).unwrap();

        assert!(matches!(tm.commit(5), Err(Error::NoSuchTransaction(5))));
        assert_eq!(tm.status(5), None);
        assert!(!tm.is_committed(5));
    }
}
