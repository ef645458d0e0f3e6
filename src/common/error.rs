//! Error types for kestreldb.

use std::path::PathBuf;

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in kestreldb.
///
/// Errors fall into four groups:
/// - corruption the engine cannot reason about (see [`Error::is_fatal`])
/// - resource exhaustion (cache full, database busy, memory too small)
/// - concurrency conflicts that abort the transaction
///   (see [`Error::aborts_transaction`])
/// - bad input from the caller (oversized records, unknown transactions)
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from disk operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The reference-counted cache reached its capacity.
    #[error("cache is full")]
    CacheFull,

    /// The page cache was configured below its minimum size.
    #[error("memory too small: {pages} pages, at least {min} required")]
    MemoryTooSmall { pages: usize, min: usize },

    /// A memory setting could not be parsed.
    #[error("invalid memory setting: '{0}'")]
    InvalidMemory(String),

    /// The transaction-status file is malformed.
    #[error("bad XID file: {0}")]
    BadXidFile(String),

    /// The log file is malformed somewhere other than its tail.
    #[error("bad log file: {0}")]
    BadLogFile(String),

    /// The boot file is malformed.
    #[error("bad boot file: {0}")]
    BadBootFile(String),

    /// A page that must exist is missing from the database file.
    #[error("page {0} not found")]
    PageNotFound(u32),

    /// A record does not fit in a single page.
    #[error("data too large: {size} bytes, at most {max} fit in a page")]
    DataTooLarge { size: usize, max: usize },

    /// No page with enough free space could be claimed.
    #[error("database is busy")]
    DatabaseBusy,

    /// Waiting for a lock would close a cycle in the wait-for graph.
    #[error("deadlock detected")]
    Deadlock,

    /// A repeatable-read transaction tried to skip over a version it never saw.
    #[error("concurrent update conflict")]
    ConcurrentUpdate,

    /// No valid record lives at the requested uid.
    #[error("null entry")]
    NullEntry,

    /// The transaction id is not registered as active.
    #[error("transaction {0} is not active")]
    NoSuchTransaction(u64),

    /// A file that `create` would make already exists.
    #[error("file already exists: '{}'", .0.display())]
    FileExists(PathBuf),

    /// A file that `open` needs does not exist.
    #[error("file does not exist: '{}'", .0.display())]
    FileNotExists(PathBuf),

    /// A record's bytes do not decode (bad log type, short node, ...).
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

impl Error {
    /// On-disk corruption the engine cannot recover from.
    ///
    /// Callers are expected to stop using the database after one of these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::BadXidFile(_)
                | Error::BadLogFile(_)
                | Error::BadBootFile(_)
                | Error::PageNotFound(_)
                | Error::CorruptRecord(_)
        )
    }

    /// Concurrency conflicts that force the transaction to abort.
    ///
    /// The caller may retry the work in a fresh transaction.
    pub fn aborts_transaction(&self) -> bool {
        matches!(self, Error::Deadlock | Error::ConcurrentUpdate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PageNotFound(42);
        assert_eq!(format!("{}", err), "page 42 not found");

        let err = Error::DataTooLarge { size: 9000, max: 8190 };
        assert_eq!(
            format!("{}", err),
            "data too large: 9000 bytes, at most 8190 fit in a page"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        match err {
            Error::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_classification() {
        assert!(Error::BadLogFile("x".into()).is_fatal());
        assert!(Error::PageNotFound(3).is_fatal());
        assert!(!Error::CacheFull.is_fatal());
        assert!(!Error::DatabaseBusy.is_fatal());

        assert!(Error::Deadlock.aborts_transaction());
        assert!(Error::ConcurrentUpdate.aborts_transaction());
        assert!(!Error::NullEntry.aborts_transaction());
    }
}
