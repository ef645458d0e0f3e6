//! KestrelDB - an embedded storage engine with MVCC transactions.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Database (db.rs)                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Index Layer (index/)                           │   │
//! │  │     B+Tree, nodes stored as records                      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Transaction Layer (concurrency/)               │   │
//! │  │  VersionManager + Visibility + LockTable + XID file      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Record Layer (data/)                           │   │
//! │  │  DataManager + DataItem before/after + free space        │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌────────────────────────────┐  ┌───────────────────────────┐ │
//! │  │  Caching (buffer/)         │  │  Logging (recovery/)      │ │
//! │  │  RefCountCache, PageCache  │  │  WAL + redo/undo replay   │ │
//! │  └────────────────────────────┘  └───────────────────────────┘ │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Storage Layer (storage/)                       │   │
//! │  │     DiskManager + page formats + boot file               │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, Uid, Error, config)
//! - [`buffer`] - Reference-counted caching of pages
//! - [`storage`] - Disk I/O, page formats and the boot file
//! - [`recovery`] - Write-ahead logging and crash recovery
//! - [`data`] - Variable-length records
//! - [`concurrency`] - Transactions and MVCC
//! - [`index`] - B+Tree index
//! - [`db`] - The [`Database`] facade
//!
//! # Quick Start
//! ```no_run
//! use kestreldb::{Config, Database};
//!
//! # fn main() -> kestreldb::Result<()> {
//! let db = Database::create("my_database", Config::default())?;
//! let index = db.create_index()?;
//!
//! let uid = db.run_implicit(|vm, xid| vm.insert(xid, b"alice"))?;
//! index.insert(42, uid)?;
//! assert_eq!(index.search(42)?, vec![uid]);
//!
//! index.close()?;
//! db.close()?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod data;
pub mod db;
pub mod index;
pub mod recovery;
pub mod storage;

pub use common::config::{Config, PAGE_SIZE};
pub use common::{Error, PageId, Result, Uid, Xid, SUPER_XID};

pub use buffer::{CacheStats, PageCache, StatsSnapshot};
pub use concurrency::{IsolationLevel, VersionManager};
pub use data::DataManager;
pub use db::Database;
pub use index::BPlusTree;
