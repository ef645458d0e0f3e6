//! Storage layer - disk I/O and page formats.
//!
//! This module handles persistent storage:
//! - [`DiskManager`] - Low-level file I/O
//! - [`page`] - Page types and layouts
//! - [`Booter`] - The small boot file holding a root pointer

mod booter;
mod disk_manager;
pub mod page;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub use booter::Booter;
pub use disk_manager::DiskManager;

/// `path` with `suffix` appended to its final component (`db` → `db.log`).
pub(crate) fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
