//! Write-ahead logging and crash recovery.
//!
//! - [`Wal`] - The append-only, checksummed log file
//! - [`LogRecord`] - Insert and update entries
//! - [`recover`] - Redo/undo replay at startup

pub mod log_record;
mod recover;
mod wal;

pub use log_record::LogRecord;
pub use recover::recover;
pub use wal::{calc_checksum, Wal};
