//! Transaction management and MVCC.
//!
//! - [`TransactionManager`] - Durable transaction ids and outcomes
//! - [`Transaction`] / [`IsolationLevel`] - In-memory transaction state
//! - [`Entry`] - One version of a record, stamped with creator and deleter
//! - [`visibility`] - Which versions a transaction may see
//! - [`LockTable`] - Record locks and deadlock detection
//! - [`VersionManager`] - The MVCC entry point

pub mod entry;
mod lock_table;
mod transaction;
mod transaction_manager;
mod version_manager;
pub mod visibility;

pub use entry::Entry;
pub use lock_table::{LockTable, LockWaiter};
pub use transaction::{AbortReason, IsolationLevel, Transaction};
pub use transaction_manager::{TransactionManager, XidStatus};
pub use version_manager::VersionManager;
