//! Record layer.
//!
//! - [`DataManager`] - Inserts and reads variable-length records
//! - [`DataItem`] - A cached record and its before/after edit protocol
//! - [`FreeSpaceIndex`] - Picks pages with room for new records

pub mod data_item;
mod data_manager;
mod free_space;

pub use data_item::{DataItem, DataItemEdit};
pub use data_manager::DataManager;
pub use free_space::{FreeSpaceIndex, PageInfo};
