//! Common types and utilities shared across kestreldb.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and [`Config`](config::Config)
//! - Error types
//! - Big-endian codec helpers
//! - Identifiers (PageId, Uid, Xid)

pub mod codec;
pub mod config;
pub mod error;
mod page_id;
mod uid;

pub use error::{Error, Result};
pub use page_id::PageId;
pub use uid::{Uid, Xid, SUPER_XID};
