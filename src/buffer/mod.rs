//! Caching layer.
//!
//! Everything between the storage engine and disk goes through a
//! reference-counted cache: an item stays resident while someone holds it and
//! is written back when the last holder releases it.
//!
//! # Components
//! - [`RefCountCache`] / [`CacheSource`] - The generic cache and its loader seam
//! - [`PageCache`] - Pages of the database file
//! - [`Page`] - A cached page plus its dirty flag
//! - [`CacheStats`] - Performance statistics

pub mod cache;
mod page;
mod page_cache;
mod stats;

pub use cache::{CacheSource, RefCountCache};
pub use page::Page;
pub use page_cache::PageCache;
pub use stats::{CacheStats, StatsSnapshot};
