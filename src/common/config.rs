//! Configuration constants and runtime settings for kestreldb.

use crate::common::{Error, Result};

/// Size of a page in bytes (8KB).
///
/// Every record, node and free-space offset must fit in one page, so a
/// 2-byte offset is always enough to address a position inside it.
///
/// # Memory Layout
/// With 8KB pages and 32-bit page numbers:
/// - Max pages: 2^32 - 1 (page numbers start at 1)
/// - Max database size: ~32TB
pub const PAGE_SIZE: usize = 8192;

/// Maximum number of pages with u32 page numbers (page 0 is never used).
pub const MAX_PAGES: u64 = u32::MAX as u64;

/// Maximum theoretical database size in bytes.
pub const MAX_DB_SIZE_BYTES: u64 = MAX_PAGES * PAGE_SIZE as u64;

/// Smallest page cache the engine accepts, in pages.
///
/// The free-space index is rebuilt by touching every page once at open, and
/// an insert can pin a handful of pages at a time.
pub const MIN_CACHE_PAGES: usize = 10;

pub const KB: u64 = 1 << 10;
pub const MB: u64 = 1 << 20;
pub const GB: u64 = 1 << 30;

/// Default memory given to the page cache (64MB).
pub const DEFAULT_MEMORY: u64 = 64 * MB;

/// Runtime settings for opening or creating a database.
///
/// # Example
/// ```
/// use kestreldb::common::config::{Config, MB};
///
/// let config = Config::parse_memory("16MB").unwrap();
/// assert_eq!(config.memory, 16 * MB);
/// assert_eq!(config.cache_pages(), 2048);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Bytes of memory the page cache may hold.
    pub memory: u64,
}

impl Config {
    /// Build a config with an explicit memory budget in bytes.
    pub fn with_memory(memory: u64) -> Self {
        Self { memory }
    }

    /// Parse a memory setting such as `"64MB"`, `"512KB"` or `"1GB"`.
    ///
    /// # Errors
    /// Returns `Error::InvalidMemory` for a missing number or an unknown unit.
    pub fn parse_memory(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.len() < 3 {
            return Err(Error::InvalidMemory(value.to_string()));
        }

        let (number, unit) = value.split_at(value.len() - 2);
        let multiplier = match unit.to_ascii_uppercase().as_str() {
            "KB" => KB,
            "MB" => MB,
            "GB" => GB,
            _ => return Err(Error::InvalidMemory(value.to_string())),
        };
        let number: u64 = number
            .trim()
            .parse()
            .map_err(|_| Error::InvalidMemory(value.to_string()))?;

        Ok(Self::with_memory(number * multiplier))
    }

    /// Number of pages the page cache may hold.
    #[inline]
    pub fn cache_pages(&self) -> usize {
        (self.memory / PAGE_SIZE as u64) as usize
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_memory(DEFAULT_MEMORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(PAGE_SIZE.is_power_of_two());
        assert_eq!(PAGE_SIZE, 8192);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.memory, 64 * MB);
        assert_eq!(config.cache_pages(), 8192);
    }

    #[test]
    fn test_parse_memory_units() {
        assert_eq!(Config::parse_memory("512KB").unwrap().memory, 512 * KB);
        assert_eq!(Config::parse_memory("64MB").unwrap().memory, 64 * MB);
        assert_eq!(Config::parse_memory("2GB").unwrap().memory, 2 * GB);
        assert_eq!(Config::parse_memory("8mb").unwrap().memory, 8 * MB);
    }

    #[test]
    fn test_parse_memory_rejects_garbage() {
        assert!(matches!(
            Config::parse_memory("MB"),
            Err(Error::InvalidMemory(_))
        ));
        assert!(matches!(
            Config::parse_memory("64TB"),
            Err(Error::InvalidMemory(_))
        ));
        assert!(matches!(
            Config::parse_memory("lotsMB"),
            Err(Error::InvalidMemory(_))
        ));
    }
}
