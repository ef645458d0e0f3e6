//! PageData - the fundamental 8KB unit of storage.
//!
//! A [`PageData`] is a raw 8KB byte array that serves as the unit of I/O
//! between disk and memory. The page cache wraps it in a
//! [`Page`](crate::buffer::Page) together with its page number and dirty flag.

use crate::common::config::PAGE_SIZE;

/// The bytes of one page (8KB, 4KB-aligned).
///
/// # Memory Layout
/// - Size: 8192 bytes
/// - Alignment: 4096 bytes
///
/// # Clone Implementation
/// `PageData` does NOT implement `Clone` in production code (copying 8KB
/// should be explicit). A `#[cfg(test)]` Clone is provided for tests.
///
/// # Example
/// ```
/// use kestreldb::storage::page::PageData;
///
/// let mut page = PageData::new();
/// page.as_mut_slice()[0] = 0xFF;
/// assert_eq!(page.as_slice()[0], 0xFF);
/// ```
#[repr(align(4096))]
pub struct PageData {
    data: [u8; PAGE_SIZE],
}

impl PageData {
    /// Create a new zeroed page.
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
        }
    }

    /// Build a page from an initial image, zero-padding a short one.
    pub fn from_bytes(init: &[u8]) -> Self {
        let mut page = Self::new();
        let len = init.len().min(PAGE_SIZE);
        page.data[..len].copy_from_slice(&init[..len]);
        page
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Get the size of a page.
    #[inline]
    pub const fn size() -> usize {
        PAGE_SIZE
    }
}

impl Default for PageData {
    fn default() -> Self {
        Self::new()
    }
}

// Clone only available in tests - forces explicit copying in production
#[cfg(test)]
impl Clone for PageData {
    fn clone(&self) -> Self {
        Self::from_bytes(&self.data)
    }
}

// ============================================================================
// TESTS
// ============================================================================
