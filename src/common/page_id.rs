//! Page identifier type.

use std::fmt;

use crate::common::config::PAGE_SIZE;

/// Identifies a page in the database file.
///
/// Page numbers start at 1. Page 1 holds the clean-shutdown marker; data
/// pages start at 2. Page `n` lives at file offset `(n - 1) * PAGE_SIZE`.
///
/// # Example
/// ```
/// use kestreldb::PageId;
///
/// let page_id = PageId::new(3);
/// assert!(page_id.is_valid());
/// assert_eq!(page_id.file_offset(), 2 * 8192);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel for "no page". Page numbers start at 1.
    pub const INVALID: PageId = PageId(0);

    /// The page carrying the startup-validity marker.
    pub const FIRST: PageId = PageId(1);

    /// Create a new PageId.
    #[inline]
    pub fn new(id: u32) -> Self {
        PageId(id)
    }

    /// Check if this page ID is valid (not the sentinel value).
    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Byte offset of this page in the database file.
    #[inline]
    pub fn file_offset(&self) -> u64 {
        (self.0 as u64 - 1) * PAGE_SIZE as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Page(INVALID)")
        } else {
            write!(f, "Page({})", self.0)
        }
    }
}
