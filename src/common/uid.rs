//! Record identifier type.

use std::fmt;

use crate::common::PageId;

/// Transaction identifier.
pub type Xid = u64;

/// The super transaction. Always committed, never in any snapshot.
pub const SUPER_XID: Xid = 0;

/// Identifies a record by its physical slot.
///
/// ```text
/// 63            32 31        16 15         0
/// ┌───────────────┬────────────┬────────────┐
/// │  page number  │  reserved  │   offset   │
/// └───────────────┴────────────┴────────────┘
/// ```
///
/// # Example
/// ```
/// use kestreldb::{PageId, Uid};
///
/// let uid = Uid::new(PageId::new(7), 130);
/// assert_eq!(uid.page_id(), PageId::new(7));
/// assert_eq!(uid.offset(), 130);
/// assert_eq!(Uid::from_raw(uid.raw()), uid);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub u64);

impl Uid {
    /// Pack a page number and an in-page offset.
    #[inline]
    pub fn new(page_id: PageId, offset: u16) -> Self {
        Uid(((page_id.0 as u64) << 32) | offset as u64)
    }

    /// Wrap a raw 64-bit value read from disk.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Uid(raw)
    }

    /// The raw 64-bit value.
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId::new((self.0 >> 32) as u32)
    }

    #[inline]
    pub fn offset(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({}:{})", self.page_id().0, self.offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_packing() {
        let uid = Uid::new(PageId::new(0xDEAD_BEEF), 0x1234);
        assert_eq!(uid.raw(), 0xDEAD_BEEF_0000_1234);
        assert_eq!(uid.page_id().0, 0xDEAD_BEEF);
        assert_eq!(uid.offset(), 0x1234);
    }

    #[test]
    fn test_uid_ignores_reserved_bits() {
        let uid = Uid::from_raw(0x0000_0002_FFFF_0010);
        assert_eq!(uid.page_id(), PageId::new(2));
        assert_eq!(uid.offset(), 0x0010);
    }

    #[test]
    fn test_uid_display() {
        assert_eq!(format!("{}", Uid::new(PageId::new(3), 2)), "Uid(3:2)");
    }
}
