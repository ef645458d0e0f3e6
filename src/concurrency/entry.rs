//! Entry - one version of a logical record.
//!
//! ```text
//! ┌───────────┬───────────┬──────────────┐
//! │ xmin (8)  │ xmax (8)  │ data ...     │
//! └───────────┴───────────┴──────────────┘
//! ```
//!
//! `xmin` is the creating transaction and never changes. `xmax` is the
//! deleting transaction, 0 until set exactly once.

use std::sync::Arc;

use crate::common::{codec, Result, Uid, Xid};
use crate::concurrency::visibility::Stamps;
use crate::data::DataItem;

const OF_XMIN: usize = 0;
const OF_XMAX: usize = OF_XMIN + 8;
const OF_DATA: usize = OF_XMAX + 8;

/// Frame `data` as a fresh version created by `xid`.
pub fn wrap(xid: Xid, data: &[u8]) -> Vec<u8> {
    let mut raw = vec![0u8; OF_DATA + data.len()];
    codec::put_u64(&mut raw, OF_XMIN, xid);
    raw[OF_DATA..].copy_from_slice(data);
    raw
}

/// A cached version, backed by the data item that stores it.
pub struct Entry {
    uid: Uid,
    item: Arc<DataItem>,
}

impl Entry {
    pub(crate) fn new(uid: Uid, item: Arc<DataItem>) -> Self {
        Self { uid, item }
    }

    #[inline]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub(crate) fn item(&self) -> &DataItem {
        &self.item
    }

    pub fn xmin(&self) -> Xid {
        self.item.read_data(|raw| codec::get_u64(raw, OF_XMIN))
    }

    pub fn xmax(&self) -> Xid {
        self.item.read_data(|raw| codec::get_u64(raw, OF_XMAX))
    }

    /// Both stamps, read under one shared lock.
    pub fn stamps(&self) -> Stamps {
        self.item.read_data(|raw| Stamps {
            xmin: codec::get_u64(raw, OF_XMIN),
            xmax: codec::get_u64(raw, OF_XMAX),
        })
    }

    /// Copy of the user data.
    pub fn data(&self) -> Vec<u8> {
        self.item.read_data(|raw| raw[OF_DATA..].to_vec())
    }

    /// Stamp `xid` as the deleter, logged under `xid`.
    pub fn set_xmax(&self, xid: Xid) -> Result<()> {
        let mut edit = self.item.before();
        codec::put_u64(&mut edit.data_mut(), OF_XMAX, xid);
        edit.after(xid)
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("uid", &self.uid)
            .field("xmin", &self.xmin())
            .field("xmax", &self.xmax())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_layout() {
        let raw = wrap(3, b"abc");
        assert_eq!(&raw[0..8], &3u64.to_be_bytes());
        assert_eq!(&raw[8..16], &[0; 8]);
        assert_eq!(&raw[16..], b"abc");
    }
}
