//! DataItem - one variable-length record on a data page.
//!
//! # Layout
//! ```text
//! ┌───────────┬──────────┬──────────────────────┐
//! │ valid (1) │ size (2) │ payload (size bytes) │
//! └───────────┴──────────┴──────────────────────┘
//! ```
//!
//! A valid byte of 0 means live; 1 means logically deleted. Items are never
//! moved or physically removed.
//!
//! # Mutation Protocol
//! ```ignore
//! let mut edit = item.before();          // exclusive lock, page dirty, snapshot
//! edit.data_mut()[0..8].copy_from_slice(&xmax.to_be_bytes());
//! edit.after(xid)?;                      // log old/new, unlock
//! ```
//! Dropping the edit without calling `after` restores the snapshot and
//! unlocks without logging.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::buffer::Page;
use crate::common::{codec, Error, Result, Uid, Xid};
use crate::recovery::log_record;
use crate::recovery::Wal;

const OF_VALID: usize = 0;
const OF_SIZE: usize = 1;
/// Header bytes before the payload.
pub const OF_DATA: usize = 3;

const VALID: u8 = 0;
const INVALID: u8 = 1;

/// Frame `payload` as a new, valid item.
pub fn wrap(payload: &[u8]) -> Vec<u8> {
    let mut raw = vec![0u8; OF_DATA + payload.len()];
    raw[OF_VALID] = VALID;
    codec::put_u16(&mut raw, OF_SIZE, payload.len() as u16);
    raw[OF_DATA..].copy_from_slice(payload);
    raw
}

/// Mark a raw item image as deleted.
pub fn set_invalid(raw: &mut [u8]) {
    raw[OF_VALID] = INVALID;
}

/// A cached record, pinning the page it lives on.
pub struct DataItem {
    uid: Uid,
    page: Arc<Page>,
    /// Position of the item (its valid byte) within the page.
    offset: usize,
    /// Whole item length, header included.
    len: usize,
    lock: RwLock<()>,
    wal: Arc<Wal>,
}

impl DataItem {
    /// Parse the item at `uid`'s offset on `page`.
    ///
    /// # Errors
    /// Returns `Error::CorruptRecord` if the item would run off the page.
    pub(crate) fn parse(uid: Uid, page: Arc<Page>, wal: Arc<Wal>) -> Result<Self> {
        let offset = uid.offset() as usize;
        let len = {
            let data = page.read();
            let raw = data.as_slice();
            if offset + OF_DATA > raw.len() {
                return Err(Error::CorruptRecord(format!("{} starts past page end", uid)));
            }
            let len = OF_DATA + codec::get_u16(raw, offset + OF_SIZE) as usize;
            if offset + len > raw.len() {
                return Err(Error::CorruptRecord(format!("{} runs past page end", uid)));
            }
            len
        };

        Ok(Self {
            uid,
            page,
            offset,
            len,
            lock: RwLock::new(()),
            wal,
        })
    }

    #[inline]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    #[inline]
    pub(crate) fn page(&self) -> &Arc<Page> {
        &self.page
    }

    fn raw_range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    fn data_range(&self) -> Range<usize> {
        self.offset + OF_DATA..self.offset + self.len
    }

    pub fn is_valid(&self) -> bool {
        self.page.read().as_slice()[self.offset + OF_VALID] == VALID
    }

    /// Payload length in bytes.
    pub fn data_len(&self) -> usize {
        self.len - OF_DATA
    }

    /// Copy of the payload, taken under the shared lock.
    pub fn data(&self) -> Vec<u8> {
        self.read_data(|data| data.to_vec())
    }

    /// Run `f` over the payload under the shared lock.
    pub fn read_data<T>(&self, f: impl FnOnce(&[u8]) -> T) -> T {
        let _guard = self.lock.read();
        let page = self.page.read();
        f(&page.as_slice()[self.data_range()])
    }

    fn raw_copy(&self) -> Vec<u8> {
        self.page.read().as_slice()[self.raw_range()].to_vec()
    }

    /// Start an edit: take the exclusive lock, mark the page dirty and
    /// snapshot the current bytes.
    pub fn before(&self) -> DataItemEdit<'_> {
        let guard = self.lock.write();
        self.page.mark_dirty();
        let old_raw = self.raw_copy();
        DataItemEdit {
            item: self,
            _guard: guard,
            old_raw,
            finished: false,
        }
    }
}

impl std::fmt::Debug for DataItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataItem")
            .field("uid", &self.uid)
            .field("len", &self.len)
            .finish()
    }
}

/// An in-progress edit of a [`DataItem`].
///
/// Holds the item's exclusive lock until [`after`](Self::after) succeeds or
/// the edit is dropped. A dropped edit puts the snapshot back.
pub struct DataItemEdit<'a> {
    item: &'a DataItem,
    _guard: RwLockWriteGuard<'a, ()>,
    old_raw: Vec<u8>,
    finished: bool,
}

impl<'a> DataItemEdit<'a> {
    /// The payload as currently edited.
    pub fn data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        let range = self.item.data_range();
        RwLockReadGuard::map(self.item.page.read(), move |p| &p.as_slice()[range])
    }

    /// Mutable view of the payload.
    pub fn data_mut(&mut self) -> MappedRwLockWriteGuard<'_, [u8]> {
        let range = self.item.data_range();
        RwLockWriteGuard::map(self.item.page.write(), move |p| {
            &mut p.as_mut_slice()[range]
        })
    }

    /// Log the edit under `xid` and release the lock.
    ///
    /// If logging fails the snapshot is restored before the error returns.
    pub fn after(mut self, xid: Xid) -> Result<()> {
        let new_raw = self.item.raw_copy();
        let record = log_record::encode_update(xid, self.item.uid, &self.old_raw, &new_raw);
        self.item.wal.log(&record)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for DataItemEdit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let range = self.item.raw_range();
            self.item.page.write().as_mut_slice()[range].copy_from_slice(&self.old_raw);
        }
    }
}
