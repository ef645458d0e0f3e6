//! Data pages (page 2 onward).
//!
//! # Layout
//! ```text
//! ┌────────────┬──────────┬──────────┬─────┬────────────────────┐
//! │ FSO (2)    │ record 1 │ record 2 │ ... │     free space     │
//! └────────────┴──────────┴──────────┴─────┴────────────────────┘
//! 0            2                           FSO               8192
//! ```
//!
//! Records are appended at the free-space offset (FSO) and never move, so a
//! record's offset is part of its permanent [`Uid`](crate::Uid).

use crate::buffer::Page;
use crate::common::codec;
use crate::common::config::PAGE_SIZE;
use crate::storage::page::PageData;

const OF_FREE: usize = 0;
/// First byte available to records.
pub const OF_DATA: usize = 2;
/// Free bytes on an empty data page.
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - OF_DATA;

/// Initial image of a data page: FSO pointing just past itself.
pub fn init_raw() -> PageData {
    let mut raw = PageData::new();
    set_fso(raw.as_mut_slice(), OF_DATA as u16);
    raw
}

fn set_fso(raw: &mut [u8], fso: u16) {
    codec::put_u16(raw, OF_FREE, fso);
}

fn get_fso(raw: &[u8]) -> u16 {
    codec::get_u16(raw, OF_FREE)
}

/// Current free-space offset of a page.
pub fn fso(page: &Page) -> u16 {
    get_fso(page.read().as_slice())
}

/// Bytes still free on a page.
pub fn free_space(page: &Page) -> usize {
    PAGE_SIZE - fso(page) as usize
}

/// Append `raw` at the FSO and advance it. Returns the record's offset.
///
/// The caller must have claimed the page through the free-space index and
/// checked that `raw` fits.
pub fn insert(page: &Page, raw: &[u8]) -> u16 {
    page.mark_dirty();
    let mut data = page.write();
    let buf = data.as_mut_slice();
    let offset = get_fso(buf);
    let start = offset as usize;
    buf[start..start + raw.len()].copy_from_slice(raw);
    set_fso(buf, (start + raw.len()) as u16);
    offset
}

/// Write `raw` at `offset` during recovery, extending the FSO past it.
pub fn recover_insert(page: &Page, raw: &[u8], offset: u16) {
    page.mark_dirty();
    let mut data = page.write();
    let buf = data.as_mut_slice();
    let start = offset as usize;
    buf[start..start + raw.len()].copy_from_slice(raw);

    let end = (start + raw.len()) as u16;
    if get_fso(buf) < end {
        set_fso(buf, end);
    }
}

/// Overwrite `raw` at `offset` during recovery. The FSO is left alone.
pub fn recover_update(page: &Page, raw: &[u8], offset: u16) {
    page.mark_dirty();
    let start = offset as usize;
    page.write().as_mut_slice()[start..start + raw.len()].copy_from_slice(raw);
}
