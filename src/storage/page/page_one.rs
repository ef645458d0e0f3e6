//! Page 1 - the startup-validity marker.
//!
//! ```text
//! 0           100          108          116                 8192
//! ┌───────────┬────────────┬────────────┬───────────────────┐
//! │  unused   │ open mark  │ close mark │      unused       │
//! └───────────┴────────────┴────────────┴───────────────────┘
//! ```
//!
//! Opening the database writes fresh random bytes to the open mark; a clean
//! close copies them to the close mark. The marks differ at the next open
//! exactly when the previous run did not shut down cleanly.

use rand::RngCore;

use crate::buffer::Page;
use crate::storage::page::PageData;

const OF_VC: usize = 100;
const LEN_VC: usize = 8;

/// Initial image of page 1, with a fresh open mark.
pub fn init_raw() -> PageData {
    let mut raw = PageData::new();
    fill_open_mark(raw.as_mut_slice());
    raw
}

/// Stamp a fresh open mark. Called on every successful open.
pub fn set_vc_open(page: &Page) {
    page.mark_dirty();
    fill_open_mark(page.write().as_mut_slice());
}

/// Copy the open mark to the close mark. Called on clean shutdown.
pub fn set_vc_close(page: &Page) {
    page.mark_dirty();
    page.write()
        .as_mut_slice()
        .copy_within(OF_VC..OF_VC + LEN_VC, OF_VC + LEN_VC);
}

/// Whether the last run shut down cleanly.
pub fn check_vc(page: &Page) -> bool {
    let data = page.read();
    let raw = data.as_slice();
    raw[OF_VC..OF_VC + LEN_VC] == raw[OF_VC + LEN_VC..OF_VC + 2 * LEN_VC]
}

fn fill_open_mark(raw: &mut [u8]) {
    rand::thread_rng().fill_bytes(&mut raw[OF_VC..OF_VC + LEN_VC]);
}
