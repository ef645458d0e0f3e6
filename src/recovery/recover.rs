//! Crash recovery.
//!
//! Runs when page 1's validity marker shows the last run did not close
//! cleanly. Only the log is trusted; page contents are overwritten from it.
//!
//! ```text
//! 1. scan    find the highest page the log mentions, truncate the file there
//! 2. redo    replay every entry of a committed or aborted transaction, in order
//! 3. undo    roll back every still-active transaction, newest entry first,
//!            then mark it aborted
//! ```

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::buffer::PageCache;
use crate::common::{Result, Xid};
use crate::concurrency::TransactionManager;
use crate::data::data_item;
use crate::recovery::{LogRecord, Wal};
use crate::storage::page::page_x;

/// Replay `wal` against `pages` so that committed work is present and
/// in-flight work is gone.
pub fn recover(tm: &TransactionManager, wal: &Wal, pages: &PageCache) -> Result<()> {
    info!("recovery started");

    let max_page = max_page_no(wal)?;
    pages.truncate_by_page_no(max_page)?;
    info!(pages = max_page, "truncated database file");

    let redone = redo(tm, wal, pages)?;
    info!(records = redone, "redo finished");

    let undone = undo(tm, wal, pages)?;
    info!(transactions = undone, "undo finished");

    info!("recovery finished");
    Ok(())
}

/// Highest page number any entry refers to, at least 1.
fn max_page_no(wal: &Wal) -> Result<u32> {
    wal.rewind();
    let mut max_page = 1;
    while let Some(data) = wal.next()? {
        let record = LogRecord::decode(&data)?;
        max_page = max_page.max(record.page_id().0);
    }
    Ok(max_page)
}

fn redo(tm: &TransactionManager, wal: &Wal, pages: &PageCache) -> Result<usize> {
    wal.rewind();
    let mut count = 0;
    while let Some(data) = wal.next()? {
        let record = LogRecord::decode(&data)?;
        if !tm.is_active(record.xid()) {
            apply(pages, &record, Direction::Redo)?;
            count += 1;
        }
    }
    Ok(count)
}

fn undo(tm: &TransactionManager, wal: &Wal, pages: &PageCache) -> Result<usize> {
    wal.rewind();
    let mut active: BTreeMap<Xid, Vec<LogRecord>> = BTreeMap::new();
    while let Some(data) = wal.next()? {
        let record = LogRecord::decode(&data)?;
        if tm.is_active(record.xid()) {
            active.entry(record.xid()).or_default().push(record);
        }
    }

    let count = active.len();
    for (xid, records) in active {
        for record in records.iter().rev() {
            apply(pages, record, Direction::Undo)?;
        }
        tm.abort(xid)?;
        debug!(xid, records = records.len(), "rolled back transaction");
    }
    Ok(count)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Redo,
    Undo,
}

/// Write one record's effect onto its live page.
fn apply(pages: &PageCache, record: &LogRecord, direction: Direction) -> Result<()> {
    let page = pages.get_page(record.page_id())?;
    match record {
        LogRecord::Insert { offset, raw, .. } => match direction {
            Direction::Redo => page_x::recover_insert(&page, raw, *offset),
            Direction::Undo => {
                let mut raw = raw.clone();
                data_item::set_invalid(&mut raw);
                page_x::recover_insert(&page, &raw, *offset);
            }
        },
        LogRecord::Update {
            uid,
            old_raw,
            new_raw,
            ..
        } => {
            let raw = match direction {
                Direction::Redo => new_raw,
                Direction::Undo => old_raw,
            };
            page_x::recover_update(&page, raw, uid.offset());
        }
    }
    pages.release(&page)
}
