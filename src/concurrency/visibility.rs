//! Visibility rules.
//!
//! Whether transaction `t` sees version `e` depends only on `e.xmin`,
//! `e.xmax`, the durable status of those two transactions, and for
//! repeatable read, `t`'s snapshot.

use crate::common::Xid;
use crate::concurrency::{IsolationLevel, Transaction, TransactionManager};

/// The creator and deleter stamps of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamps {
    pub xmin: Xid,
    pub xmax: Xid,
}

/// Whether `t` sees a version stamped `e`.
pub fn is_visible(tm: &TransactionManager, t: &Transaction, e: Stamps) -> bool {
    match t.level {
        IsolationLevel::ReadCommitted => read_committed(tm, t, e),
        IsolationLevel::RepeatableRead => repeatable_read(tm, t, e),
    }
}

fn read_committed(tm: &TransactionManager, t: &Transaction, e: Stamps) -> bool {
    if e.xmin == t.xid && e.xmax == 0 {
        return true;
    }

    tm.is_committed(e.xmin)
        && (e.xmax == 0 || (e.xmax != t.xid && !tm.is_committed(e.xmax)))
}

fn repeatable_read(tm: &TransactionManager, t: &Transaction, e: Stamps) -> bool {
    if e.xmin == t.xid && e.xmax == 0 {
        return true;
    }

    if !(tm.is_committed(e.xmin) && e.xmin < t.xid && !t.in_snapshot(e.xmin)) {
        return false;
    }
    if e.xmax == 0 {
        return true;
    }
    e.xmax != t.xid
        && (!tm.is_committed(e.xmax) || e.xmax > t.xid || t.in_snapshot(e.xmax))
}

/// Whether deleting `e` would let `t` skip a version it never saw.
///
/// Only repeatable read can skip: read committed always sees the latest
/// committed version.
pub fn is_version_skip(tm: &TransactionManager, t: &Transaction, e: Stamps) -> bool {
    if t.level == IsolationLevel::ReadCommitted {
        return false;
    }
    tm.is_committed(e.xmax) && (e.xmax > t.xid || t.in_snapshot(e.xmax))
}
