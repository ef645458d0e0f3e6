//! In-memory transaction state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Error, Xid, SUPER_XID};

/// How much of other transactions' work a transaction sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum IsolationLevel {
    /// Sees everything committed so far, at each read.
    #[default]
    ReadCommitted = 0,
    /// Sees only what was committed before it began.
    RepeatableRead = 1,
}

impl IsolationLevel {
    /// Map the numeric levels used by clients (0 or 1).
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(IsolationLevel::ReadCommitted),
            1 => Some(IsolationLevel::RepeatableRead),
            _ => None,
        }
    }
}

/// Why a transaction was aborted on its owner's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Deadlock,
    ConcurrentUpdate,
}

impl From<AbortReason> for Error {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::Deadlock => Error::Deadlock,
            AbortReason::ConcurrentUpdate => Error::ConcurrentUpdate,
        }
    }
}

#[derive(Debug, Default)]
struct TxnState {
    error: Option<AbortReason>,
    auto_aborted: bool,
}

/// An active transaction.
#[derive(Debug)]
pub struct Transaction {
    pub xid: Xid,
    pub level: IsolationLevel,
    /// Transactions active when this one began. Empty for read-committed.
    snapshot: HashSet<Xid>,
    state: Mutex<TxnState>,
}

impl Transaction {
    /// Build a transaction, snapshotting `active` for repeatable read.
    pub fn new(xid: Xid, level: IsolationLevel, active: &HashMap<Xid, Arc<Transaction>>) -> Self {
        let snapshot = match level {
            IsolationLevel::ReadCommitted => HashSet::new(),
            IsolationLevel::RepeatableRead => active
                .keys()
                .copied()
                .filter(|&x| x != SUPER_XID)
                .collect(),
        };
        Self {
            xid,
            level,
            snapshot,
            state: Mutex::new(TxnState::default()),
        }
    }

    /// The super transaction: read-committed, never aborted.
    pub fn super_transaction() -> Self {
        Self::new(SUPER_XID, IsolationLevel::ReadCommitted, &HashMap::new())
    }

    pub fn in_snapshot(&self, xid: Xid) -> bool {
        xid != SUPER_XID && self.snapshot.contains(&xid)
    }

    /// The error this transaction was aborted with, if any.
    pub fn error(&self) -> Option<AbortReason> {
        self.state.lock().error
    }

    pub(crate) fn set_error(&self, reason: AbortReason) {
        self.state.lock().error = Some(reason);
    }

    /// Fail with the stored abort reason, if any.
    pub fn check(&self) -> Result<(), Error> {
        match self.error() {
            Some(reason) => Err(reason.into()),
            None => Ok(()),
        }
    }

    pub fn is_auto_aborted(&self) -> bool {
        self.state.lock().auto_aborted
    }

    /// Mark as auto-aborted; returns whether it already was.
    pub(crate) fn mark_auto_aborted(&self) -> bool {
        std::mem::replace(&mut self.state.lock().auto_aborted, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_only_for_repeatable_read() {
        let mut active = HashMap::new();
        active.insert(SUPER_XID, Arc::new(Transaction::super_transaction()));
        active.insert(
            4,
            Arc::new(Transaction::new(4, IsolationLevel::ReadCommitted, &HashMap::new())),
        );

        let rc = Transaction::new(5, IsolationLevel::ReadCommitted, &active);
        assert!(!rc.in_snapshot(4));

        let rr = Transaction::new(5, IsolationLevel::RepeatableRead, &active);
        assert!(rr.in_snapshot(4));
        assert!(!rr.in_snapshot(SUPER_XID));
    }

    #[test]
    fn test_error_and_auto_abort() {
        let t = Transaction::super_transaction();
        assert!(t.check().is_ok());

        t.set_error(AbortReason::Deadlock);
        assert!(matches!(t.check(), Err(Error::Deadlock)));

        assert!(!t.mark_auto_aborted());
        assert!(t.mark_auto_aborted());
        assert!(t.is_auto_aborted());
    }

    #[test]
    fn test_isolation_from_level() {
        assert_eq!(
            IsolationLevel::from_level(0),
            Some(IsolationLevel::ReadCommitted)
        );
        assert_eq!(
            IsolationLevel::from_level(1),
            Some(IsolationLevel::RepeatableRead)
        );
        assert_eq!(IsolationLevel::from_level(2), None);
    }
}
