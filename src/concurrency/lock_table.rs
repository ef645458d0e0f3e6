//! Lock table with deadlock detection.
//!
//! Records which transaction holds each uid and who waits for it, forming a
//! wait-for graph:
//!
//! ```text
//!   T1 ──waits for──▶ uid A ──held by──▶ T2
//!   T2 ──waits for──▶ uid B ──held by──▶ T1     ← cycle: deadlock
//! ```
//!
//! Each transaction waits for at most one uid at a time, so every path in
//! the graph is a simple chain and cycle detection is a walk along it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::common::{Error, Result, Uid, Xid};

/// A pending lock request. [`wait`](Self::wait) blocks until it is granted.
#[derive(Debug, Default)]
pub struct LockWaiter {
    granted: Mutex<bool>,
    cond: Condvar,
}

impl LockWaiter {
    fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is handed over.
    pub fn wait(&self) {
        let mut granted = self.granted.lock();
        while !*granted {
            self.cond.wait(&mut granted);
        }
    }

    pub fn is_granted(&self) -> bool {
        *self.granted.lock()
    }

    fn grant(&self) {
        *self.granted.lock() = true;
        self.cond.notify_all();
    }
}

#[derive(Default)]
struct LockState {
    /// Uids each transaction holds.
    x2u: HashMap<Xid, Vec<Uid>>,
    /// Holder of each uid.
    u2x: HashMap<Uid, Xid>,
    /// Transactions waiting for each uid, oldest first.
    wait: HashMap<Uid, VecDeque<Xid>>,
    /// The uid each waiting transaction wants.
    wait_u: HashMap<Xid, Uid>,
    /// Handle each waiting transaction blocks on.
    waiters: HashMap<Xid, Arc<LockWaiter>>,
    /// Detection-run stamp per visited transaction.
    stamps: HashMap<Xid, u64>,
}

impl LockState {
    fn holds(&self, xid: Xid, uid: Uid) -> bool {
        self.x2u.get(&xid).is_some_and(|uids| uids.contains(&uid))
    }

    fn grant(&mut self, xid: Xid, uid: Uid) {
        self.u2x.insert(uid, xid);
        self.x2u.entry(xid).or_default().push(uid);
    }

    fn has_deadlock(&mut self) -> bool {
        self.stamps.clear();
        let mut stamp = 1;
        let holders: Vec<Xid> = self.x2u.keys().copied().collect();
        for xid in holders {
            if self.stamps.get(&xid).is_some_and(|&s| s > 0) {
                continue;
            }
            stamp += 1;
            if self.reaches_cycle(xid, stamp) {
                return true;
            }
        }
        false
    }

    /// Follow the wait chain from `xid`, stamping each step with `stamp`.
    fn reaches_cycle(&mut self, mut xid: Xid, stamp: u64) -> bool {
        loop {
            match self.stamps.get(&xid) {
                Some(&s) if s == stamp => return true,
                Some(&s) if s < stamp => return false,
                _ => {}
            }
            self.stamps.insert(xid, stamp);

            let Some(uid) = self.wait_u.get(&xid) else {
                return false;
            };
            let Some(&holder) = self.u2x.get(uid) else {
                return false;
            };
            xid = holder;
        }
    }

    fn remove_from_queue(&mut self, uid: Uid, xid: Xid) {
        if let Some(queue) = self.wait.get_mut(&uid) {
            queue.retain(|&x| x != xid);
            if queue.is_empty() {
                self.wait.remove(&uid);
            }
        }
    }

    /// Hand `uid` to the oldest waiter still waiting, or free it.
    fn select_new_holder(&mut self, uid: Uid) {
        self.u2x.remove(&uid);
        let Some(mut queue) = self.wait.remove(&uid) else {
            return;
        };

        while let Some(xid) = queue.pop_front() {
            if let Some(waiter) = self.waiters.remove(&xid) {
                self.grant(xid, uid);
                self.wait_u.remove(&xid);
                waiter.grant();
                debug!(xid, %uid, "lock handed over");
                break;
            }
        }

        if !queue.is_empty() {
            self.wait.insert(uid, queue);
        }
    }
}

/// Per-uid exclusive locks held until the owning transaction ends.
pub struct LockTable {
    state: Mutex<LockState>,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
        }
    }

    /// Request `uid` for `xid`.
    ///
    /// Returns `None` if the lock is already held by `xid` or was free and is
    /// now granted. Returns a waiter to block on if another transaction holds
    /// it.
    ///
    /// # Errors
    /// Returns `Error::Deadlock` if waiting would close a cycle. Nothing is
    /// recorded in that case.
    pub fn add(&self, xid: Xid, uid: Uid) -> Result<Option<Arc<LockWaiter>>> {
        let mut state = self.state.lock();
        if state.holds(xid, uid) {
            return Ok(None);
        }
        if !state.u2x.contains_key(&uid) {
            state.grant(xid, uid);
            return Ok(None);
        }

        state.wait_u.insert(xid, uid);
        state.wait.entry(uid).or_default().push_back(xid);
        if state.has_deadlock() {
            state.wait_u.remove(&xid);
            state.remove_from_queue(uid, xid);
            warn!(xid, %uid, "deadlock detected");
            return Err(Error::Deadlock);
        }

        let waiter = Arc::new(LockWaiter::new());
        state.waiters.insert(xid, Arc::clone(&waiter));
        Ok(Some(waiter))
    }

    /// Release everything `xid` holds, waking the next waiter of each uid.
    pub fn remove(&self, xid: Xid) {
        let mut state = self.state.lock();
        if let Some(uids) = state.x2u.remove(&xid) {
            for uid in uids {
                state.select_new_holder(uid);
            }
        }

        if let Some(uid) = state.wait_u.remove(&xid) {
            state.remove_from_queue(uid, xid);
        }
        state.waiters.remove(&xid);
    }

    /// Current holder of `uid`.
    pub fn holder(&self, uid: Uid) -> Option<Xid> {
        self.state.lock().u2x.get(&uid).copied()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}
