//! Reference-counted cache.
//!
//! [`RefCountCache`] caches items loaded from a [`CacheSource`] and keeps each
//! one resident for exactly as long as callers hold references to it. There
//! is no replacement policy: an item is evicted (and written back) the moment
//! its last reference is released.
//!
//! ```text
//!   get(k) ──▶ hit?  ──yes──▶ refs[k] += 1
//!               │
//!               no ──▶ loading(k)? ──yes──▶ wait on condvar, retry
//!               │
//!               no ──▶ full? ──yes──▶ Error::CacheFull
//!               │
//!               no ──▶ mark loading, unlock, source.fetch(k), relock
//!
//!   release(k) ──▶ refs[k] -= 1 ──▶ 0? ──▶ evict, source.write_back(item)
//! ```
//!
//! The page cache and the version manager's entry cache are both built on it.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::buffer::CacheStats;
use crate::common::{Error, Result};

/// Where a [`RefCountCache`] loads items from and writes them back to.
pub trait CacheSource: Send + Sync {
    type Key: Copy + Eq + Hash + Debug + Send;
    type Item: Send + Sync;

    /// Load the item for `key`. Called without the cache lock held.
    fn fetch(&self, key: Self::Key) -> Result<Arc<Self::Item>>;

    /// Persist or release an evicted item. Called with the cache lock held.
    fn write_back(&self, item: &Self::Item) -> Result<()>;
}

struct CacheState<K, V> {
    items: HashMap<K, Arc<V>>,
    refs: HashMap<K, usize>,
    loading: HashSet<K>,
    /// Resident plus in-flight items, checked against capacity.
    count: usize,
}

/// A keyed cache with caller-managed lifetimes.
///
/// Every successful [`get`](Self::get) must be paired with one
/// [`release`](Self::release).
///
/// # Thread Safety
/// - `state`: one `Mutex` around all maps, held only for bookkeeping and
///   write-back, never across `fetch`
/// - `loaded`: `Condvar` signalled whenever a fetch finishes
pub struct RefCountCache<S: CacheSource> {
    source: S,
    /// Maximum resident items; 0 means unbounded.
    capacity: usize,
    state: Mutex<CacheState<S::Key, S::Item>>,
    loaded: Condvar,
    stats: CacheStats,
}

impl<S: CacheSource> RefCountCache<S> {
    pub fn new(source: S, capacity: usize) -> Self {
        Self {
            source,
            capacity,
            state: Mutex::new(CacheState {
                items: HashMap::new(),
                refs: HashMap::new(),
                loading: HashSet::new(),
                count: 0,
            }),
            loaded: Condvar::new(),
            stats: CacheStats::new(),
        }
    }

    /// Get the item for `key`, loading it on a miss.
    ///
    /// If another thread is already loading the same key, blocks until that
    /// load finishes and then retries.
    ///
    /// # Errors
    /// - `Error::CacheFull` if the cache is at capacity
    /// - whatever the source's `fetch` returns
    pub fn get(&self, key: S::Key) -> Result<Arc<S::Item>> {
        let mut state = self.state.lock();
        loop {
            if state.loading.contains(&key) {
                self.loaded.wait(&mut state);
                continue;
            }

            if let Some(item) = state.items.get(&key).cloned() {
                *state.refs.entry(key).or_insert(0) += 1;
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(item);
            }

            if self.capacity > 0 && state.count >= self.capacity {
                return Err(Error::CacheFull);
            }
            state.count += 1;
            state.loading.insert(key);
            break;
        }
        drop(state);

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let fetched = self.source.fetch(key);

        let mut state = self.state.lock();
        state.loading.remove(&key);
        let result = match fetched {
            Ok(item) => {
                state.items.insert(key, Arc::clone(&item));
                state.refs.insert(key, 1);
                Ok(item)
            }
            Err(e) => {
                state.count -= 1;
                self.stats.fetch_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        };
        drop(state);
        self.loaded.notify_all();

        result
    }

    /// Drop one reference to `key`, evicting it when none remain.
    ///
    /// Releasing a key that is not resident is a no-op.
    pub fn release(&self, key: S::Key) -> Result<()> {
        let mut state = self.state.lock();
        let remaining = match state.refs.get_mut(&key) {
            Some(refs) => {
                *refs -= 1;
                *refs
            }
            None => return Ok(()),
        };
        if remaining > 0 {
            return Ok(());
        }

        state.refs.remove(&key);
        state.count -= 1;
        match state.items.remove(&key) {
            Some(item) => {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                self.source.write_back(&item)
            }
            None => Ok(()),
        }
    }

    /// Evict every resident item regardless of reference counts.
    ///
    /// Every item is written back even if an earlier write-back fails; the
    /// first error is returned.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let items: Vec<_> = state.items.drain().map(|(_, item)| item).collect();
        state.refs.clear();
        state.count = state.loading.len();

        let mut first_err = None;
        for item in items {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.source.write_back(&item) {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The source items are loaded from.
    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Current reference count of `key` (0 if not resident).
    pub fn ref_count(&self, key: S::Key) -> usize {
        self.state.lock().refs.get(&key).copied().unwrap_or(0)
    }

    /// Number of resident items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

// ============================================================================
// TESTS
// ============================================================================
