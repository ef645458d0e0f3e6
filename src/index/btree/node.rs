//! B+Tree node - the decoded form of one tree record.
//!
//! # Layout
//! ```text
//! ┌──────────┬───────────┬─────────────┬──────────┬──────────┬─────┐
//! │ leaf (1) │ count (2) │ sibling (8) │ son0 (8) │ key0 (8) │ ... │
//! └──────────┴───────────┴─────────────┴──────────┴──────────┴─────┘
//! ```
//!
//! Every node is stored at the full [`NODE_SIZE`] so it can be rewritten in
//! place. A leaf pairs each key with the uid of the record it indexes. An
//! internal node pairs each key with the child covering keys strictly below
//! it; the rightmost key of the rightmost internal node is `u64::MAX`.

use crate::common::{codec, Error, Result, Uid};

/// Half the key capacity of a node.
pub const BALANCE: usize = 32;
/// A node splits once it holds this many keys.
pub const MAX_KEYS: usize = BALANCE * 2;
/// Room for the split trigger plus one in-flight insertion.
const SLOTS: usize = MAX_KEYS + 2;

const OF_LEAF: usize = 0;
const OF_COUNT: usize = OF_LEAF + 1;
const OF_SIBLING: usize = OF_COUNT + 2;
const OF_SLOTS: usize = OF_SIBLING + 8;
const SLOT_SIZE: usize = 16;

/// Encoded size of every node.
pub const NODE_SIZE: usize = OF_SLOTS + SLOTS * SLOT_SIZE;

/// Where an internal-node lookup continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Child(Uid),
    /// The key lies beyond this node; continue at its right sibling.
    Sibling(Uid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub leaf: bool,
    pub keys: Vec<u64>,
    pub sons: Vec<u64>,
    /// Raw uid of the right neighbour, 0 for none.
    pub sibling: u64,
}

impl Node {
    /// An empty leaf, the root of a fresh tree.
    pub fn nil_root() -> Self {
        Self {
            leaf: true,
            keys: Vec::new(),
            sons: Vec::new(),
            sibling: 0,
        }
    }

    /// An internal root over `left` and `right`, split at `right_key`.
    pub fn new_root(left: Uid, right: Uid, right_key: u64) -> Self {
        Self {
            leaf: false,
            keys: vec![right_key, u64::MAX],
            sons: vec![left.raw(), right.raw()],
            sibling: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < NODE_SIZE {
            return Err(Error::CorruptRecord(format!(
                "tree node is {} bytes, expected {NODE_SIZE}",
                raw.len()
            )));
        }

        let count = codec::get_u16(raw, OF_COUNT) as usize;
        if count > SLOTS {
            return Err(Error::CorruptRecord(format!(
                "tree node claims {count} keys, at most {SLOTS} fit"
            )));
        }

        let mut keys = Vec::with_capacity(count);
        let mut sons = Vec::with_capacity(count);
        for i in 0..count {
            let at = OF_SLOTS + i * SLOT_SIZE;
            sons.push(codec::get_u64(raw, at));
            keys.push(codec::get_u64(raw, at + 8));
        }

        Ok(Self {
            leaf: raw[OF_LEAF] == 1,
            keys,
            sons,
            sibling: codec::get_u64(raw, OF_SIBLING),
        })
    }

    /// Encode into exactly [`NODE_SIZE`] bytes.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.keys.len() <= SLOTS);
        debug_assert_eq!(self.keys.len(), self.sons.len());

        let mut raw = vec![0u8; NODE_SIZE];
        raw[OF_LEAF] = u8::from(self.leaf);
        codec::put_u16(&mut raw, OF_COUNT, self.keys.len() as u16);
        codec::put_u64(&mut raw, OF_SIBLING, self.sibling);
        for (i, (&son, &key)) in self.sons.iter().zip(&self.keys).enumerate() {
            let at = OF_SLOTS + i * SLOT_SIZE;
            codec::put_u64(&mut raw, at, son);
            codec::put_u64(&mut raw, at + 8, key);
        }
        raw
    }

    /// Pick the child of an internal node that covers `key`.
    ///
    /// The child is the one whose key is the first strictly greater than
    /// `key`, so equal keys descend to the right.
    pub fn search_next(&self, key: u64) -> Next {
        if let Some(i) = self.keys.iter().position(|&k| key < k) {
            return Next::Child(Uid::from_raw(self.sons[i]));
        }
        if self.sibling != 0 {
            return Next::Sibling(Uid::from_raw(self.sibling));
        }
        // Only `u64::MAX` itself gets here.
        Next::Child(Uid::from_raw(self.sons.last().copied().unwrap_or(0)))
    }

    /// Pick the leftmost child of an internal node that may hold `lo`.
    ///
    /// A child holds keys up to and including its separator, so runs of a
    /// duplicate key can end in the child left of an equal separator.
    pub fn range_start(&self, lo: u64) -> Next {
        match self.keys.iter().position(|&k| k >= lo) {
            Some(i) => Next::Child(Uid::from_raw(self.sons[i])),
            None if self.sibling != 0 => Next::Sibling(Uid::from_raw(self.sibling)),
            None => Next::Child(Uid::from_raw(self.sons.last().copied().unwrap_or(0))),
        }
    }

    /// Uids in this leaf with keys in `lo..=hi`, plus the sibling to continue
    /// at if the range may extend past this leaf (0 if not).
    pub fn leaf_search_range(&self, lo: u64, hi: u64) -> (Vec<Uid>, u64) {
        let start = self.keys.partition_point(|&k| k < lo);
        let mut uids = Vec::new();
        let mut kth = start;
        while kth < self.keys.len() && self.keys[kth] <= hi {
            uids.push(Uid::from_raw(self.sons[kth]));
            kth += 1;
        }

        let next = if kth == self.keys.len() { self.sibling } else { 0 };
        (uids, next)
    }

    /// Insert `(son, key)` in key order.
    ///
    /// Returns false if `key` belongs to the right sibling instead. In an
    /// internal node `son` is a freshly split-off child covering keys from
    /// `key` up to the old separator.
    pub fn insert(&mut self, son: u64, key: u64) -> bool {
        let kth = self.keys.partition_point(|&k| k < key);
        if kth == self.keys.len() && self.sibling != 0 {
            return false;
        }

        if self.leaf {
            self.keys.insert(kth, key);
            self.sons.insert(kth, son);
        } else if kth == self.keys.len() {
            self.keys.push(key);
            self.sons.push(son);
        } else {
            let separator = std::mem::replace(&mut self.keys[kth], key);
            self.keys.insert(kth + 1, separator);
            self.sons.insert(kth + 1, son);
        }
        true
    }

    pub fn needs_split(&self) -> bool {
        self.keys.len() >= MAX_KEYS
    }

    /// Move the upper half into a new node that takes over this node's
    /// sibling. The caller links `self.sibling` to the new node once it has
    /// a uid.
    pub fn split_off(&mut self) -> Node {
        let keys = self.keys.split_off(BALANCE);
        let sons = self.sons.split_off(BALANCE);
        Node {
            leaf: self.leaf,
            keys,
            sons,
            sibling: self.sibling,
        }
    }
}
