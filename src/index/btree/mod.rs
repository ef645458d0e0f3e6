//! B+Tree index over `u64` keys.
//!
//! Every node is a data item written under the super transaction, so node
//! changes are logged and recovered like any other record. The tree is
//! addressed by a boot record holding the uid of the current root:
//!
//! ```text
//!   boot uid ──▶ [ root uid ] ──▶ root node
//!                                 ├──▶ internal ...
//!                                 └──▶ leaf ──sibling──▶ leaf ──▶ ...
//! ```
//!
//! A split writes the new right node before linking it as the left node's
//! sibling, then adds it to the parent. If a crash lands between those two
//! steps the new node is reachable only through the sibling link; search and
//! insert both follow sibling links, so the tree stays usable.
//!
//! There is no delete. Callers delete the indexed record itself and rely on
//! visibility to hide it.

mod node;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{codec, Error, Result, Uid, SUPER_XID};
use crate::data::{DataItem, DataManager};

pub use node::{Next, Node, BALANCE, MAX_KEYS, NODE_SIZE};

/// Outcome of trying to insert into one node.
enum Inserted {
    /// Written. Carries the split-off node and its first key, if any.
    Done(Option<(Uid, u64)>),
    /// The key belongs further right.
    MoveRight(Uid),
}

pub struct BPlusTree {
    dm: Arc<DataManager>,
    boot_uid: Uid,
    boot: Arc<DataItem>,
    boot_lock: Mutex<()>,
}

impl BPlusTree {
    /// Create an empty tree and return the uid of its boot record.
    pub fn create(dm: &DataManager) -> Result<Uid> {
        let root = dm.insert(SUPER_XID, &Node::nil_root().encode())?;
        let boot = dm.insert(SUPER_XID, &root.raw().to_be_bytes())?;
        debug!(%boot, %root, "created tree");
        Ok(boot)
    }

    /// Open the tree whose boot record lives at `boot_uid`.
    ///
    /// # Errors
    /// Returns `Error::CorruptRecord` if no valid boot record is there.
    pub fn load(boot_uid: Uid, dm: Arc<DataManager>) -> Result<Self> {
        let boot = dm
            .read(boot_uid)?
            .ok_or_else(|| Error::CorruptRecord(format!("no tree boot record at {boot_uid}")))?;
        if boot.data_len() != 8 {
            let len = boot.data_len();
            dm.release(&boot)?;
            return Err(Error::CorruptRecord(format!(
                "tree boot record at {boot_uid} is {len} bytes"
            )));
        }

        Ok(Self {
            dm,
            boot_uid,
            boot,
            boot_lock: Mutex::new(()),
        })
    }

    pub fn boot_uid(&self) -> Uid {
        self.boot_uid
    }

    /// Uid of the current root.
    pub fn root(&self) -> Uid {
        let _guard = self.boot_lock.lock();
        Uid::from_raw(self.boot.read_data(|raw| codec::get_u64(raw, 0)))
    }

    /// Uids of every record indexed under `key`.
    pub fn search(&self, key: u64) -> Result<Vec<Uid>> {
        self.search_range(key, key)
    }

    /// Uids of every record with a key in `lo..=hi`, in key order.
    pub fn search_range(&self, lo: u64, hi: u64) -> Result<Vec<Uid>> {
        if lo > hi {
            return Ok(Vec::new());
        }

        let mut leaf = self.search_leaf(self.root(), lo)?;
        let mut uids = Vec::new();
        loop {
            let node = self.read_node(leaf)?;
            let (found, sibling) = node.leaf_search_range(lo, hi);
            uids.extend(found);
            if sibling == 0 {
                return Ok(uids);
            }
            leaf = Uid::from_raw(sibling);
        }
    }

    /// Index `uid` under `key`. Duplicate keys are kept.
    pub fn insert(&self, key: u64, uid: Uid) -> Result<()> {
        let root = self.root();
        if let Some((right, right_key)) = self.insert_at(root, uid.raw(), key)? {
            self.update_root(root, right, right_key)?;
        }
        Ok(())
    }

    /// Release the boot record.
    pub fn close(&self) -> Result<()> {
        self.dm.release(&self.boot)
    }

    /// The leftmost leaf that may hold `lo`.
    fn search_leaf(&self, mut node_uid: Uid, lo: u64) -> Result<Uid> {
        loop {
            let node = self.read_node(node_uid)?;
            if node.leaf {
                return Ok(node_uid);
            }
            node_uid = match node.range_start(lo) {
                Next::Child(child) => child,
                Next::Sibling(sibling) => sibling,
            };
        }
    }

    /// The child covering `key`, following sibling links as needed.
    fn child_for(&self, mut node_uid: Uid, key: u64) -> Result<Uid> {
        loop {
            match self.read_node(node_uid)?.search_next(key) {
                Next::Child(child) => return Ok(child),
                Next::Sibling(sibling) => node_uid = sibling,
            }
        }
    }

    fn insert_at(&self, node_uid: Uid, son: u64, key: u64) -> Result<Option<(Uid, u64)>> {
        if self.read_node(node_uid)?.leaf {
            return self.insert_and_split(node_uid, son, key);
        }

        let child = self.child_for(node_uid, key)?;
        match self.insert_at(child, son, key)? {
            Some((right, right_key)) => self.insert_and_split(node_uid, right.raw(), right_key),
            None => Ok(None),
        }
    }

    fn insert_and_split(&self, mut node_uid: Uid, son: u64, key: u64) -> Result<Option<(Uid, u64)>> {
        loop {
            match self.with_item(node_uid, |item| self.try_insert(item, son, key))? {
                Inserted::Done(split) => return Ok(split),
                Inserted::MoveRight(sibling) => node_uid = sibling,
            }
        }
    }

    fn try_insert(&self, item: &DataItem, son: u64, key: u64) -> Result<Inserted> {
        let mut edit = item.before();
        let mut node = Node::decode(&edit.data())?;
        if !node.insert(son, key) {
            return Ok(Inserted::MoveRight(Uid::from_raw(node.sibling)));
        }

        let split = if node.needs_split() {
            let right = node.split_off();
            let right_key = right.keys[0];
            let right_uid = self.dm.insert(SUPER_XID, &right.encode())?;
            node.sibling = right_uid.raw();
            debug!(left = %item.uid(), right = %right_uid, right_key, "split tree node");
            Some((right_uid, right_key))
        } else {
            None
        };

        edit.data_mut().copy_from_slice(&node.encode());
        edit.after(SUPER_XID)?;
        Ok(Inserted::Done(split))
    }

    /// Grow the tree by one level above a split root.
    fn update_root(&self, left: Uid, right: Uid, right_key: u64) -> Result<()> {
        let _guard = self.boot_lock.lock();
        let current = Uid::from_raw(self.boot.read_data(|raw| codec::get_u64(raw, 0)));
        if current != left {
            // Someone else grew the tree first; `right` stays reachable as
            // `left`'s sibling.
            debug!(%left, %right, "root moved during split");
            return Ok(());
        }

        let root = self
            .dm
            .insert(SUPER_XID, &Node::new_root(left, right, right_key).encode())?;
        let mut edit = self.boot.before();
        codec::put_u64(&mut edit.data_mut(), 0, root.raw());
        edit.after(SUPER_XID)?;
        debug!(%root, "new tree root");
        Ok(())
    }

    fn read_node(&self, uid: Uid) -> Result<Node> {
        self.with_item(uid, |item| item.read_data(Node::decode))
    }

    /// Run `f` on the node item at `uid`, releasing it afterwards.
    fn with_item<T>(&self, uid: Uid, f: impl FnOnce(&DataItem) -> Result<T>) -> Result<T> {
        let item = self
            .dm
            .read(uid)?
            .ok_or_else(|| Error::CorruptRecord(format!("missing tree node at {uid}")))?;
        let result = f(&item);
        self.dm.release(&item)?;
        result
    }
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("boot_uid", &self.boot_uid)
            .field("root", &self.root())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::MB;
    use crate::concurrency::TransactionManager;
    use crate::storage::path_with_suffix;
    use tempfile::{tempdir, TempDir};

    fn create_test_dm(dir: &TempDir) -> DataManager {
        let base = dir.path().join("idx");
        let tm = Arc::new(TransactionManager::create(path_with_suffix(&base, ".xid")).unwrap());
        DataManager::create(&base, MB, tm).unwrap()
    }

    fn uid(n: u64) -> Uid {
        Uid::from_raw(n)
    }

    #[test]
    fn test_empty_tree() {
        let dir = tempdir().unwrap();
        let dm = Arc::new(create_test_dm(&dir));
        let boot = BPlusTree::create(&dm).unwrap();
        let tree = BPlusTree::load(boot, Arc::clone(&dm)).unwrap();

        assert!(tree.search(1).unwrap().is_empty());
        assert!(tree.search_range(0, u64::MAX).unwrap().is_empty());
        tree.close().unwrap();
    }

    #[test]
    fn test_insert_and_search_single_leaf() {
        let dir = tempdir().unwrap();
        let dm = Arc::new(create_test_dm(&dir));
        let tree = BPlusTree::load(BPlusTree::create(&dm).unwrap(), Arc::clone(&dm)).unwrap();

        for k in [5u64, 1, 3] {
            tree.insert(k, uid(k * 100)).unwrap();
        }
        assert_eq!(tree.search(3).unwrap(), vec![uid(300)]);
        assert_eq!(tree.search_range(2, 5).unwrap(), vec![uid(300), uid(500)]);
        assert!(tree.search(4).unwrap().is_empty());
        assert!(tree.search_range(6, 2).unwrap().is_empty());
    }

    #[test]
    fn test_root_split_repoints_boot() {
        let dir = tempdir().unwrap();
        let dm = Arc::new(create_test_dm(&dir));
        let tree = BPlusTree::load(BPlusTree::create(&dm).unwrap(), Arc::clone(&dm)).unwrap();
        let first_root = tree.root();

        for k in 0..MAX_KEYS as u64 {
            tree.insert(k, uid(k + 1)).unwrap();
        }
        assert_ne!(tree.root(), first_root);

        let root = tree.read_node(tree.root()).unwrap();
        assert!(!root.leaf);
        assert_eq!(root.keys, vec![BALANCE as u64, u64::MAX]);

        let all = tree.search_range(0, u64::MAX).unwrap();
        let expected: Vec<Uid> = (1..=MAX_KEYS as u64).map(uid).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_duplicates_across_split() {
        let dir = tempdir().unwrap();
        let dm = Arc::new(create_test_dm(&dir));
        let tree = BPlusTree::load(BPlusTree::create(&dm).unwrap(), Arc::clone(&dm)).unwrap();

        for i in 0..(MAX_KEYS as u64 * 2) {
            tree.insert(7, uid(i + 1)).unwrap();
        }
        assert_eq!(tree.search(7).unwrap().len(), MAX_KEYS * 2);
    }

    #[test]
    fn test_load_rejects_non_boot_record() {
        let dir = tempdir().unwrap();
        let dm = Arc::new(create_test_dm(&dir));
        let not_boot = dm.insert(SUPER_XID, b"abc").unwrap();

        assert!(matches!(
            BPlusTree::load(not_boot, dm),
            Err(Error::CorruptRecord(_))
        ));
    }
}
