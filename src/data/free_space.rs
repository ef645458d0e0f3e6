//! Free-space index.
//!
//! Pages are filed into buckets by how many bytes they have free:
//!
//! ```text
//! bucket:    0        1        2              39          40
//!         [0,204) [204,408) [408,612)  ...  [7956,8160) [8160,..]
//! ```
//!
//! `select` removes the page it returns, so two inserters never write the
//! same page at once. The inserter re-files the page when it is done.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::common::config::PAGE_SIZE;
use crate::common::PageId;

const INTERVALS_NO: usize = 40;
const THRESHOLD: usize = PAGE_SIZE / INTERVALS_NO;

/// A page and its free bytes, as filed in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page_id: PageId,
    pub free_space: usize,
}

/// Bucketed index of per-page free space.
pub struct FreeSpaceIndex {
    buckets: Mutex<Vec<VecDeque<PageInfo>>>,
}

impl FreeSpaceIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![VecDeque::new(); INTERVALS_NO + 1]),
        }
    }

    /// File `page_id` under the bucket for `free_space` bytes.
    pub fn add(&self, page_id: PageId, free_space: usize) {
        let number = (free_space / THRESHOLD).min(INTERVALS_NO);
        self.buckets.lock()[number].push_back(PageInfo {
            page_id,
            free_space,
        });
    }

    /// Remove and return a page with at least `size` bytes free.
    ///
    /// Starts one bucket above `size`'s own bucket, so every page in it has
    /// room. The top bucket is open-ended and is searched by exact size.
    pub fn select(&self, size: usize) -> Option<PageInfo> {
        let mut number = size / THRESHOLD;
        if number < INTERVALS_NO {
            number += 1;
        }

        let mut buckets = self.buckets.lock();
        for bucket in buckets.iter_mut().skip(number) {
            if let Some(pos) = bucket.iter().position(|info| info.free_space >= size) {
                return bucket.remove(pos);
            }
        }
        None
    }

    /// Number of pages currently filed.
    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FreeSpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::page_x::MAX_FREE_SPACE;
    use proptest::prelude::*;

    #[test]
    fn test_bucket_width() {
        assert_eq!(THRESHOLD, 204);
    }

    #[test]
    fn test_select_removes_page() {
        let index = FreeSpaceIndex::new();
        index.add(PageId::new(2), MAX_FREE_SPACE);

        let info = index.select(100).unwrap();
        assert_eq!(info.page_id, PageId::new(2));
        assert!(index.select(100).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_select_skips_own_bucket() {
        let index = FreeSpaceIndex::new();
        // Bucket 1 covers [204, 408); a 300-byte request may not land there.
        index.add(PageId::new(2), 400);
        assert!(index.select(300).is_none());

        index.add(PageId::new(3), 700);
        assert_eq!(index.select(300).unwrap().page_id, PageId::new(3));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_select_in_top_bucket_checks_size() {
        let index = FreeSpaceIndex::new();
        index.add(PageId::new(2), 8170);
        assert!(index.select(8180).is_none());

        index.add(PageId::new(3), MAX_FREE_SPACE);
        assert_eq!(index.select(8180).unwrap().page_id, PageId::new(3));
    }

    #[test]
    fn test_pages_with_equal_space_are_fifo() {
        let index = FreeSpaceIndex::new();
        index.add(PageId::new(5), 1000);
        index.add(PageId::new(6), 1000);

        assert_eq!(index.select(10).unwrap().page_id, PageId::new(5));
        assert_eq!(index.select(10).unwrap().page_id, PageId::new(6));
    }

    proptest! {
        #[test]
        fn prop_selected_page_has_room(
            pages in prop::collection::vec(0usize..=MAX_FREE_SPACE, 1..60),
            size in 1usize..=MAX_FREE_SPACE,
        ) {
            let index = FreeSpaceIndex::new();
            for (i, free) in pages.iter().enumerate() {
                index.add(PageId::new(i as u32 + 2), *free);
            }

            match index.select(size) {
                Some(info) => {
                    prop_assert!(info.free_space >= size);
                    let bucket = (info.free_space / THRESHOLD).min(INTERVALS_NO);
                    prop_assert!(bucket == INTERVALS_NO || bucket * THRESHOLD >= size);
                }
                None => {
                    // Only pages in the requested bucket or below could fit.
                    let floor = ((size / THRESHOLD) + 1).min(INTERVALS_NO) * THRESHOLD;
                    prop_assert!(pages.iter().all(|&f| f < size || f < floor));
                }
            }
        }
    }
}
