//! # Remote index (outgoing side)
//!
//! Per-rank, per-tree accumulator of the local elements that must be shipped
//! to other ranks. Filled exclusively by discovery, drained by the exchange.
//!
//! **Invariants:**
//! - Each remote rank appears exactly once in the rank list, in first-contact
//!   order.
//! - Within a bucket, trees appear in local tree order and are only ever
//!   appended at the tail.
//! - Within a tree, no two adjacent elements share both level and linear id
//!   (tail-only dedup; correct because discovery visits elements in linear
//!   order, so repeats of one element arrive back to back).

use std::collections::HashMap;

use crate::forest::GlobalTreeId;
use crate::ghost_error::{CheckInvariants, GhostError};
use crate::scheme::{ElementClass, ElementScheme, ElementVec};

/// The elements of one local tree headed to one remote rank.
#[derive(Debug)]
pub struct RemoteTree {
    global_id: GlobalTreeId,
    class: ElementClass,
    elements: ElementVec,
}

impl RemoteTree {
    fn new(global_id: GlobalTreeId, class: ElementClass, scheme: &dyn ElementScheme) -> Self {
        Self {
            global_id,
            class,
            elements: ElementVec::new(scheme.element_size()),
        }
    }

    #[inline]
    pub fn global_id(&self) -> GlobalTreeId {
        self.global_id
    }

    #[inline]
    pub fn class(&self) -> ElementClass {
        self.class
    }

    #[inline]
    pub fn elements(&self) -> &ElementVec {
        &self.elements
    }
}

/// Everything one remote rank will receive from this rank.
#[derive(Debug)]
pub struct RemoteBucket {
    rank: usize,
    trees: Vec<RemoteTree>,
}

impl RemoteBucket {
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn trees(&self) -> &[RemoteTree] {
        &self.trees
    }

    /// Total element count across all trees of this bucket.
    pub fn num_elements(&self) -> u64 {
        self.trees.iter().map(|t| t.elements.len() as u64).sum()
    }
}

/// Accumulator of outgoing ghost elements, keyed by target rank.
#[derive(Debug, Default)]
pub struct RemoteIndex {
    buckets: Vec<RemoteBucket>,
    bucket_of_rank: HashMap<usize, usize>,
    ranks: Vec<usize>,
}

impl RemoteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `elem` of tree `gtree` must be shipped to `remote_rank`.
    ///
    /// Must be called in local element linear order. Consecutive duplicates
    /// per (rank, tree) are suppressed by comparing level and linear id with
    /// the bucket tree's tail element.
    pub fn add(
        &mut self,
        remote_rank: usize,
        gtree: GlobalTreeId,
        class: ElementClass,
        scheme: &dyn ElementScheme,
        elem: &[u8],
    ) {
        let bucket = match self.bucket_of_rank.get(&remote_rank).copied() {
            Some(i) => &mut self.buckets[i],
            None => {
                // First contact with this rank: new bucket, new rank-list entry.
                self.bucket_of_rank.insert(remote_rank, self.buckets.len());
                self.ranks.push(remote_rank);
                self.buckets.push(RemoteBucket {
                    rank: remote_rank,
                    trees: vec![RemoteTree::new(gtree, class, scheme)],
                });
                self.buckets.last_mut().expect("just pushed")
            }
        };
        debug_assert_eq!(bucket.rank, remote_rank);

        // Trees arrive in local order: the current tree is either the tail
        // entry or not present yet.
        if bucket.trees.last().map(|t| t.global_id) != Some(gtree) {
            bucket.trees.push(RemoteTree::new(gtree, class, scheme));
        }
        let tree = bucket.trees.last_mut().expect("tail tree exists");

        // Suppress a repeat of the tail element.
        if let Some(tail) = tree.elements.last() {
            let level = scheme.level(elem);
            if scheme.level(tail) == level
                && scheme.linear_id(tail, scheme.level(tail)) == scheme.linear_id(elem, level)
            {
                return;
            }
        }
        tree.elements.push(elem);
    }

    /// Remote ranks in their current list order.
    #[inline]
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    #[inline]
    pub fn num_ranks(&self) -> usize {
        self.ranks.len()
    }

    /// The bucket for `rank`, if any element is headed there.
    pub fn bucket(&self, rank: usize) -> Option<&RemoteBucket> {
        self.bucket_of_rank.get(&rank).map(|&i| &self.buckets[i])
    }

    /// Iterate buckets in rank-list order.
    pub fn iter(&self) -> impl Iterator<Item = &RemoteBucket> {
        self.ranks.iter().map(move |&r| {
            let i = self.bucket_of_rank[&r];
            &self.buckets[i]
        })
    }

    /// Sort the rank list ascending. The exchange does this before the
    /// receive loop so ingest order is rank order.
    pub(crate) fn sort_ranks(&mut self) {
        self.ranks.sort_unstable();
    }
}

impl CheckInvariants for RemoteIndex {
    fn validate_invariants(&self) -> Result<(), GhostError> {
        if self.ranks.len() != self.bucket_of_rank.len() {
            return Err(GhostError::Invariant(format!(
                "rank list has {} entries but {} buckets are keyed",
                self.ranks.len(),
                self.bucket_of_rank.len()
            )));
        }
        for &rank in &self.ranks {
            let &i = self.bucket_of_rank.get(&rank).ok_or_else(|| {
                GhostError::Invariant(format!("listed rank {rank} has no bucket"))
            })?;
            let bucket = &self.buckets[i];
            if bucket.rank != rank {
                return Err(GhostError::Invariant(format!(
                    "bucket keyed by rank {rank} stores rank {}",
                    bucket.rank
                )));
            }
            if bucket.trees.iter().any(|t| t.elements.is_empty()) {
                return Err(GhostError::Invariant(format!(
                    "bucket for rank {rank} holds an empty tree"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::line::LineScheme;

    fn elem(scheme: &LineScheme, level: u8, id: u64) -> Vec<u8> {
        let mut bytes = vec![0u8; 8];
        scheme.elem_at(level, id).write(&mut bytes);
        bytes
    }

    #[test]
    fn consecutive_duplicates_are_suppressed() {
        let scheme = LineScheme::with_max_level(4);
        let mut idx = RemoteIndex::new();
        let e = elem(&scheme, 2, 1);
        idx.add(1, GlobalTreeId(0), ElementClass::Line, &scheme, &e);
        idx.add(1, GlobalTreeId(0), ElementClass::Line, &scheme, &e);
        idx.add(1, GlobalTreeId(0), ElementClass::Line, &scheme, &e);
        let bucket = idx.bucket(1).unwrap();
        assert_eq!(bucket.num_elements(), 1);
    }

    #[test]
    fn nonconsecutive_repeat_is_kept() {
        // Tail-only dedup: a repeat after an intervening element stays. The
        // discovery order makes this pattern impossible in practice.
        let scheme = LineScheme::with_max_level(4);
        let mut idx = RemoteIndex::new();
        let a = elem(&scheme, 2, 1);
        let b = elem(&scheme, 2, 2);
        idx.add(1, GlobalTreeId(0), ElementClass::Line, &scheme, &a);
        idx.add(1, GlobalTreeId(0), ElementClass::Line, &scheme, &b);
        idx.add(1, GlobalTreeId(0), ElementClass::Line, &scheme, &a);
        assert_eq!(idx.bucket(1).unwrap().num_elements(), 3);
    }

    #[test]
    fn ranks_keep_first_contact_order() {
        let scheme = LineScheme::with_max_level(4);
        let mut idx = RemoteIndex::new();
        let e = elem(&scheme, 2, 0);
        idx.add(5, GlobalTreeId(0), ElementClass::Line, &scheme, &e);
        idx.add(2, GlobalTreeId(0), ElementClass::Line, &scheme, &e);
        idx.add(5, GlobalTreeId(1), ElementClass::Line, &scheme, &e);
        assert_eq!(idx.ranks(), &[5, 2]);
        assert_eq!(idx.bucket(5).unwrap().trees().len(), 2);
        idx.sort_ranks();
        assert_eq!(idx.ranks(), &[2, 5]);
        idx.assert_invariants();
    }

    #[test]
    fn same_element_to_two_ranks() {
        let scheme = LineScheme::with_max_level(4);
        let mut idx = RemoteIndex::new();
        let e = elem(&scheme, 2, 3);
        idx.add(0, GlobalTreeId(7), ElementClass::Line, &scheme, &e);
        idx.add(2, GlobalTreeId(7), ElementClass::Line, &scheme, &e);
        assert_eq!(idx.bucket(0).unwrap().num_elements(), 1);
        assert_eq!(idx.bucket(2).unwrap().num_elements(), 1);
    }
}
