//! # Ghost layer
//!
//! The per-rank result of ghost construction: the received ghost trees with
//! their elements, lookup maps, the outgoing remote index, and the exchange
//! counters.
//!
//! **Invariants:**
//! - At most one [`GhostTree`] per global id; `tree_of_global` always maps a
//!   global id to its current position in the tree array. Positions are
//!   stable once assigned.
//! - Elements of one sender are a contiguous run across consecutively
//!   appended trees; `offsets_of_rank` records where each sender's run
//!   starts. Runs are ingested in ascending sender rank.
//! - The layer is never mutated after `ghost_create` returns.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use crate::forest::GlobalTreeId;
use crate::ghost::remote_index::RemoteIndex;
use crate::ghost::wire::TreeRun;
use crate::ghost_error::{CheckInvariants, GhostError};
use crate::scheme::{ElementClass, ElementVec};

/// One tree's worth of received ghost elements.
#[derive(Debug)]
pub struct GhostTree {
    global_id: GlobalTreeId,
    class: ElementClass,
    elements: ElementVec,
}

impl GhostTree {
    #[inline]
    pub fn global_id(&self) -> GlobalTreeId {
        self.global_id
    }

    #[inline]
    pub fn class(&self) -> ElementClass {
        self.class
    }

    #[inline]
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Element record `index`. Out-of-range indices are contract violations.
    #[inline]
    pub fn element(&self, index: usize) -> &[u8] {
        self.elements.get(index)
    }

    #[inline]
    pub fn elements(&self) -> &ElementVec {
        &self.elements
    }
}

/// Where one sender's contiguous run of ghosts begins.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RankOffsets {
    /// Index of the sender's first ghost tree in the tree array.
    pub first_tree: usize,
    /// Index of the sender's first element within that tree.
    pub first_element: usize,
}

/// Counters published when profiling is enabled.
#[derive(Clone, Debug, Default)]
pub struct GhostProfile {
    /// Wall-clock time spent in `ghost_create`.
    pub runtime: Duration,
    /// Number of remote ranks this rank ships to (and receives from).
    pub num_remote_ranks: usize,
    /// Ghost elements received.
    pub ghosts_received: u64,
    /// Remote elements shipped.
    pub ghosts_shipped: u64,
}

/// The ghost layer of one committed forest, as seen from one rank.
#[derive(Debug, Default)]
pub struct GhostLayer {
    trees: Vec<GhostTree>,
    tree_of_global: HashMap<GlobalTreeId, usize>,
    offsets_of_rank: HashMap<usize, RankOffsets>,
    pub(crate) remote: RemoteIndex,
    pub(crate) num_ghost_elements: u64,
    pub(crate) num_remote_elements: u64,
    pub(crate) profile: Option<GhostProfile>,
}

impl GhostLayer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of ghost trees.
    #[inline]
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Ghost tree at `index`. Out-of-range indices are contract violations.
    #[inline]
    pub fn tree(&self, index: usize) -> &GhostTree {
        &self.trees[index]
    }

    /// All ghost trees in ingestion order.
    #[inline]
    pub fn trees(&self) -> &[GhostTree] {
        &self.trees
    }

    /// Position of the ghost tree with global id `gid`, if any.
    #[inline]
    pub fn tree_index_of(&self, gid: GlobalTreeId) -> Option<usize> {
        self.tree_of_global.get(&gid).copied()
    }

    /// Element `element` of ghost tree `tree`.
    #[inline]
    pub fn element(&self, tree: usize, element: usize) -> &[u8] {
        self.trees[tree].element(element)
    }

    /// Total ghost elements received.
    #[inline]
    pub fn num_ghost_elements(&self) -> u64 {
        self.num_ghost_elements
    }

    /// Total remote elements shipped.
    #[inline]
    pub fn num_remote_elements(&self) -> u64 {
        self.num_remote_elements
    }

    /// The outgoing side: which local elements went where.
    #[inline]
    pub fn remote_index(&self) -> &RemoteIndex {
        &self.remote
    }

    /// Remote ranks (equal to the sender set by symmetry), ascending after
    /// construction.
    #[inline]
    pub fn remote_ranks(&self) -> &[usize] {
        self.remote.ranks()
    }

    /// Where `rank`'s ghosts start, if it sent any.
    #[inline]
    pub fn rank_offsets(&self, rank: usize) -> Option<RankOffsets> {
        self.offsets_of_rank.get(&rank).copied()
    }

    /// Profiling counters, when construction ran with profiling enabled.
    #[inline]
    pub fn profile(&self) -> Option<&GhostProfile> {
        self.profile.as_ref()
    }

    /// Ingest one sender's parsed message.
    ///
    /// Runs must arrive in ascending sender rank; the caller (the exchange)
    /// reorders arrivals. Appends each run's elements to the matching ghost
    /// tree, creating trees as first seen, and records the sender's start
    /// offsets.
    pub(crate) fn append_run(&mut self, sender: usize, runs: Vec<TreeRun>) {
        assert!(!runs.is_empty(), "ghost message without trees from rank {sender}");
        let mut first: Option<RankOffsets> = None;

        for run in runs {
            let (index, old_count) = match self.tree_of_global.get(&run.global_id).copied() {
                Some(index) => {
                    let tree = &mut self.trees[index];
                    assert_eq!(
                        tree.class, run.class,
                        "rank {sender} sent class {:?} for ghost tree {} of class {:?}",
                        run.class, run.global_id, tree.class
                    );
                    let old_count = tree.elements.len();
                    tree.elements.extend_from_bytes(run.elements.as_bytes());
                    (index, old_count)
                }
                None => {
                    let index = self.trees.len();
                    self.tree_of_global.insert(run.global_id, index);
                    self.trees.push(GhostTree {
                        global_id: run.global_id,
                        class: run.class,
                        elements: run.elements,
                    });
                    (index, 0)
                }
            };
            self.num_ghost_elements += self.trees[index].elements.len() as u64 - old_count as u64;
            if first.is_none() {
                first = Some(RankOffsets {
                    first_tree: index,
                    first_element: old_count,
                });
            }
        }

        let offsets = first.expect("nonempty run");
        let prev = self.offsets_of_rank.insert(sender, offsets);
        assert!(prev.is_none(), "rank {sender} ingested twice");
    }

    /// Multi-line dump of the remote and received sides, for diagnostics.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Remotes:");
        for bucket in self.remote.iter() {
            let _ = writeln!(
                out,
                "  [rank {}] ({} trees):",
                bucket.rank(),
                bucket.trees().len()
            );
            for tree in bucket.trees() {
                let _ = writeln!(
                    out,
                    "    [id: {}, class: {:?}, #elem: {}]",
                    tree.global_id(),
                    tree.class(),
                    tree.elements().len()
                );
            }
        }
        let _ = writeln!(out, "Received:");
        let mut ranks: Vec<_> = self.offsets_of_rank.iter().collect();
        ranks.sort_unstable_by_key(|(r, _)| **r);
        for (rank, offsets) in ranks {
            let _ = writeln!(
                out,
                "  [rank {rank}] first tree: {} first element: {}",
                offsets.first_tree, offsets.first_element
            );
        }
        out
    }

    /// Drop the layer, asserting that the caller holds the last reference.
    pub fn destroy(layer: Arc<Self>) {
        let inner = Arc::into_inner(layer);
        assert!(inner.is_some(), "ghost layer destroyed while references remain");
        drop(inner);
    }
}

impl CheckInvariants for GhostLayer {
    fn validate_invariants(&self) -> Result<(), GhostError> {
        self.remote.validate_invariants()?;
        if self.tree_of_global.len() != self.trees.len() {
            return Err(GhostError::Invariant(format!(
                "{} ghost trees but {} global-id map entries",
                self.trees.len(),
                self.tree_of_global.len()
            )));
        }
        for (index, tree) in self.trees.iter().enumerate() {
            if self.tree_of_global.get(&tree.global_id) != Some(&index) {
                return Err(GhostError::Invariant(format!(
                    "ghost tree {} is at position {index} but the map disagrees",
                    tree.global_id
                )));
            }
        }
        let total: u64 = self.trees.iter().map(|t| t.elements.len() as u64).sum();
        if total != self.num_ghost_elements {
            return Err(GhostError::Invariant(format!(
                "counter says {} ghost elements, trees hold {total}",
                self.num_ghost_elements
            )));
        }
        for (&rank, offsets) in &self.offsets_of_rank {
            let tree = self.trees.get(offsets.first_tree).ok_or_else(|| {
                GhostError::Invariant(format!(
                    "rank {rank} offsets point at tree {} of {}",
                    offsets.first_tree,
                    self.trees.len()
                ))
            })?;
            if offsets.first_element > tree.elements.len() {
                return Err(GhostError::Invariant(format!(
                    "rank {rank} offsets point at element {} of {}",
                    offsets.first_element,
                    tree.elements.len()
                )));
            }
        }
        Ok(())
    }
}
