//! # Forest queries
//!
//! [`ForestQuery`] is the capability surface the ghost core needs from the
//! enclosing forest: tree enumeration, element access, neighbor construction
//! and ownership resolution. The core never inspects coordinate transforms
//! or the partition layout directly; both stay behind this trait.
//!
//! "No neighbor" (a domain boundary) is expressed as `None` from the
//! neighbor constructors rather than a sentinel id.

pub mod uniform;

use serde::{Deserialize, Serialize};

use crate::scheme::{ElementClass, ElementVec, SchemeRegistry};

/// Global identifier of one space-tree in the forest.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct GlobalTreeId(pub u64);

impl GlobalTreeId {
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for GlobalTreeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which adjacency the ghost layer covers.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum GhostType {
    /// No ghost layer; `ghost_create` is a warned no-op.
    #[default]
    None,
    /// One layer of face-neighbor ghosts.
    Faces,
}

/// Capability surface over the enclosing forest.
///
/// Neighbor and owner lookups are total on well-formed input; violating a
/// precondition (an index out of range, a face id beyond the element's face
/// count) is a programming error and panics.
pub trait ForestQuery: SchemeRegistry {
    /// Ghost adjacency this forest was committed with.
    fn ghost_type(&self) -> GhostType;

    /// Number of trees with local elements on this rank.
    fn num_local_trees(&self) -> usize;

    /// Element class of local tree `ltree`.
    fn tree_class(&self, ltree: usize) -> ElementClass;

    /// Number of local elements in local tree `ltree`.
    fn tree_num_elements(&self, ltree: usize) -> usize;

    /// Element record `index` of local tree `ltree`, in linear order.
    fn tree_element(&self, ltree: usize, index: usize) -> &[u8];

    /// Global id of local tree `ltree`.
    fn global_tree_id(&self, ltree: usize) -> GlobalTreeId;

    /// Element class of the tree across face `face` of `elem`.
    ///
    /// Defined even at domain boundaries (the class the neighbor would have).
    fn neighbor_class(&self, ltree: usize, elem: &[u8], face: usize) -> ElementClass;

    /// Construct the child-sized neighbors across `face` of `elem` into the
    /// first `num_face_children` slots of `neighbors`.
    ///
    /// Returns the neighbor tree's global id, or `None` at a domain boundary
    /// (in which case `neighbors` content is unspecified).
    fn half_face_neighbors(
        &self,
        ltree: usize,
        elem: &[u8],
        face: usize,
        neighbors: &mut ElementVec,
    ) -> Option<GlobalTreeId>;

    /// Construct the single same-sized neighbor across `face` of `elem`.
    ///
    /// Returns the neighbor tree's global id and the neighbor's face index
    /// that touches `elem`, or `None` at a domain boundary.
    fn face_neighbor(
        &self,
        ltree: usize,
        elem: &[u8],
        face: usize,
        neighbor: &mut [u8],
    ) -> Option<(GlobalTreeId, usize)>;

    /// Rank owning `elem` (by its first descendant) in tree `gtree`.
    fn find_owner(&self, gtree: GlobalTreeId, elem: &[u8], class: ElementClass) -> usize;

    /// Collect into `owners` every rank owning part of `elem` adjacent to
    /// `face`, in tree `gtree`. `owners` is cleared first and never left
    /// empty.
    fn owners_at_face(
        &self,
        gtree: GlobalTreeId,
        elem: &[u8],
        class: ElementClass,
        face: usize,
        owners: &mut Vec<usize>,
    );
}
