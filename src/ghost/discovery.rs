//! Remote-element discovery.
//!
//! Walks every local element once, in linear order, and records in the
//! remote index each element whose face neighbor is owned elsewhere. The
//! linear traversal order is what makes the remote index's tail-only dedup
//! sufficient.
//!
//! Discovery has no recoverable errors: neighbor and owner lookups are total
//! on a committed forest, and any violation is a fatal programming error.

use log::debug;

use crate::forest::ForestQuery;
use crate::ghost::layer::GhostLayer;
use crate::scheme::{ElementClass, ElementScheme, ElementVec};

/// How remote owners of a face neighborhood are resolved.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DiscoveryMethod {
    /// Assume a balanced forest: construct the half-size face neighbors and
    /// resolve one owner per neighbor child.
    #[default]
    Balanced,
    /// Construct the full-size face neighbor and ask the forest for all
    /// owners touching the shared face.
    OwnersAtFace,
}

/// Scratch storage for constructed neighbors, reused across iterations.
///
/// Regrown when the required capacity grows or the neighbor class changes;
/// the class recorded here is the one that allocated the buffer, and it is
/// the class whose scheme sizes the teardown on regrowth.
struct NeighborScratch {
    class: Option<ElementClass>,
    capacity: usize,
    elements: ElementVec,
}

impl NeighborScratch {
    fn new() -> Self {
        Self {
            class: None,
            capacity: 0,
            elements: ElementVec::new(1),
        }
    }

    fn prepare(&mut self, class: ElementClass, scheme: &dyn ElementScheme, needed: usize) {
        if self.class != Some(class) || self.capacity < needed {
            // Drops the previous allocation, which belongs to the recorded
            // class, before the new class takes over.
            self.elements = scheme.new_elements(needed);
            self.capacity = needed;
            self.class = Some(class);
        }
    }
}

/// Fill `layer`'s remote index with every local element that has a
/// face neighbor owned by a rank other than `my_rank`.
pub(crate) fn fill_remote<F: ForestQuery>(
    forest: &F,
    layer: &mut GhostLayer,
    my_rank: usize,
    method: DiscoveryMethod,
) {
    let mut scratch = NeighborScratch::new();
    let mut owners: Vec<usize> = Vec::new();

    for ltree in 0..forest.num_local_trees() {
        let class = forest.tree_class(ltree);
        let scheme = forest.scheme(class);
        let gtree = forest.global_tree_id(ltree);

        for ielem in 0..forest.tree_num_elements(ltree) {
            let elem = forest.tree_element(ltree, ielem);
            let num_faces = scheme.num_faces(elem);
            let is_atom = scheme.level(elem) == scheme.max_level();

            for face in 0..num_faces {
                let neigh_class = forest.neighbor_class(ltree, elem, face);
                let neigh_scheme = forest.scheme(neigh_class);

                match method {
                    DiscoveryMethod::Balanced => {
                        let num_children = scheme.num_face_children(elem, face);
                        scratch.prepare(neigh_class, neigh_scheme, num_children);
                        // An element at max level has no half-size neighbors;
                        // its single neighbor is full-size.
                        let (neighbor_tree, constructed) = if is_atom {
                            let t = forest
                                .face_neighbor(ltree, elem, face, scratch.elements.get_mut(0))
                                .map(|(t, _)| t);
                            (t, 1)
                        } else {
                            let t = forest.half_face_neighbors(
                                ltree,
                                elem,
                                face,
                                &mut scratch.elements,
                            );
                            (t, num_children)
                        };
                        let Some(neighbor_tree) = neighbor_tree else {
                            continue; // domain boundary
                        };
                        for child in 0..constructed {
                            let owner = forest.find_owner(
                                neighbor_tree,
                                scratch.elements.get(child),
                                neigh_class,
                            );
                            if owner != my_rank {
                                layer.remote.add(owner, gtree, class, scheme, elem);
                            }
                        }
                    }
                    DiscoveryMethod::OwnersAtFace => {
                        scratch.prepare(neigh_class, neigh_scheme, 1);
                        let Some((neighbor_tree, neigh_face)) = forest.face_neighbor(
                            ltree,
                            elem,
                            face,
                            scratch.elements.get_mut(0),
                        ) else {
                            continue; // domain boundary
                        };
                        forest.owners_at_face(
                            neighbor_tree,
                            scratch.elements.get(0),
                            neigh_class,
                            neigh_face,
                            &mut owners,
                        );
                        assert!(!owners.is_empty(), "face neighborhood without owners");
                        for &owner in &owners {
                            if owner != my_rank {
                                layer.remote.add(owner, gtree, class, scheme, elem);
                            }
                        }
                    }
                }
            }
        }
    }

    debug!(
        "discovery on rank {my_rank}: {} remote ranks",
        layer.remote.num_ranks()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::uniform::UniformLineForest;
    use crate::forest::GlobalTreeId;

    fn discover(rank: usize, size: usize, method: DiscoveryMethod) -> GhostLayer {
        let forest = UniformLineForest::new(rank, size, 1, 2, 4);
        let mut layer = GhostLayer::new();
        fill_remote(&forest, &mut layer, rank, method);
        layer
    }

    #[test]
    fn boundary_rank_pair_sees_each_other() {
        // One tree, level 2, two ranks: the partition boundary sits between
        // elements 1 and 2.
        for method in [DiscoveryMethod::Balanced, DiscoveryMethod::OwnersAtFace] {
            let left = discover(0, 2, method);
            assert_eq!(left.remote.ranks(), &[1], "{method:?}");
            assert_eq!(left.remote.bucket(1).unwrap().num_elements(), 1);

            let right = discover(1, 2, method);
            assert_eq!(right.remote.ranks(), &[0], "{method:?}");
            assert_eq!(right.remote.bucket(0).unwrap().num_elements(), 1);
        }
    }

    #[test]
    fn single_rank_has_no_remotes() {
        let layer = discover(0, 1, DiscoveryMethod::Balanced);
        assert_eq!(layer.remote.num_ranks(), 0);
    }

    #[test]
    fn atoms_take_the_full_size_branch() {
        // Elements at max level: is_atom construction, one neighbor each.
        let forest = UniformLineForest::new(0, 2, 1, 3, 3);
        let mut layer = GhostLayer::new();
        fill_remote(&forest, &mut layer, 0, DiscoveryMethod::Balanced);
        assert_eq!(layer.remote.ranks(), &[1]);
        assert_eq!(layer.remote.bucket(1).unwrap().num_elements(), 1);
    }

    #[test]
    fn remote_tree_carries_local_tree_id() {
        // Two trees, boundary between them on the rank split.
        let forest = UniformLineForest::new(0, 2, 2, 1, 4);
        let mut layer = GhostLayer::new();
        fill_remote(&forest, &mut layer, 0, DiscoveryMethod::Balanced);
        let bucket = layer.remote.bucket(1).unwrap();
        // The shipped element belongs to the local tree 0, not the neighbor.
        assert_eq!(bucket.trees().len(), 1);
        assert_eq!(bucket.trees()[0].global_id(), GlobalTreeId(0));
    }
}
