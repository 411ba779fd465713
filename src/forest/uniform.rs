//! Uniformly refined, contiguously partitioned reference forests.
//!
//! These forests serve two purposes: they are the minimal in-crate
//! collaborator for the ghost core, and the substrate of the end-to-end
//! tests. Every tree is refined to one uniform level; the global element
//! order is (tree, linear id); each rank owns one contiguous range of that
//! order, split as evenly as the division allows.
//!
//! [`UniformLineForest`] is a row of line trees glued end to end.
//! [`UniformQuadForest`] is a strip of quad trees glued along the x axis;
//! the y extremes are domain boundary.

use crate::scheme::line::{LineElem, LineScheme};
use crate::scheme::quad::{QuadElem, QuadScheme};
use crate::scheme::{ElementClass, ElementScheme, ElementVec, SchemeRegistry};

use super::{ForestQuery, GhostType, GlobalTreeId};

/// Contiguous per-rank split of `total` elements: rank `r` owns
/// `[offsets[r], offsets[r + 1])`.
fn partition_offsets(total: u64, size: usize) -> Vec<u64> {
    (0..=size as u64).map(|r| total * r / size as u64).collect()
}

#[inline]
fn owner_of(offsets: &[u64], global: u64) -> usize {
    debug_assert!(global < *offsets.last().expect("nonempty offsets"));
    offsets.partition_point(|&o| o <= global) - 1
}

struct LocalTree {
    gtree: u64,
    elements: ElementVec,
}

/// Group a rank's contiguous global element range into per-tree storage.
fn build_local_trees(
    offsets: &[u64],
    rank: usize,
    per_tree: u64,
    elem_size: usize,
    mut write_elem: impl FnMut(u64, &mut [u8]),
) -> Vec<LocalTree> {
    let mut trees: Vec<LocalTree> = Vec::new();
    let mut record = vec![0u8; elem_size];
    for global in offsets[rank]..offsets[rank + 1] {
        let gtree = global / per_tree;
        let within = global % per_tree;
        if trees.last().map(|t| t.gtree) != Some(gtree) {
            trees.push(LocalTree {
                gtree,
                elements: ElementVec::new(elem_size),
            });
        }
        write_elem(within, &mut record);
        trees.last_mut().expect("just pushed").elements.push(&record);
    }
    trees
}

/// A row of 1-D trees, uniformly refined, contiguously partitioned.
pub struct UniformLineForest {
    scheme: LineScheme,
    level: u8,
    num_trees: u64,
    rank: usize,
    size: usize,
    offsets: Vec<u64>,
    local: Vec<LocalTree>,
    ghost_type: GhostType,
}

impl UniformLineForest {
    /// Forest of `num_trees` line trees refined to `level`, as seen from
    /// `rank` of `size`. Elements per tree: `2^level`.
    pub fn new(rank: usize, size: usize, num_trees: u64, level: u8, max_level: u8) -> Self {
        assert!(rank < size, "rank out of range");
        assert!(num_trees > 0, "forest needs at least one tree");
        assert!(level <= max_level, "refinement exceeds max level");
        let scheme = LineScheme::with_max_level(max_level);
        let per_tree = 1u64 << level;
        let offsets = partition_offsets(num_trees * per_tree, size);
        let local = build_local_trees(
            &offsets,
            rank,
            per_tree,
            scheme.element_size(),
            |within, record| scheme.elem_at(level, within).write(record),
        );
        Self {
            scheme,
            level,
            num_trees,
            rank,
            size,
            offsets,
            local,
            ghost_type: GhostType::Faces,
        }
    }

    pub fn with_ghost_type(mut self, ghost_type: GhostType) -> Self {
        self.ghost_type = ghost_type;
        self
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Uniform refinement level of every leaf.
    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    #[inline]
    fn per_tree(&self) -> u64 {
        1u64 << self.level
    }

    /// Leaf index (at the forest level) of `elem`'s first descendant or
    /// containing leaf, plus the count of forest-level leaves inside `elem`.
    fn leaf_span(&self, elem: &[u8]) -> (u64, u64) {
        let first = self.scheme.linear_id(elem, self.level);
        let elem_level = self.scheme.level(elem);
        let count = if elem_level <= self.level {
            1u64 << (self.level - elem_level)
        } else {
            1
        };
        (first, count)
    }
}

impl SchemeRegistry for UniformLineForest {
    fn scheme(&self, class: ElementClass) -> &dyn ElementScheme {
        match class {
            ElementClass::Line => &self.scheme,
            other => panic!("line forest carries no scheme for class {other:?}"),
        }
    }
}

impl ForestQuery for UniformLineForest {
    fn ghost_type(&self) -> GhostType {
        self.ghost_type
    }

    fn num_local_trees(&self) -> usize {
        self.local.len()
    }

    fn tree_class(&self, _ltree: usize) -> ElementClass {
        ElementClass::Line
    }

    fn tree_num_elements(&self, ltree: usize) -> usize {
        self.local[ltree].elements.len()
    }

    fn tree_element(&self, ltree: usize, index: usize) -> &[u8] {
        self.local[ltree].elements.get(index)
    }

    fn global_tree_id(&self, ltree: usize) -> GlobalTreeId {
        GlobalTreeId(self.local[ltree].gtree)
    }

    fn neighbor_class(&self, _ltree: usize, _elem: &[u8], _face: usize) -> ElementClass {
        ElementClass::Line
    }

    fn half_face_neighbors(
        &self,
        ltree: usize,
        elem: &[u8],
        face: usize,
        neighbors: &mut ElementVec,
    ) -> Option<GlobalTreeId> {
        let e = LineElem::read(elem);
        let level = e.level as u8;
        debug_assert!(level < self.scheme.max_level(), "atom has no half neighbors");
        let len = self.scheme.len_at_level(level) as i64;
        let half = len / 2;
        let nx = match face {
            0 => e.x as i64 - half,
            1 => e.x as i64 + len,
            f => panic!("line element has no face {f}"),
        };
        let (gtree, nx) = self.wrap_to_tree(self.local[ltree].gtree, nx)?;
        debug_assert!(neighbors.len() >= 1 && neighbors.elem_size() == self.scheme.element_size());
        LineElem::new(level + 1, nx).write(neighbors.get_mut(0));
        Some(gtree)
    }

    fn face_neighbor(
        &self,
        ltree: usize,
        elem: &[u8],
        face: usize,
        neighbor: &mut [u8],
    ) -> Option<(GlobalTreeId, usize)> {
        let e = LineElem::read(elem);
        let level = e.level as u8;
        let len = self.scheme.len_at_level(level) as i64;
        let nx = match face {
            0 => e.x as i64 - len,
            1 => e.x as i64 + len,
            f => panic!("line element has no face {f}"),
        };
        let (gtree, nx) = self.wrap_to_tree(self.local[ltree].gtree, nx)?;
        LineElem::new(level, nx).write(neighbor);
        Some((gtree, 1 - face))
    }

    fn find_owner(&self, gtree: GlobalTreeId, elem: &[u8], class: ElementClass) -> usize {
        assert_eq!(class, ElementClass::Line, "foreign class in line forest");
        let (leaf, _) = self.leaf_span(elem);
        owner_of(&self.offsets, gtree.get() * self.per_tree() + leaf)
    }

    fn owners_at_face(
        &self,
        gtree: GlobalTreeId,
        elem: &[u8],
        class: ElementClass,
        face: usize,
        owners: &mut Vec<usize>,
    ) {
        assert_eq!(class, ElementClass::Line, "foreign class in line forest");
        owners.clear();
        let (first, count) = self.leaf_span(elem);
        // The face is a single point; exactly one leaf of `elem` touches it.
        let leaf = match face {
            0 => first,
            1 => first + count - 1,
            f => panic!("line element has no face {f}"),
        };
        owners.push(owner_of(
            &self.offsets,
            gtree.get() * self.per_tree() + leaf,
        ));
    }
}

impl UniformLineForest {
    /// Shift `x` into the owning tree along the row. `None` when the
    /// coordinate leaves the domain.
    fn wrap_to_tree(&self, gtree: u64, x: i64) -> Option<(GlobalTreeId, u32)> {
        let root = self.scheme.root_len() as i64;
        let (gtree, x) = if x < 0 {
            (gtree.checked_sub(1)?, x + root)
        } else if x >= root {
            if gtree + 1 >= self.num_trees {
                return None;
            }
            (gtree + 1, x - root)
        } else {
            (gtree, x)
        };
        Some((GlobalTreeId(gtree), x as u32))
    }
}

/// A strip of 2-D quad trees glued along the x axis.
pub struct UniformQuadForest {
    scheme: QuadScheme,
    level: u8,
    num_trees: u64,
    rank: usize,
    size: usize,
    offsets: Vec<u64>,
    local: Vec<LocalTree>,
    ghost_type: GhostType,
}

impl UniformQuadForest {
    /// Forest of `num_trees` quad trees refined to `level`, as seen from
    /// `rank` of `size`. Elements per tree: `4^level`, in Morton order.
    pub fn new(rank: usize, size: usize, num_trees: u64, level: u8, max_level: u8) -> Self {
        assert!(rank < size, "rank out of range");
        assert!(num_trees > 0, "forest needs at least one tree");
        assert!(level <= max_level, "refinement exceeds max level");
        let scheme = QuadScheme::with_max_level(max_level);
        let per_tree = 1u64 << (2 * level);
        let offsets = partition_offsets(num_trees * per_tree, size);
        let local = build_local_trees(
            &offsets,
            rank,
            per_tree,
            scheme.element_size(),
            |within, record| scheme.elem_at(level, within).write(record),
        );
        Self {
            scheme,
            level,
            num_trees,
            rank,
            size,
            offsets,
            local,
            ghost_type: GhostType::Faces,
        }
    }

    pub fn with_ghost_type(mut self, ghost_type: GhostType) -> Self {
        self.ghost_type = ghost_type;
        self
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    fn per_tree(&self) -> u64 {
        1u64 << (2 * self.level)
    }

    /// Anchor leaf coordinates of `elem` at the forest level, plus the side
    /// length of `elem` in forest-level leaves.
    fn leaf_anchor(&self, elem: &[u8]) -> (u32, u32, u32) {
        let e = QuadElem::read(elem);
        let shift = self.scheme.max_level() - self.level;
        let side = if (e.level as u8) <= self.level {
            1u32 << (self.level - e.level as u8)
        } else {
            1
        };
        (e.x >> shift, e.y >> shift, side)
    }

    fn leaf_owner(&self, gtree: u64, lx: u32, ly: u32) -> usize {
        let shift = self.scheme.max_level() - self.level;
        let mut record = vec![0u8; self.scheme.element_size()];
        QuadElem::new(self.level, lx << shift, ly << shift).write(&mut record);
        let morton = self.scheme.linear_id(&record, self.level);
        owner_of(&self.offsets, gtree * self.per_tree() + morton)
    }
}

impl SchemeRegistry for UniformQuadForest {
    fn scheme(&self, class: ElementClass) -> &dyn ElementScheme {
        match class {
            ElementClass::Quad => &self.scheme,
            other => panic!("quad forest carries no scheme for class {other:?}"),
        }
    }
}

impl ForestQuery for UniformQuadForest {
    fn ghost_type(&self) -> GhostType {
        self.ghost_type
    }

    fn num_local_trees(&self) -> usize {
        self.local.len()
    }

    fn tree_class(&self, _ltree: usize) -> ElementClass {
        ElementClass::Quad
    }

    fn tree_num_elements(&self, ltree: usize) -> usize {
        self.local[ltree].elements.len()
    }

    fn tree_element(&self, ltree: usize, index: usize) -> &[u8] {
        self.local[ltree].elements.get(index)
    }

    fn global_tree_id(&self, ltree: usize) -> GlobalTreeId {
        GlobalTreeId(self.local[ltree].gtree)
    }

    fn neighbor_class(&self, _ltree: usize, _elem: &[u8], _face: usize) -> ElementClass {
        ElementClass::Quad
    }

    fn half_face_neighbors(
        &self,
        ltree: usize,
        elem: &[u8],
        face: usize,
        neighbors: &mut ElementVec,
    ) -> Option<GlobalTreeId> {
        let e = QuadElem::read(elem);
        let level = e.level as u8;
        debug_assert!(level < self.scheme.max_level(), "atom has no half neighbors");
        let len = self.scheme.len_at_level(level) as i64;
        let half = len / 2;
        let (x, y) = (e.x as i64, e.y as i64);
        // Two child-sized neighbors per face, ordered along the face.
        let children: [(i64, i64); 2] = match face {
            0 => [(x - half, y), (x - half, y + half)],
            1 => [(x + len, y), (x + len, y + half)],
            2 => [(x, y - half), (x + half, y - half)],
            3 => [(x, y + len), (x + half, y + len)],
            f => panic!("quad element has no face {f}"),
        };
        debug_assert!(neighbors.len() >= 2 && neighbors.elem_size() == self.scheme.element_size());
        let mut gtree_out = None;
        for (slot, &(nx, ny)) in children.iter().enumerate() {
            let (gtree, nx, ny) = self.wrap_to_tree(self.local[ltree].gtree, nx, ny)?;
            QuadElem::new(level + 1, nx, ny).write(neighbors.get_mut(slot));
            gtree_out = Some(GlobalTreeId(gtree));
        }
        gtree_out
    }

    fn face_neighbor(
        &self,
        ltree: usize,
        elem: &[u8],
        face: usize,
        neighbor: &mut [u8],
    ) -> Option<(GlobalTreeId, usize)> {
        let e = QuadElem::read(elem);
        let level = e.level as u8;
        let len = self.scheme.len_at_level(level) as i64;
        let (x, y) = (e.x as i64, e.y as i64);
        let (nx, ny) = match face {
            0 => (x - len, y),
            1 => (x + len, y),
            2 => (x, y - len),
            3 => (x, y + len),
            f => panic!("quad element has no face {f}"),
        };
        let (gtree, nx, ny) = self.wrap_to_tree(self.local[ltree].gtree, nx, ny)?;
        QuadElem::new(level, nx, ny).write(neighbor);
        Some((GlobalTreeId(gtree), face ^ 1))
    }

    fn find_owner(&self, gtree: GlobalTreeId, elem: &[u8], class: ElementClass) -> usize {
        assert_eq!(class, ElementClass::Quad, "foreign class in quad forest");
        let morton = self.scheme.linear_id(elem, self.level);
        owner_of(&self.offsets, gtree.get() * self.per_tree() + morton)
    }

    fn owners_at_face(
        &self,
        gtree: GlobalTreeId,
        elem: &[u8],
        class: ElementClass,
        face: usize,
        owners: &mut Vec<usize>,
    ) {
        assert_eq!(class, ElementClass::Quad, "foreign class in quad forest");
        owners.clear();
        let (lx, ly, side) = self.leaf_anchor(elem);
        for step in 0..side {
            let (cx, cy) = match face {
                0 => (lx, ly + step),
                1 => (lx + side - 1, ly + step),
                2 => (lx + step, ly),
                3 => (lx + step, ly + side - 1),
                f => panic!("quad element has no face {f}"),
            };
            owners.push(self.leaf_owner(gtree.get(), cx, cy));
        }
        owners.sort_unstable();
        owners.dedup();
    }
}

impl UniformQuadForest {
    /// Shift `(x, y)` into the owning tree along the strip. `None` when the
    /// coordinates leave the domain.
    fn wrap_to_tree(&self, gtree: u64, x: i64, y: i64) -> Option<(u64, u32, u32)> {
        let root = self.scheme.root_len() as i64;
        if y < 0 || y >= root {
            return None;
        }
        let (gtree, x) = if x < 0 {
            (gtree.checked_sub(1)?, x + root)
        } else if x >= root {
            if gtree + 1 >= self.num_trees {
                return None;
            }
            (gtree + 1, x - root)
        } else {
            (gtree, x)
        };
        Some((gtree, x as u32, y as u32))
    }
}
