//! Default 1-D scheme: bintree intervals on a `2^max_level` grid.
//!
//! An element at level `l` covers `2^(max_level - l)` grid units starting at
//! its anchor coordinate `x`; the anchor is always a multiple of the element
//! length. Face 0 is the low-`x` end, face 1 the high-`x` end.

use bytemuck::{Pod, Zeroable};

use super::ElementScheme;

/// Default maximum refinement depth of the line scheme.
pub const LINE_DEFAULT_MAX_LEVEL: u8 = 21;

/// Element record of the line scheme.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Pod, Zeroable)]
pub struct LineElem {
    pub level: u32,
    /// Anchor coordinate in grid units of `2^max_level`.
    pub x: u32,
}

impl LineElem {
    #[inline]
    pub fn new(level: u8, x: u32) -> Self {
        Self {
            level: level as u32,
            x,
        }
    }

    /// Read a record from opaque element bytes.
    #[inline]
    pub fn read(elem: &[u8]) -> Self {
        bytemuck::pod_read_unaligned(elem)
    }

    /// Write this record into opaque element bytes.
    #[inline]
    pub fn write(self, elem: &mut [u8]) {
        elem.copy_from_slice(bytemuck::bytes_of(&self));
    }
}

/// The 1-D bintree scheme.
#[derive(Copy, Clone, Debug)]
pub struct LineScheme {
    max_level: u8,
}

impl Default for LineScheme {
    fn default() -> Self {
        Self {
            max_level: LINE_DEFAULT_MAX_LEVEL,
        }
    }
}

impl LineScheme {
    /// Scheme with a custom maximum level (tests use shallow grids).
    pub fn with_max_level(max_level: u8) -> Self {
        assert!(max_level >= 1 && max_level <= 31, "line max level out of range");
        Self { max_level }
    }

    /// Root length in grid units.
    #[inline]
    pub fn root_len(&self) -> u32 {
        1 << self.max_level
    }

    /// Element length in grid units at `level`.
    #[inline]
    pub fn len_at_level(&self, level: u8) -> u32 {
        debug_assert!(level <= self.max_level);
        1 << (self.max_level - level)
    }

    /// Element with the given position in the level-`level` linear order.
    pub fn elem_at(&self, level: u8, linear_id: u64) -> LineElem {
        debug_assert!(linear_id < 1u64 << level);
        LineElem::new(level, (linear_id as u32) << (self.max_level - level))
    }
}

impl ElementScheme for LineScheme {
    fn element_size(&self) -> usize {
        std::mem::size_of::<LineElem>()
    }

    fn max_level(&self) -> u8 {
        self.max_level
    }

    fn level(&self, elem: &[u8]) -> u8 {
        LineElem::read(elem).level as u8
    }

    fn linear_id(&self, elem: &[u8], level: u8) -> u64 {
        debug_assert!(level <= self.max_level);
        (LineElem::read(elem).x >> (self.max_level - level)) as u64
    }

    fn num_faces(&self, _elem: &[u8]) -> usize {
        2
    }

    fn num_face_children(&self, _elem: &[u8], _face: usize) -> usize {
        1
    }
}
