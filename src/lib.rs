//! # forest-ghost
//!
//! forest-ghost builds the ghost layer of a distributed adaptive space-tree
//! forest: the read-only copy of the face-neighbor elements that live on a
//! rank's partition boundary but are owned by other ranks, as needed by
//! numerical stencils at partition boundaries.
//!
//! ## Features
//! - Remote-element discovery over an abstract forest query surface, with
//!   balanced (half-neighbor) and general (owners-at-face) owner resolution
//! - A single all-to-some exchange per construction: non-blocking sends, one
//!   any-source probe loop, deterministic ascending-rank ingestion
//! - A compact ghost index keyed by sender rank and global tree id
//! - Pluggable communication backends (serial, thread mailbox, MPI) and
//!   element schemes (line, quad by default)
//!
//! ## Usage
//! Add `forest-ghost` as a dependency and enable features as needed:
//!
//! ```toml
//! [dependencies]
//! forest-ghost = "0.1"
//! # Optional features:
//! # features = ["mpi-support", "check-invariants"]
//! ```
//!
//! Construction is collective: every rank of the communicator calls
//! [`ghost::ghost_create`] on its committed forest, ships its boundary
//! elements and receives its ghosts.
//!
//! ```
//! use forest_ghost::prelude::*;
//!
//! // One rank, two line trees: nothing to ship, the layer is empty.
//! let forest = UniformLineForest::new(0, 1, 2, 3, 5);
//! let layer = ghost_create(&forest, &NoComm).unwrap().expect("faces ghost type");
//! assert_eq!(layer.num_ghost_elements(), 0);
//! GhostLayer::destroy(layer);
//! ```

pub mod comm;
pub mod forest;
pub mod ghost;
pub mod ghost_error;
pub mod scheme;

/// A convenient prelude to import the most-used traits & types.
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::comm::{CommTag, Communicator, NoComm, ThreadComm, Wait};
    pub use crate::forest::uniform::{UniformLineForest, UniformQuadForest};
    pub use crate::forest::{ForestQuery, GhostType, GlobalTreeId};
    pub use crate::ghost::{
        ghost_create, ghost_create_with, DiscoveryMethod, GhostLayer, GhostOptions,
        GhostProfile, GHOST_FOREST_TAG,
    };
    pub use crate::ghost_error::{CheckInvariants, GhostError};
    pub use crate::scheme::{
        DefaultSchemes, ElementClass, ElementScheme, ElementVec, SchemeRegistry,
    };
}
