//! # Ghost layer construction
//!
//! One collective entry point, [`ghost_create`], run on every rank of the
//! forest's communicator:
//!
//! 1. **Discovery** walks the local elements and fills the remote index with
//!    every element a neighbor rank must see.
//! 2. **Exchange** ships each rank's bucket in a single message, receives in
//!    arrival order and ingests in ascending sender rank.
//! 3. The resulting [`GhostLayer`] is immutable; queries are in
//!    [`layer::GhostLayer`], teardown in [`GhostLayer::destroy`].
//!
//! Following the ghost algorithm in p4est: "Scalable Algorithms for Parallel
//! Adaptive Mesh Refinement on Forests of Octrees" (Burstedde, Wilcox,
//! Ghattas).

pub mod discovery;
pub mod exchange;
pub mod layer;
pub mod remote_index;
pub mod wire;

use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};

use crate::comm::{CommTag, Communicator};
use crate::forest::{ForestQuery, GhostType};
use crate::ghost_error::{CheckInvariants, GhostError};

pub use discovery::DiscoveryMethod;
pub use layer::{GhostLayer, GhostProfile, GhostTree, RankOffsets};

/// Message tag reserved for ghost-forest traffic.
pub const GHOST_FOREST_TAG: CommTag = CommTag::new(0x67F0);

/// Knobs for [`ghost_create_with`].
#[derive(Copy, Clone, Debug)]
pub struct GhostOptions {
    /// Owner resolution strategy of the discovery walk.
    pub method: DiscoveryMethod,
    /// Message tag; concurrent worlds over one transport need distinct tags.
    pub tag: CommTag,
    /// Record wall-clock time and exchange counters in the layer.
    pub profile: bool,
}

impl Default for GhostOptions {
    fn default() -> Self {
        Self {
            method: DiscoveryMethod::default(),
            tag: GHOST_FOREST_TAG,
            profile: false,
        }
    }
}

/// Construct the face ghost layer of `forest`, collectively on all ranks.
///
/// Returns `None` (after a logged warning) when the forest's ghost type is
/// [`GhostType::None`].
pub fn ghost_create<F: ForestQuery, C: Communicator>(
    forest: &F,
    comm: &C,
) -> Result<Option<Arc<GhostLayer>>, GhostError> {
    ghost_create_with(forest, comm, GhostOptions::default())
}

/// [`ghost_create`] with explicit options.
pub fn ghost_create_with<F: ForestQuery, C: Communicator>(
    forest: &F,
    comm: &C,
    options: GhostOptions,
) -> Result<Option<Arc<GhostLayer>>, GhostError> {
    if forest.ghost_type() == GhostType::None {
        warn!("trying to construct ghosts with ghost type none; ghost layer is not constructed");
        return Ok(None);
    }

    let started = options.profile.then(Instant::now);
    let mut layer = GhostLayer::new();

    discovery::fill_remote(forest, &mut layer, comm.rank(), options.method);
    exchange::exchange(&mut layer, forest, comm, options.tag)?;

    if let Some(t0) = started {
        let profile = GhostProfile {
            runtime: t0.elapsed(),
            num_remote_ranks: layer.remote.num_ranks(),
            ghosts_received: layer.num_ghost_elements(),
            ghosts_shipped: layer.num_remote_elements(),
        };
        debug!(
            "ghost_create on rank {}: {} remote ranks, {} received, {} shipped in {:?}",
            comm.rank(),
            profile.num_remote_ranks,
            profile.ghosts_received,
            profile.ghosts_shipped,
            profile.runtime
        );
        layer.profile = Some(profile);
    }

    layer.assert_invariants();
    Ok(Some(Arc::new(layer)))
}
