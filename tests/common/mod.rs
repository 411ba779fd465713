#![allow(dead_code)] // each test binary uses its own subset of these helpers

//! Thread-per-rank worlds over the process-wide mailbox communicator.
//!
//! Every test must use its own tag: the mailbox is shared by all tests in
//! the process and ranks are numbered per world.

use std::sync::Arc;
use std::time::Duration;

use forest_ghost::prelude::*;

/// Run `ghost_create_with` on `size` ranks, one thread each, and return the
/// per-rank layers. `delay_ms[rank]` staggers a rank's start, which fixes
/// the arrival order of its sends at the receivers.
pub fn run_world<F>(
    size: usize,
    tag: u16,
    method: DiscoveryMethod,
    delay_ms: Option<Vec<u64>>,
    forest_of: impl Fn(usize) -> F + Send + Sync + 'static,
) -> Vec<Arc<GhostLayer>>
where
    F: ForestQuery + 'static,
{
    let forest_of = Arc::new(forest_of);
    let options = GhostOptions {
        method,
        tag: CommTag::new(tag),
        profile: true,
    };
    let handles: Vec<_> = (0..size)
        .map(|rank| {
            let forest_of = Arc::clone(&forest_of);
            let delay = delay_ms.as_ref().map_or(0, |d| d[rank]);
            std::thread::spawn(move || {
                if delay > 0 {
                    std::thread::sleep(Duration::from_millis(delay));
                }
                let forest = forest_of(rank);
                let comm = ThreadComm::new(rank, size);
                ghost_create_with(&forest, &comm, options)
                    .expect("exchange succeeds")
                    .expect("ghost type is faces")
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread completes"))
        .collect()
}

pub fn run_line_world(
    size: usize,
    tag: u16,
    num_trees: u64,
    level: u8,
    max_level: u8,
) -> Vec<Arc<GhostLayer>> {
    run_world(size, tag, DiscoveryMethod::Balanced, None, move |rank| {
        UniformLineForest::new(rank, size, num_trees, level, max_level)
    })
}

pub fn run_quad_world(
    size: usize,
    tag: u16,
    num_trees: u64,
    level: u8,
    max_level: u8,
) -> Vec<Arc<GhostLayer>> {
    run_world(size, tag, DiscoveryMethod::Balanced, None, move |rank| {
        UniformQuadForest::new(rank, size, num_trees, level, max_level)
    })
}
