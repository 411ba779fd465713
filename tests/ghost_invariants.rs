//! Quantified invariants of the ghost layer, checked across whole worlds.

mod common;

use common::{run_line_world, run_quad_world};
use forest_ghost::ghost::wire;
use forest_ghost::prelude::*;
use forest_ghost::scheme::line::LineScheme;
use forest_ghost::scheme::quad::QuadScheme;

/// Symmetry: `a` ships to `b` iff `b` ships to `a`.
#[test]
fn remote_rank_lists_are_symmetric() {
    let layers = run_quad_world(8, 0x7A00, 1, 2, 4);
    for (a, layer_a) in layers.iter().enumerate() {
        for (b, layer_b) in layers.iter().enumerate() {
            if a == b {
                continue;
            }
            assert_eq!(
                layer_a.remote_ranks().contains(&b),
                layer_b.remote_ranks().contains(&a),
                "ranks {a} and {b}"
            );
        }
    }
}

/// Volume conservation: shipped totals equal received totals world-wide.
#[test]
fn shipped_equals_received_across_world() {
    for (tag, layers) in [
        (0x7B00, run_line_world(4, 0x7B00, 3, 2, 5)),
        (0x7B01, run_quad_world(6, 0x7B01, 2, 2, 4)),
    ] {
        let shipped: u64 = layers.iter().map(|l| l.num_remote_elements()).sum();
        let received: u64 = layers.iter().map(|l| l.num_ghost_elements()).sum();
        assert_eq!(shipped, received, "world 0x{tag:x}");
        assert!(shipped > 0, "world 0x{tag:x} exchanged nothing");
    }
}

/// Dedup: no two adjacent elements of a remote tree share level and linear id.
#[test]
fn remote_trees_hold_no_adjacent_duplicates() {
    let layers = run_quad_world(4, 0x7C00, 1, 3, 5);
    let scheme = QuadScheme::with_max_level(5);
    for layer in &layers {
        for bucket in layer.remote_index().iter() {
            for tree in bucket.trees() {
                let elements = tree.elements();
                for i in 1..elements.len() {
                    let a = elements.get(i - 1);
                    let b = elements.get(i);
                    let key = |e: &[u8]| {
                        let level = scheme.level(e);
                        (level, scheme.linear_id(e, level))
                    };
                    assert_ne!(key(a), key(b), "adjacent duplicate in tree");
                }
            }
        }
    }
}

/// Rank-monotone ingestion: sender start offsets grow with the sender rank.
#[test]
fn rank_offsets_are_monotone_in_sender_rank() {
    let layers = run_quad_world(8, 0x7D00, 1, 2, 4);
    for layer in &layers {
        let mut previous = None;
        for &rank in layer.remote_ranks() {
            let offsets = layer.rank_offsets(rank).expect("sender recorded");
            let key = (offsets.first_tree, offsets.first_element);
            if let Some(prev) = previous {
                assert!(prev <= key, "offsets regressed: {prev:?} > {key:?}");
            }
            previous = Some(key);
        }
    }
}

/// Codec round-trip: every constructed bucket re-parses to the same runs.
#[test]
fn buckets_round_trip_through_the_codec() {
    let layers = run_line_world(4, 0x7E00, 2, 3, 5);
    let schemes = DefaultSchemes::new();
    for layer in &layers {
        for bucket in layer.remote_index().iter() {
            let msg = wire::encode(bucket);
            assert_eq!(msg.len(), wire::encoded_len(bucket));
            let runs = wire::decode(bucket.rank(), &msg, &schemes).expect("well-formed");
            assert_eq!(runs.len(), bucket.trees().len());
            for (run, tree) in runs.iter().zip(bucket.trees()) {
                assert_eq!(run.global_id, tree.global_id());
                assert_eq!(run.class, tree.class());
                assert_eq!(&run.elements, tree.elements());
            }
        }
    }
}

/// Boundary skip: elements whose faces all touch the domain boundary never
/// enter a bucket, and shipped elements all sit at the partition boundary.
#[test]
fn domain_boundary_elements_are_skipped() {
    // Level-2 line tree split between two ranks: only linear ids 1 and 2
    // touch the partition boundary.
    let layers = run_line_world(2, 0x7F00, 1, 2, 5);
    let scheme = LineScheme::with_max_level(5);
    let expected = [1u64, 2u64];
    for (rank, layer) in layers.iter().enumerate() {
        for bucket in layer.remote_index().iter() {
            for tree in bucket.trees() {
                for elem in tree.elements().iter() {
                    let id = scheme.linear_id(elem, scheme.level(elem));
                    assert_eq!(id, expected[rank], "rank {rank} shipped linear id {id}");
                }
            }
        }
    }
}

/// Self-exclusion: no rank ships to itself.
#[test]
fn no_bucket_targets_the_owning_rank() {
    let layers = run_quad_world(4, 0x8000, 2, 2, 4);
    for (rank, layer) in layers.iter().enumerate() {
        assert!(
            !layer.remote_ranks().contains(&rank),
            "rank {rank} ships to itself"
        );
        assert!(layer.rank_offsets(rank).is_none());
    }
}

/// The fallible validators accept every layer a real exchange produces.
#[test]
fn constructed_layers_validate() {
    let layers = run_quad_world(4, 0x8100, 1, 2, 4);
    for layer in &layers {
        layer.validate_invariants().expect("layer invariants hold");
        layer
            .remote_index()
            .validate_invariants()
            .expect("remote index invariants hold");
    }
}
