//! Ghost element exchange.
//!
//! Every rank posts all its sends before entering the receive loop, so no
//! rank waits on a receive before its peers have messages to probe. The
//! remote-rank list mirrors the set of expected senders by symmetry of the
//! face-neighbor relation, which is how the loop knows how many messages to
//! expect.
//!
//! Messages are received in arrival order (a single blocking any-source
//! probe) but ingested in ascending sender rank, so the layer's rank
//! offsets and element layout come out deterministic.

use std::collections::HashMap;

use log::debug;

use crate::comm::{CommTag, Communicator, Wait};
use crate::forest::ForestQuery;
use crate::ghost::layer::GhostLayer;
use crate::ghost::wire;
use crate::ghost_error::GhostError;

/// Build the send buffer for every remote rank and post the sends.
///
/// Counts the shipped elements while packing. Does not block; the returned
/// handles own the buffers until [`send_end`].
pub(crate) fn send_start<C: Communicator>(
    layer: &mut GhostLayer,
    comm: &C,
    tag: CommTag,
) -> Vec<C::SendHandle> {
    let mut handles = Vec::with_capacity(layer.remote.num_ranks());
    for &rank in layer.remote.ranks() {
        let bucket = layer
            .remote
            .bucket(rank)
            .expect("listed rank has a bucket");
        let msg = wire::encode(bucket);
        layer.num_remote_elements += bucket.num_elements();
        debug!(
            "post send of {} trees, {} bytes to rank {rank}",
            bucket.trees().len(),
            msg.len()
        );
        handles.push(comm.isend(rank, tag.get(), &msg));
    }
    handles
}

/// Probe, receive and ingest until every expected sender delivered.
pub(crate) fn receive<F: ForestQuery, C: Communicator>(
    layer: &mut GhostLayer,
    forest: &F,
    comm: &C,
    tag: CommTag,
) -> Result<(), GhostError> {
    let num_remotes = layer.remote.num_ranks();
    if num_remotes == 0 {
        return Ok(());
    }

    // Expected senders in ascending rank order; ingestion follows this order
    // no matter how the messages arrive.
    layer.remote.sort_ranks();
    let ranks: Vec<usize> = layer.remote.ranks().to_vec();
    let pos_of_rank: HashMap<usize, usize> =
        ranks.iter().enumerate().map(|(i, &r)| (r, i)).collect();

    let mut buffers: Vec<Option<Vec<u8>>> = (0..num_remotes).map(|_| None).collect();
    let mut received = vec![false; num_remotes];
    let mut num_received = 0usize;
    let mut next_parse = 0usize;

    while num_received < num_remotes {
        let probe = comm.probe(tag.get())?;
        let pos = *pos_of_rank
            .get(&probe.source)
            .unwrap_or_else(|| panic!("unexpected ghost message from rank {}", probe.source));
        assert!(!received[pos], "second ghost message from rank {}", probe.source);

        debug!("receive {} bytes from rank {}", probe.num_bytes, probe.source);
        buffers[pos] = Some(comm.recv(probe.source, tag.get(), probe.num_bytes)?);
        received[pos] = true;
        num_received += 1;

        // Ingest every message that is now next in rank order.
        while next_parse < num_remotes && received[next_parse] {
            let bytes = buffers[next_parse].take().expect("received buffer present");
            let runs = wire::decode(ranks[next_parse], &bytes, forest)?;
            layer.append_run(ranks[next_parse], runs);
            next_parse += 1;
        }
    }

    assert_eq!(next_parse, num_remotes, "undelivered ghost messages remain");
    Ok(())
}

/// Wait for all outstanding sends; releases the send buffers.
pub(crate) fn send_end<H: Wait>(handles: Vec<H>) {
    for handle in handles {
        handle.wait();
    }
}

/// The full exchange: start sends, receive and ingest, finish sends.
pub(crate) fn exchange<F: ForestQuery, C: Communicator>(
    layer: &mut GhostLayer,
    forest: &F,
    comm: &C,
    tag: CommTag,
) -> Result<(), GhostError> {
    let sends = send_start(layer, comm, tag);
    receive(layer, forest, comm, tag)?;
    send_end(sends);
    Ok(())
}
