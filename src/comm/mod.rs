//! Communication abstraction for intra-process (thread mailbox) and
//! inter-process (MPI) message passing.
//!
//! The ghost exchange needs exactly four primitives: a non-blocking send, a
//! blocking any-source probe, a matched receive, and a wait on outstanding
//! sends. Delivery is assumed pairwise-FIFO per tag; arrival order across
//! pairs is arbitrary.
//!
//! Wire format conventions live with the codec ([`crate::ghost::wire`]): all
//! integers are fixed-width native-endian-agreed (LE), buffers are raw bytes.

use once_cell::sync::Lazy;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use crate::ghost_error::GhostError;

/// Anything that can be waited on. Waiting releases the send buffer.
pub trait Wait {
    /// Block until the operation completed.
    fn wait(self);
}

/// An announced incoming message: who sent it and how many bytes it carries.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Probe {
    pub source: usize,
    pub num_bytes: usize,
}

/// Non-blocking send plus blocking probe/receive (minimal by design).
pub trait Communicator: Send + Sync {
    /// Handle returned by `isend`.
    type SendHandle: Wait;

    /// Post a non-blocking send of `buf` to `peer`. The communicator owns a
    /// copy of the bytes until the handle is waited on.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;

    /// Block until any peer has a message pending on `tag`; announce it
    /// without consuming it.
    fn probe(&self, tag: u16) -> Result<Probe, GhostError>;

    /// Receive the pending message from `peer` on `tag`. `num_bytes` must
    /// match the probed size.
    fn recv(&self, peer: usize, tag: u16, num_bytes: usize) -> Result<Vec<u8>, GhostError>;

    /// Returns true if this communicator is `NoComm` (for test logic).
    fn is_no_comm(&self) -> bool {
        false
    }

    /// Rank of this process (0..size-1).
    fn rank(&self) -> usize;
    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Synchronization barrier (default: no-op for non-MPI comms).
    fn barrier(&self) {}
}

/// Message tag of one ghost exchange.
///
/// Production use needs a single reserved tag
/// ([`GHOST_FOREST_TAG`](crate::ghost::GHOST_FOREST_TAG)): a committed
/// forest runs at most one exchange at a time. Tests that share the
/// process-wide mailbox give every world a tag of its own so their traffic
/// cannot mix.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CommTag(u16);

impl CommTag {
    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// The raw tag handed to the transport.
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }
}

/// Compile-time no-op comm for pure serial unit tests.
///
/// A single-rank world never has remote ranks, so the probe/recv side is
/// unreachable by construction and panics if hit.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) {}
}

impl Communicator for NoComm {
    type SendHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}

    fn probe(&self, _tag: u16) -> Result<Probe, GhostError> {
        panic!("NoComm has no peers to probe");
    }

    fn recv(&self, _peer: usize, _tag: u16, _num_bytes: usize) -> Result<Vec<u8>, GhostError> {
        panic!("NoComm has no peers to receive from");
    }

    fn is_no_comm(&self) -> bool {
        true
    }

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }
}

// --- ThreadComm: intra-process / multi-thread ---

type Key = (usize, u16); // (dst, tag)

#[derive(Default)]
struct Slot {
    q: VecDeque<(usize, Vec<u8>)>, // (src, message)
}

struct Mailbox {
    map: Mutex<HashMap<Key, Arc<(Mutex<Slot>, Condvar)>>>,
}

static MAILBOX: Lazy<Mailbox> = Lazy::new(|| Mailbox {
    map: Mutex::new(HashMap::new()),
});

fn mailbox_entry(key: Key) -> Arc<(Mutex<Slot>, Condvar)> {
    let mut g = MAILBOX.map.lock().expect("MAILBOX poisoned");
    g.entry(key)
        .or_insert_with(|| Arc::new((Mutex::new(Slot::default()), Condvar::new())))
        .clone()
}

pub struct ThreadSendHandle;

impl Wait for ThreadSendHandle {
    fn wait(self) {}
}

/// One mailbox rank inside the current process. Ranks of one logical world
/// share the process-wide mailbox; concurrent worlds must use distinct tags.
#[derive(Clone, Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
}

impl ThreadComm {
    pub fn new(rank: usize, size: usize) -> Self {
        assert!(rank < size, "rank out of range");
        Self { rank, size }
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ThreadSendHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let entry = mailbox_entry((peer, tag));
        let (lock, cv) = &*entry;
        {
            let mut slot = lock.lock().expect("Slot poisoned");
            slot.q.push_back((self.rank, buf.to_vec()));
        }
        cv.notify_all();
        ThreadSendHandle
    }

    fn probe(&self, tag: u16) -> Result<Probe, GhostError> {
        let entry = mailbox_entry((self.rank, tag));
        let (lock, cv) = &*entry;
        let mut slot = lock.lock().expect("Slot poisoned");
        loop {
            if let Some((src, msg)) = slot.q.front() {
                return Ok(Probe {
                    source: *src,
                    num_bytes: msg.len(),
                });
            }
            slot = cv.wait(slot).expect("Condvar poisoned");
        }
    }

    fn recv(&self, peer: usize, tag: u16, num_bytes: usize) -> Result<Vec<u8>, GhostError> {
        let entry = mailbox_entry((self.rank, tag));
        let (lock, cv) = &*entry;
        let mut slot = lock.lock().expect("Slot poisoned");
        loop {
            // Pairwise FIFO: the first queued message from `peer`.
            if let Some(pos) = slot.q.iter().position(|(src, _)| *src == peer) {
                let (_, msg) = slot.q.remove(pos).expect("position valid");
                if msg.len() != num_bytes {
                    return Err(GhostError::Comm {
                        neighbor: peer,
                        source: format!(
                            "matched message has {} bytes, expected {num_bytes}",
                            msg.len()
                        )
                        .into(),
                    });
                }
                return Ok(msg);
            }
            slot = cv.wait(slot).expect("Condvar poisoned");
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use core::ptr::NonNull;
    use mpi::collective::CommunicatorCollectives;
    use mpi::environment::Universe;
    use mpi::point_to_point::{Destination, Source};
    use mpi::topology::{Communicator as _, SimpleCommunicator};
    use mpi::traits::Equivalence;

    pub struct MpiComm {
        _universe: Universe,
        pub world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl Default for MpiComm {
        fn default() -> Self {
            let uni = mpi::initialize().expect("MPI already initialized");
            let world = uni.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                _universe: uni,
                world,
                rank,
                size,
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
            use mpi::request::StaticScope;
            let boxed = buf.to_vec().into_boxed_slice();
            let raw: *mut [u8] = Box::into_raw(boxed);
            let slice: &[u8] = unsafe { &*raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, slice, tag as i32);
            MpiSendHandle {
                req: Some(req),
                buf: Some(unsafe { NonNull::new_unchecked(raw) }),
            }
        }

        fn probe(&self, tag: u16) -> Result<Probe, GhostError> {
            let status = self.world.any_process().probe_with_tag(tag as i32);
            let source = status.source_rank() as usize;
            let num_bytes = status.count(u8::equivalent_datatype()) as usize;
            Ok(Probe { source, num_bytes })
        }

        fn recv(&self, peer: usize, tag: u16, num_bytes: usize) -> Result<Vec<u8>, GhostError> {
            let mut buf = vec![0u8; num_bytes];
            let _status = self
                .world
                .process_at_rank(peer as i32)
                .receive_into_with_tag(&mut buf[..], tag as i32);
            Ok(buf)
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }
        fn barrier(&self) {
            self.world.barrier();
        }
    }

    pub struct MpiSendHandle {
        req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
        buf: Option<NonNull<[u8]>>,
    }
    impl Wait for MpiSendHandle {
        fn wait(mut self) {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
        }
    }
    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(r) = self.req.take() {
                let _ = r.test();
                #[cfg(debug_assertions)]
                eprintln!("[MpiSendHandle::drop] send not explicitly waited");
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_comm_probe_matches_recv() {
        let a = ThreadComm::new(0, 2);
        let b = ThreadComm::new(1, 2);
        let tag = 0x7001;
        let t = std::thread::spawn(move || {
            b.isend(0, tag, &[1, 2, 3]).wait();
        });
        let p = a.probe(tag).unwrap();
        assert_eq!(p, Probe { source: 1, num_bytes: 3 });
        let msg = a.recv(p.source, tag, p.num_bytes).unwrap();
        assert_eq!(msg, vec![1, 2, 3]);
        t.join().unwrap();
    }

    #[test]
    fn thread_comm_recv_is_pairwise_fifo() {
        let a = ThreadComm::new(0, 3);
        let b = ThreadComm::new(1, 3);
        let c = ThreadComm::new(2, 3);
        let tag = 0x7002;
        b.isend(0, tag, &[10]).wait();
        b.isend(0, tag, &[11]).wait();
        c.isend(0, tag, &[20]).wait();
        // Receive from rank 2 first even though rank 1's messages queued earlier.
        assert_eq!(a.recv(2, tag, 1).unwrap(), vec![20]);
        assert_eq!(a.recv(1, tag, 1).unwrap(), vec![10]);
        assert_eq!(a.recv(1, tag, 1).unwrap(), vec![11]);
    }
}
