//! GhostError: unified error type for the forest-ghost public APIs.
//!
//! Only failures that a caller can meaningfully observe are represented here:
//! transport failures and malformed wire messages. Contract violations
//! (out-of-range indices, unexpected sender ranks, class mismatches between a
//! message and an already-known ghost tree) denote internal bugs or corrupt
//! peers and abort via panic instead.
//!
//! The [`CheckInvariants`] trait sits in between: the remote index and the
//! ghost layer can report a broken structural invariant as a value for tests,
//! while production builds treat the same finding as fatal.

use thiserror::Error;

/// Unified error type for ghost-layer operations.
#[derive(Debug, Error)]
pub enum GhostError {
    /// The message layer reported a failure talking to `neighbor`.
    #[error("communication with rank {neighbor} failed: {source}")]
    Comm {
        neighbor: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A ghost message ended before the field at `offset` could be read.
    #[error("ghost message from rank {sender} truncated at byte {offset} (message is {len} bytes)")]
    TruncatedMessage {
        sender: usize,
        offset: usize,
        len: usize,
    },
    /// A ghost message carried an element-class tag this build does not know.
    #[error("ghost message from rank {sender} carries unknown element class tag {tag}")]
    UnknownClass { sender: usize, tag: u32 },
    /// The parsed byte count disagrees with the received byte count.
    #[error("ghost message from rank {sender}: parsed {parsed} of {received} received bytes")]
    MessageLength {
        sender: usize,
        parsed: usize,
        received: usize,
    },
    /// An invariant walk found a broken data-structure invariant.
    #[error("ghost invariant violated: {0}")]
    Invariant(String),
}

/// Structural self-checks for the ghost accumulators.
///
/// The remote index promises a duplicate-free rank list with nonempty
/// buckets; the ghost layer promises that its global-id map, rank offsets
/// and counters agree with the tree array. `validate_invariants` walks the
/// structure and reports the first broken promise as
/// [`GhostError::Invariant`], so tests can inspect it.
pub trait CheckInvariants {
    /// Walk the structure and return the first broken invariant.
    fn validate_invariants(&self) -> Result<(), GhostError>;

    /// Run the same walk and treat a finding as a fatal contract violation.
    ///
    /// Compiled to a no-op in release builds unless the `check-invariants`
    /// feature is enabled.
    fn assert_invariants(&self) {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = self.validate_invariants() {
            panic!("{e}");
        }
    }
}
