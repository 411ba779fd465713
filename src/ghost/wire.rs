//! # Ghost wire codec
//!
//! Serializes one remote bucket into the message its target rank receives:
//!
//! ```text
//! num_trees : u64
//!   tree 0:
//!     global_id : u64
//!     class     : u32      (pad to u32 alignment before)
//!     num_elems : u64      (pad to u64 alignment before)
//!     elements  : num_elems x element_size bytes (pad to ELEMENT_ALIGN before)
//!     (pad to u64 alignment after)
//!   tree 1: ...
//! ```
//!
//! All integers are little-endian fixed width. Padding rounds the running
//! offset up to the alignment of the next field; writer and parser share the
//! rule, and both verify that the final offset equals the buffer length. The
//! protocol is not self-describing: all ranks must agree on these widths.
//!
//! `element_size` depends on the class and comes from the receiver's scheme.

use crate::forest::GlobalTreeId;
use crate::ghost::remote_index::RemoteBucket;
use crate::ghost_error::GhostError;
use crate::scheme::{ElementClass, ElementVec, SchemeRegistry};

/// Alignment the element payload is padded to.
pub const ELEMENT_ALIGN: usize = 8;

const SIZE_INT: usize = std::mem::size_of::<u64>();
const GLOBAL_ID_INT: usize = std::mem::size_of::<u64>();
const CLASS_INT: usize = std::mem::size_of::<u32>();

/// Round `offset` up to a multiple of `align` (a power of two).
#[inline]
pub(crate) const fn align_up(offset: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

/// One (tree, class, elements) group parsed from a ghost message.
#[derive(Debug)]
pub struct TreeRun {
    pub global_id: GlobalTreeId,
    pub class: ElementClass,
    pub elements: ElementVec,
}

/// Exact byte length [`encode`] will produce for `bucket`.
pub fn encoded_len(bucket: &RemoteBucket) -> usize {
    let mut n = SIZE_INT;
    for tree in bucket.trees() {
        n = align_up(n, GLOBAL_ID_INT);
        n += GLOBAL_ID_INT;
        n = align_up(n, CLASS_INT);
        n += CLASS_INT;
        n = align_up(n, SIZE_INT);
        n += SIZE_INT;
        n = align_up(n, ELEMENT_ALIGN);
        n += tree.elements().byte_len();
        n = align_up(n, GLOBAL_ID_INT);
    }
    n
}

#[inline]
fn put_u64(buf: &mut [u8], offset: &mut usize, value: u64) {
    buf[*offset..*offset + 8].copy_from_slice(&value.to_le_bytes());
    *offset += 8;
}

#[inline]
fn put_u32(buf: &mut [u8], offset: &mut usize, value: u32) {
    buf[*offset..*offset + 4].copy_from_slice(&value.to_le_bytes());
    *offset += 4;
}

/// Serialize `bucket` into a fresh zero-padded buffer.
pub fn encode(bucket: &RemoteBucket) -> Vec<u8> {
    let num_bytes = encoded_len(bucket);
    let mut buf = vec![0u8; num_bytes];
    let mut written = 0usize;

    put_u64(&mut buf, &mut written, bucket.trees().len() as u64);
    for tree in bucket.trees() {
        written = align_up(written, GLOBAL_ID_INT);
        put_u64(&mut buf, &mut written, tree.global_id().get());
        written = align_up(written, CLASS_INT);
        put_u32(&mut buf, &mut written, tree.class().to_wire());
        written = align_up(written, SIZE_INT);
        put_u64(&mut buf, &mut written, tree.elements().len() as u64);
        written = align_up(written, ELEMENT_ALIGN);
        let payload = tree.elements().as_bytes();
        buf[written..written + payload.len()].copy_from_slice(payload);
        written += payload.len();
        written = align_up(written, GLOBAL_ID_INT);
    }

    assert_eq!(
        written, num_bytes,
        "ghost codec wrote {written} of {num_bytes} planned bytes"
    );
    buf
}

#[inline]
fn read_u64(sender: usize, bytes: &[u8], offset: &mut usize) -> Result<u64, GhostError> {
    let end = *offset + 8;
    if end > bytes.len() {
        return Err(GhostError::TruncatedMessage {
            sender,
            offset: *offset,
            len: bytes.len(),
        });
    }
    let v = u64::from_le_bytes(bytes[*offset..end].try_into().expect("8 bytes"));
    *offset = end;
    Ok(v)
}

#[inline]
fn read_u32(sender: usize, bytes: &[u8], offset: &mut usize) -> Result<u32, GhostError> {
    let end = *offset + 4;
    if end > bytes.len() {
        return Err(GhostError::TruncatedMessage {
            sender,
            offset: *offset,
            len: bytes.len(),
        });
    }
    let v = u32::from_le_bytes(bytes[*offset..end].try_into().expect("4 bytes"));
    *offset = end;
    Ok(v)
}

/// Parse one ghost message back into its tree runs.
///
/// Element widths are looked up in `schemes` by the class on the wire. Every
/// offset is bounds-checked and the final offset must consume the whole
/// buffer.
pub fn decode(
    sender: usize,
    bytes: &[u8],
    schemes: &dyn SchemeRegistry,
) -> Result<Vec<TreeRun>, GhostError> {
    let mut read = 0usize;
    let num_trees = read_u64(sender, bytes, &mut read)? as usize;
    let mut runs = Vec::with_capacity(num_trees);

    for _ in 0..num_trees {
        read = align_up(read, GLOBAL_ID_INT);
        let global_id = GlobalTreeId(read_u64(sender, bytes, &mut read)?);
        read = align_up(read, CLASS_INT);
        let tag = read_u32(sender, bytes, &mut read)?;
        let class = ElementClass::from_wire(tag)
            .ok_or(GhostError::UnknownClass { sender, tag })?;
        read = align_up(read, SIZE_INT);
        let num_elems = read_u64(sender, bytes, &mut read)? as usize;
        read = align_up(read, ELEMENT_ALIGN);

        let elem_size = schemes.scheme(class).element_size();
        let payload_len = num_elems.checked_mul(elem_size).ok_or({
            GhostError::TruncatedMessage {
                sender,
                offset: read,
                len: bytes.len(),
            }
        })?;
        let end = read.checked_add(payload_len).filter(|&e| e <= bytes.len()).ok_or({
            GhostError::TruncatedMessage {
                sender,
                offset: read,
                len: bytes.len(),
            }
        })?;
        let mut elements = ElementVec::new(elem_size);
        elements.extend_from_bytes(&bytes[read..end]);
        read = align_up(end, GLOBAL_ID_INT);

        runs.push(TreeRun {
            global_id,
            class,
            elements,
        });
    }

    if read != bytes.len() {
        return Err(GhostError::MessageLength {
            sender,
            parsed: read,
            received: bytes.len(),
        });
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ghost::remote_index::RemoteIndex;
    use crate::scheme::line::LineScheme;
    use crate::scheme::quad::{QuadElem, QuadScheme};
    use crate::scheme::{DefaultSchemes, ElementScheme};
    use proptest::prelude::*;

    fn line_bucket(trees: &[(u64, Vec<u64>)]) -> RemoteIndex {
        let scheme = LineScheme::default();
        let mut idx = RemoteIndex::new();
        let mut bytes = vec![0u8; scheme.element_size()];
        for &(gid, ref ids) in trees {
            for &id in ids {
                scheme.elem_at(12, id).write(&mut bytes);
                idx.add(1, GlobalTreeId(gid), ElementClass::Line, &scheme, &bytes);
            }
        }
        idx
    }

    #[test]
    fn round_trip_single_tree() {
        let idx = line_bucket(&[(3, vec![0, 1, 5])]);
        let bucket = idx.bucket(1).unwrap();
        let msg = encode(bucket);
        assert_eq!(msg.len(), encoded_len(bucket));
        let runs = decode(1, &msg, &DefaultSchemes::new()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].global_id, GlobalTreeId(3));
        assert_eq!(runs[0].class, ElementClass::Line);
        assert_eq!(runs[0].elements, *bucket.trees()[0].elements());
    }

    #[test]
    fn round_trip_mixed_classes() {
        let line = LineScheme::default();
        let quad = QuadScheme::default();
        let mut idx = RemoteIndex::new();
        let mut lb = vec![0u8; line.element_size()];
        line.elem_at(5, 9).write(&mut lb);
        idx.add(2, GlobalTreeId(0), ElementClass::Line, &line, &lb);
        let mut qb = vec![0u8; quad.element_size()];
        QuadElem::new(4, 16, 32).write(&mut qb);
        idx.add(2, GlobalTreeId(1), ElementClass::Quad, &quad, &qb);

        let bucket = idx.bucket(2).unwrap();
        let msg = encode(bucket);
        let runs = decode(2, &msg, &DefaultSchemes::new()).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].class, ElementClass::Line);
        assert_eq!(runs[1].class, ElementClass::Quad);
        assert_eq!(runs[1].elements.get(0), &qb[..]);
    }

    #[test]
    fn quad_payload_is_padded_to_element_align() {
        // A 12-byte quad record leaves the offset unaligned; the pad after
        // the payload must restore u64 alignment for the next tree header.
        let quad = QuadScheme::default();
        let mut idx = RemoteIndex::new();
        let mut qb = vec![0u8; quad.element_size()];
        QuadElem::new(1, 0, 0).write(&mut qb);
        idx.add(0, GlobalTreeId(0), ElementClass::Quad, &quad, &qb);
        QuadElem::new(1, 16384, 0).write(&mut qb);
        idx.add(0, GlobalTreeId(1), ElementClass::Quad, &quad, &qb);
        let bucket = idx.bucket(0).unwrap();
        let msg = encode(bucket);
        assert_eq!(msg.len() % 8, 0);
        let runs = decode(0, &msg, &DefaultSchemes::new()).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].global_id, GlobalTreeId(1));
    }

    #[test]
    fn truncated_message_is_rejected() {
        let idx = line_bucket(&[(0, vec![0, 1])]);
        let msg = encode(idx.bucket(1).unwrap());
        let schemes = DefaultSchemes::new();
        for cut in [1, 9, msg.len() - 1] {
            let err = decode(1, &msg[..cut], &schemes).unwrap_err();
            assert!(
                matches!(
                    err,
                    GhostError::TruncatedMessage { .. } | GhostError::MessageLength { .. }
                ),
                "cut at {cut}: {err}"
            );
        }
    }

    #[test]
    fn unknown_class_is_rejected() {
        let idx = line_bucket(&[(0, vec![0])]);
        let mut msg = encode(idx.bucket(1).unwrap());
        // Corrupt the class tag of the first tree (offset 8 + 8).
        msg[16] = 0xEE;
        let err = decode(1, &msg, &DefaultSchemes::new()).unwrap_err();
        assert!(matches!(err, GhostError::UnknownClass { tag: 0xEE, .. }));
    }

    proptest! {
        #[test]
        fn round_trip_random_buckets(
            trees in proptest::collection::vec(
                (0u64..64, proptest::collection::btree_set(0u64..4096, 1..24)),
                1..8,
            )
        ) {
            // Distinct ascending ids per tree keep the dedup out of the way.
            let trees: Vec<(u64, Vec<u64>)> = trees
                .into_iter()
                .map(|(gid, ids)| (gid, ids.into_iter().collect()))
                .collect();
            let idx = line_bucket(&trees);
            let bucket = idx.bucket(1).unwrap();
            let msg = encode(bucket);
            prop_assert_eq!(msg.len(), encoded_len(bucket));
            let runs = decode(1, &msg, &DefaultSchemes::new()).unwrap();
            // Tree ids may repeat in the input; the bucket groups only
            // consecutive runs, and the codec must preserve that shape.
            prop_assert_eq!(runs.len(), bucket.trees().len());
            for (run, tree) in runs.iter().zip(bucket.trees()) {
                prop_assert_eq!(run.global_id, tree.global_id());
                prop_assert_eq!(run.class, tree.class());
                prop_assert_eq!(&run.elements, tree.elements());
            }
        }
    }
}
