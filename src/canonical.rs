//! Canonical serialization for deterministic hashing.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: struct fields serialize in declaration order
//! - Stable child order: children serialize in index order
//! - No HashMap allowed: segment metadata is a BTreeMap
//! - Stable float format: display values serialize consistently
//!
//! [`canonical_hash_hex`] over a [`Segment`] identifies one exact tree,
//! ids included. [`content_fingerprint`] drops the ids, so two trees that
//! were parsed separately from the same text share a content fingerprint.

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

use crate::types::{Segment, SegmentKind};

/// Serialize a value to canonical JSON bytes for hashing.
///
/// # Panics
///
/// Panics if the value cannot be represented as JSON (non-string map keys).
/// Every type in this crate serializes cleanly.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("Canonical serialization failed")
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    let bytes = to_canonical_bytes(value);
    xxh64(&bytes, 0)
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

#[derive(Serialize)]
struct ContentView<'a> {
    #[serde(flatten)]
    kind: &'a SegmentKind,
    children: Vec<ContentView<'a>>,
}

impl<'a> ContentView<'a> {
    fn of(segment: &'a Segment) -> Self {
        Self {
            kind: segment.kind(),
            children: segment.children().iter().map(ContentView::of).collect(),
        }
    }
}

/// Hex fingerprint of a tree's structure and content, ignoring ids and metadata.
pub fn content_fingerprint(segment: &Segment) -> String {
    canonical_hash_hex(&ContentView::of(segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::types::BracketType;

    #[test]
    fn test_determinism() {
        let tree = Segment::weighted(BracketType::Increase, 2, vec![Segment::text("kw")]);
        assert_eq!(canonical_hash(&tree), canonical_hash(&tree));
        assert_eq!(tree.fingerprint(), canonical_hash_hex(&tree));
        assert_eq!(tree.fingerprint().len(), 16);
    }

    #[test]
    fn test_ids_affect_fingerprint_not_content() {
        let a = parse("a {b} (c|d)");
        let b = parse("a {b} (c|d)");
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(content_fingerprint(&a), content_fingerprint(&b));
        assert_ne!(content_fingerprint(&a), content_fingerprint(&parse("a {b} (c|e)")));
    }

    #[test]
    fn test_metadata_ignored_by_content() {
        let plain = Segment::text("x");
        let tagged = plain.clone().with_metadata("source", serde_json::json!("ui"));
        assert_eq!(content_fingerprint(&plain), content_fingerprint(&tagged));
        assert_ne!(plain.fingerprint(), tagged.fingerprint());
    }
}
