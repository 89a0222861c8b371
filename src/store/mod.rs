//! Segment storage backends.
//!
//! A store owns the root map (one tree per [`PromptScope`]) plus a pool of
//! detached segments that have been created but not attached yet. Every
//! successful mutation bumps the store version and records the ids it
//! touched, which is what the incremental compiler consumes.

pub mod memory;

use std::collections::BTreeSet;

use crate::types::{PromptScope, Segment, SegmentError, SegmentId};

/// Errors raised by store mutations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// No segment with this id exists in the store.
    #[error("Segment not found: {0}")]
    SegmentNotFound(SegmentId),
    /// No root is registered for this scope.
    #[error("Scope not found: {0}")]
    ScopeNotFound(PromptScope),
    /// The segment is already attached to a tree.
    #[error("Segment is not detached: {0}")]
    NotDetached(SegmentId),
    /// A segment with this id already exists.
    #[error("Duplicate segment id: {0}")]
    DuplicateId(SegmentId),
    /// `child` is not a direct child of `parent`.
    #[error("Segment {child} is not a child of {parent}")]
    NotAChild {
        /// Parent id.
        parent: SegmentId,
        /// Child id.
        child: SegmentId,
    },
    /// Children are replaced through `add_child`/`remove_child`, not updates.
    #[error("Children of {0} cannot be replaced by an update")]
    ChildrenNotUpdatable(SegmentId),
    /// Attaching would make a segment its own ancestor.
    #[error("Attaching {0} would create a cycle")]
    CycleRejected(SegmentId),
    /// Segment validation failed.
    #[error(transparent)]
    Segment(#[from] SegmentError),
}

/// Read side of a segment store.
///
/// Implementations must return scopes in [`PromptScope`] order.
pub trait SegmentStore {
    /// Find a segment anywhere in the store (roots first, then detached).
    fn get_segment_by_id(&self, id: &str) -> Option<&Segment>;

    /// Root segment of `scope`.
    fn get_root_segment(&self, scope: PromptScope) -> Option<&Segment>;

    /// Registered scopes.
    fn scopes(&self) -> Vec<PromptScope>;

    /// Monotonic version, bumped by every mutation.
    fn version(&self) -> u64;

    /// Drain the ids touched since the last call.
    fn take_changed_ids(&mut self) -> BTreeSet<SegmentId>;
}

pub use memory::InMemorySegmentStore;
