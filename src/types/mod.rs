//! Core types for the prompt kernel.

pub mod segment;
pub mod weight;
pub mod scope;

pub use segment::{
    Metadata, PresetMode, Segment, SegmentError, SegmentId, SegmentKind, SegmentKindTag,
};
pub use weight::{
    display_value, level_for_display_value, normalize_level, BracketType, MAX_BRACKET_LEVEL,
    WEIGHT_BASE,
};
pub use scope::{PromptScope, ScopeError};
