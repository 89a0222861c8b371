//! # prompt-kernel
//!
//! Editable segment trees for generative-image prompts.
//!
//! A prompt is held as a tree of segments (plain text, weighted groups,
//! named presets and inline wildcards) so editors can change one piece
//! without re-tokenizing the rest. The kernel converts in both directions:
//!
//! ```text
//! "a {b} (c|d) !style" ──parse──▶ Segment tree ──compile──▶ prompt text
//!                                       │
//!                                 CompileCache (incremental)
//! ```
//!
//! ## Core Contract
//!
//! 1. [`parse`] never fails: unmatched brackets become literal text
//! 2. [`compile`] never fails: a broken preset renders a visible `[ERROR: ...]` marker
//! 3. Balanced text round-trips: `compile(parse(t), literal) == t`
//! 4. Expansion is deterministic per seed, across full and incremental compiles
//!
//! ## Determinism Guarantees
//!
//! - One seeded generator per compile, shared by all siblings in tree order
//! - Dependency graphs and stores iterate in id / scope order
//! - Tree fingerprints use canonical JSON + xxh64

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod ops;
pub mod parser;
pub mod compiler;
pub mod cache;
pub mod store;
pub mod engine;
pub mod config;
pub mod canonical;

#[cfg(feature = "worker")]
pub mod worker;

// Re-exports
pub use types::{
    BracketType, Metadata, PresetMode, PromptScope, ScopeError, Segment, SegmentError, SegmentId,
    SegmentKind, SegmentKindTag, MAX_BRACKET_LEVEL, WEIGHT_BASE,
};
pub use types::{display_value, level_for_display_value, normalize_level};
pub use ops::{
    find_parent, find_segment_by_id, insert_segment, merge_adjacent_text_segments,
    optimize_segment_tree, optimize_segment_tree_with_limit, remove_segment,
    replace_segment_by_id, split_text_segment, update_segment, OptimizeReport, SegmentUpdate,
    OPTIMIZE_MAX_ITERATIONS,
};
pub use parser::{parse, ParenTable, MAX_NESTING_DEPTH};
pub use compiler::{
    compile, expand_nested_wildcards, serialize, CompileOptions, Compiler, SeededRandom,
    DEFAULT_MAX_WILDCARD_DEPTH,
};
pub use cache::{CacheConfig, CacheKey, CacheStats, CompileCache, IncrementalCompiler};
pub use store::{InMemorySegmentStore, SegmentStore, StoreError};
pub use engine::{EngineError, PromptEngine};
pub use config::{ConfigError, KernelConfig};
pub use canonical::{canonical_hash, canonical_hash_hex, content_fingerprint, to_canonical_bytes};

#[cfg(feature = "worker")]
pub use worker::{compile_in_background, BackgroundCompiler, PendingCompile, WorkerError};

/// Schema version of the serialized segment format.
/// Increment on breaking changes to any serialized type.
pub const PROMPT_KERNEL_SCHEMA_VERSION: &str = "1.0.0";
