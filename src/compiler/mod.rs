//! Segment tree → prompt text.
//!
//! Compilation is a depth-first reduction. It never fails: a fixed preset
//! without a selection renders as a visible `[ERROR: ...]` marker so the
//! problem shows up in the prompt rather than as a crash.
//!
//! With `expand_wildcards`, random presets and inline wildcards draw from a
//! single [`SeededRandom`] stream reseeded once per compile, so the same seed
//! always yields the same expansion of the whole tree.

pub mod rng;
pub mod wildcard;

use serde::{Deserialize, Serialize};

use crate::types::{PresetMode, Segment, SegmentKind};
pub use rng::SeededRandom;
pub use wildcard::{expand_nested_wildcards, NestedWildcardExpander, DEFAULT_MAX_WILDCARD_DEPTH};

/// Options controlling a compile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Resolve random presets and inline wildcards instead of emitting their syntax.
    pub expand_wildcards: bool,
    /// Seed for the expansion stream.
    pub seed: u64,
}

impl CompileOptions {
    /// Emit wildcard syntax literally.
    pub fn literal() -> Self {
        Self::default()
    }

    /// Expand wildcards with `seed`.
    pub fn expanded(seed: u64) -> Self {
        Self {
            expand_wildcards: true,
            seed,
        }
    }
}

/// Compile a tree with a fresh [`Compiler`].
pub fn compile(segment: &Segment, options: &CompileOptions) -> String {
    Compiler::new(*options).compile(segment)
}

/// Marker emitted for a fixed preset without a selection.
pub fn missing_selection_marker(name: &str) -> String {
    format!("[ERROR: preset \"{}\" has no selection]", name)
}

/// Uncached compiler.
#[derive(Debug, Clone)]
pub struct Compiler {
    options: CompileOptions,
    rng: SeededRandom,
    max_wildcard_depth: usize,
}

impl Compiler {
    /// Create a compiler for `options`.
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            rng: SeededRandom::new(options.seed),
            max_wildcard_depth: DEFAULT_MAX_WILDCARD_DEPTH,
        }
    }

    /// Override the nested wildcard depth cap.
    pub fn with_max_wildcard_depth(mut self, max_depth: usize) -> Self {
        self.max_wildcard_depth = max_depth;
        self
    }

    /// Compile `segment`, reseeding the generator first.
    pub fn compile(&mut self, segment: &Segment) -> String {
        self.rng = SeededRandom::new(self.options.seed);
        render_segment(self, segment)
    }
}

impl ChildCompiler for Compiler {
    fn compile_child(&mut self, child: &Segment) -> String {
        render_segment(self, child)
    }

    fn options(&self) -> &CompileOptions {
        &self.options
    }

    fn rng(&mut self) -> &mut SeededRandom {
        &mut self.rng
    }

    fn max_wildcard_depth(&self) -> usize {
        self.max_wildcard_depth
    }
}

/// Recursion hook shared by the plain and cached compilers.
///
/// [`render_segment`] owns the per-variant rules; implementors decide how a
/// child is compiled (directly, or through a cache).
pub(crate) trait ChildCompiler {
    fn compile_child(&mut self, child: &Segment) -> String;
    fn options(&self) -> &CompileOptions;
    fn rng(&mut self) -> &mut SeededRandom;
    fn max_wildcard_depth(&self) -> usize;
}

pub(crate) fn render_segment<C: ChildCompiler + ?Sized>(compiler: &mut C, segment: &Segment) -> String {
    let expand = compiler.options().expand_wildcards;
    match segment.kind() {
        SegmentKind::Text { content } => {
            // Text should be a leaf; stray children are still rendered.
            let mut out = content.clone();
            for child in segment.children() {
                out.push_str(&compiler.compile_child(child));
            }
            out
        }
        SegmentKind::Weighted {
            bracket_type,
            bracket_level,
            ..
        } => {
            let mut inner = String::new();
            for child in segment.children() {
                inner.push_str(&compiler.compile_child(child));
            }
            wrap(&inner, bracket_type.open_char(), bracket_type.close_char(), *bracket_level)
        }
        SegmentKind::Preset {
            name,
            mode: PresetMode::Random,
            values,
            ..
        } => {
            if !expand {
                return format!("!{}", name);
            }
            compiler
                .rng()
                .pick_index(values.len())
                .map(|i| values[i].clone())
                .unwrap_or_default()
        }
        SegmentKind::Preset {
            name,
            mode: PresetMode::Fixed,
            selected,
            ..
        } => selected
            .clone()
            .unwrap_or_else(|| missing_selection_marker(name)),
        SegmentKind::InlineWildcard { options } => {
            if !expand {
                return format!("({})", options.join("|"));
            }
            let Some(index) = compiler.rng().pick_index(options.len()) else {
                return String::new();
            };
            let max_depth = compiler.max_wildcard_depth();
            NestedWildcardExpander::new(compiler.rng(), max_depth).expand_at(&options[index], 1)
        }
    }
}

fn wrap(inner: &str, open: char, close: char, level: u8) -> String {
    let level = usize::from(level);
    let mut out = String::with_capacity(inner.len() + 2 * level);
    out.extend(std::iter::repeat(open).take(level));
    out.push_str(inner);
    out.extend(std::iter::repeat(close).take(level));
    out
}

/// Render the editable prompt syntax of a tree.
///
/// Unlike [`compile`], fixed presets keep their name (`name:value`), so the
/// output parses back to an equivalent tree. A fixed preset without a
/// selection renders as `name:`.
pub fn serialize(segment: &Segment) -> String {
    let mut out = match segment.kind() {
        SegmentKind::Text { content } => content.clone(),
        SegmentKind::Weighted { .. } => String::new(),
        SegmentKind::Preset {
            name,
            mode: PresetMode::Random,
            ..
        } => format!("!{}", name),
        SegmentKind::Preset {
            name,
            mode: PresetMode::Fixed,
            selected,
            ..
        } => format!("{}:{}", name, selected.as_deref().unwrap_or_default()),
        SegmentKind::InlineWildcard { options } => format!("({})", options.join("|")),
    };
    let children: String = segment.children().iter().map(serialize).collect();
    if let SegmentKind::Weighted {
        bracket_type,
        bracket_level,
        ..
    } = segment.kind()
    {
        out = wrap(&children, bracket_type.open_char(), bracket_type.close_char(), *bracket_level);
    } else {
        out.push_str(&children);
    }
    out
}
