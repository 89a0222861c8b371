//! Segment types for the prompt tree.
//!
//! A prompt is an owned tree of [`Segment`]s. Each segment has a stable
//! [`SegmentId`], a variant payload ([`SegmentKind`]), ordered children and
//! an open metadata map. Trees are values: operations in [`crate::ops`]
//! return new trees and never mutate their input.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::weight::{display_value, normalize_level, BracketType};

/// Open metadata attached to a segment (color hints, cached aggregates).
///
/// BTreeMap keeps serialization order stable for fingerprints.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Unique identifier for a segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(String);

impl SegmentId {
    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, globally unique id.
    pub fn generate() -> Self {
        Self(format!("seg_{}", Uuid::new_v4().simple()))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SegmentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SegmentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for SegmentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Resolution mode of a preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetMode {
    /// Wildcard: one of the cached values is drawn at compile time.
    Random,
    /// Keyword: always resolves to the selected value.
    Fixed,
}

impl PresetMode {
    /// Parse preset mode from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "random" => Some(Self::Random),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }
}

impl fmt::Display for PresetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => write!(f, "random"),
            Self::Fixed => write!(f, "fixed"),
        }
    }
}

/// Variant payload of a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentKind {
    /// Literal prompt text.
    Text {
        /// The literal content.
        content: String,
    },
    /// Bracket-weighted group of children.
    Weighted {
        /// Bracket direction.
        bracket_type: BracketType,
        /// Nesting level in `[0, 78]`.
        bracket_level: u8,
        /// Derived weight, `1.05^±level`.
        display_value: f64,
    },
    /// Named placeholder resolved randomly or to a fixed selection.
    Preset {
        /// Preset name (non-empty).
        name: String,
        /// Resolution mode.
        mode: PresetMode,
        /// Selected value for fixed presets.
        selected: Option<String>,
        /// Cached candidate values.
        values: Vec<String>,
    },
    /// Unnamed pipe-delimited alternatives.
    InlineWildcard {
        /// Non-empty alternatives.
        options: Vec<String>,
    },
}

impl SegmentKind {
    /// Text payload.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    /// Weighted payload with a normalized level and derived display value.
    pub fn weighted(bracket_type: BracketType, level: i64) -> Self {
        let bracket_level = normalize_level(level);
        Self::Weighted {
            bracket_type,
            bracket_level,
            display_value: display_value(bracket_type, bracket_level),
        }
    }

    /// Tag identifying the variant.
    pub fn tag(&self) -> SegmentKindTag {
        match self {
            Self::Text { .. } => SegmentKindTag::Text,
            Self::Weighted { .. } => SegmentKindTag::Weighted,
            Self::Preset { .. } => SegmentKindTag::Preset,
            Self::InlineWildcard { .. } => SegmentKindTag::InlineWildcard,
        }
    }

    /// Validate and normalize the payload.
    fn normalized(self) -> Result<Self, SegmentError> {
        match self {
            Self::Text { .. } => Ok(self),
            Self::Weighted {
                bracket_type,
                bracket_level,
                ..
            } => Ok(Self::weighted(bracket_type, i64::from(bracket_level))),
            Self::Preset {
                name,
                mode,
                selected,
                values,
            } => {
                if name.trim().is_empty() {
                    return Err(SegmentError::EmptyName);
                }
                let selected = selected
                    .filter(|s| !s.is_empty())
                    .or_else(|| match mode {
                        PresetMode::Fixed => values.first().cloned(),
                        PresetMode::Random => None,
                    });
                Ok(Self::Preset {
                    name,
                    mode,
                    selected,
                    values,
                })
            }
            Self::InlineWildcard { options } => Ok(Self::InlineWildcard {
                options: normalize_options(options)?,
            }),
        }
    }
}

/// Drop blank wildcard options; fail if nothing remains.
pub(crate) fn normalize_options(options: Vec<String>) -> Result<Vec<String>, SegmentError> {
    let options: Vec<String> = options
        .into_iter()
        .filter(|o| !o.trim().is_empty())
        .collect();
    if options.is_empty() {
        return Err(SegmentError::InvalidOptions);
    }
    Ok(options)
}

/// Discriminant of [`SegmentKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKindTag {
    /// [`SegmentKind::Text`].
    Text,
    /// [`SegmentKind::Weighted`].
    Weighted,
    /// [`SegmentKind::Preset`].
    Preset,
    /// [`SegmentKind::InlineWildcard`].
    InlineWildcard,
}

impl fmt::Display for SegmentKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Weighted => write!(f, "weighted"),
            Self::Preset => write!(f, "preset"),
            Self::InlineWildcard => write!(f, "inline_wildcard"),
        }
    }
}

/// Errors raised by segment construction and mutation.
///
/// These are contract violations by the caller. Malformed prompt text never
/// produces one of these; the parser and compiler degrade to visible text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SegmentError {
    /// Preset name is empty or whitespace.
    #[error("Preset name must not be empty")]
    EmptyName,
    /// Inline wildcard has no non-blank option.
    #[error("Inline wildcard requires at least one non-empty option")]
    InvalidOptions,
    /// Split position outside `[0, length]`.
    #[error("Split position {position} outside 0..={length}")]
    InvalidRange {
        /// Requested position (graphemes).
        position: usize,
        /// Text length (graphemes).
        length: usize,
    },
    /// Fixed preset has no selection and no value to default to.
    #[error("Fixed preset '{name}' has no selection")]
    MissingSelection {
        /// Preset name.
        name: String,
    },
    /// Update tried to change the segment id.
    #[error("Segment id is immutable: {current} cannot become {requested}")]
    IdChangeRejected {
        /// Existing id.
        current: SegmentId,
        /// Id requested by the update.
        requested: SegmentId,
    },
    /// Update targets a different variant.
    #[error("Variant mismatch: expected {expected}, found {found}")]
    VariantMismatch {
        /// Variant named by the update.
        expected: SegmentKindTag,
        /// Variant of the segment.
        found: SegmentKindTag,
    },
    /// Update sets a field that the variant does not have.
    #[error("Field '{field}' does not apply to {kind} segments")]
    FieldNotApplicable {
        /// Offending field.
        field: &'static str,
        /// Variant of the segment.
        kind: SegmentKindTag,
    },
    /// Operation requires a text segment.
    #[error("Segment {0} is not a text segment")]
    NotText(SegmentId),
}

/// One node of a prompt tree.
///
/// Equality compares the whole tree including ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SegmentRepr")]
pub struct Segment {
    id: SegmentId,
    #[serde(flatten)]
    kind: SegmentKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Segment>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: Metadata,
}

/// Wire form; deserialization revalidates through [`Segment::new`].
#[derive(Deserialize)]
struct SegmentRepr {
    id: SegmentId,
    #[serde(flatten)]
    kind: SegmentKind,
    #[serde(default)]
    children: Vec<Segment>,
    #[serde(default)]
    metadata: Metadata,
}

impl TryFrom<SegmentRepr> for Segment {
    type Error = SegmentError;

    fn try_from(repr: SegmentRepr) -> Result<Self, Self::Error> {
        let mut segment = Segment::new(repr.id, repr.kind)?;
        segment.children = repr.children;
        segment.metadata = repr.metadata;
        Ok(segment)
    }
}

impl Segment {
    /// Create a segment with an explicit id, validating the payload.
    ///
    /// Weighted levels are normalized and display values recomputed. Fixed
    /// presets without a selection default to their first value; if there
    /// is none the preset is still created and compiles to a visible error.
    pub fn new(id: SegmentId, kind: SegmentKind) -> Result<Self, SegmentError> {
        Ok(Self {
            id,
            kind: kind.normalized()?,
            children: Vec::new(),
            metadata: Metadata::new(),
        })
    }

    /// Create a text segment with a generated id.
    pub fn text(content: impl Into<String>) -> Self {
        Self::from_kind(SegmentKind::text(content))
    }

    /// Create a weighted segment with a generated id.
    pub fn weighted(bracket_type: BracketType, level: i64, children: Vec<Segment>) -> Self {
        Self::from_kind(SegmentKind::weighted(bracket_type, level)).with_children(children)
    }

    /// Create a level-0 group that compiles to its children's concatenation.
    pub fn group(children: Vec<Segment>) -> Self {
        Self::weighted(BracketType::Increase, 0, children)
    }

    /// Create a preset with a generated id.
    pub fn preset(
        name: impl Into<String>,
        mode: PresetMode,
        selected: Option<String>,
        values: Vec<String>,
    ) -> Result<Self, SegmentError> {
        Self::new(
            SegmentId::generate(),
            SegmentKind::Preset {
                name: name.into(),
                mode,
                selected,
                values,
            },
        )
    }

    /// Create a random-mode preset with no cached values.
    pub fn random_preset(name: impl Into<String>) -> Result<Self, SegmentError> {
        Self::preset(name, PresetMode::Random, None, Vec::new())
    }

    /// Create a fixed-mode preset with a selection.
    pub fn fixed_preset(
        name: impl Into<String>,
        selected: impl Into<String>,
    ) -> Result<Self, SegmentError> {
        Self::preset(name, PresetMode::Fixed, Some(selected.into()), Vec::new())
    }

    /// Create an inline wildcard with a generated id. Blank options are dropped.
    pub fn inline_wildcard(
        options: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, SegmentError> {
        Self::new(
            SegmentId::generate(),
            SegmentKind::InlineWildcard {
                options: options.into_iter().map(Into::into).collect(),
            },
        )
    }

    fn from_kind(kind: SegmentKind) -> Self {
        Self {
            id: SegmentId::generate(),
            kind,
            children: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    /// Replace the children, returning the new segment.
    pub fn with_children(mut self, children: Vec<Segment>) -> Self {
        self.children = children;
        self
    }

    /// Set one metadata entry, returning the new segment.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Segment id.
    pub fn id(&self) -> &SegmentId {
        &self.id
    }

    /// Variant payload.
    pub fn kind(&self) -> &SegmentKind {
        &self.kind
    }

    /// Variant tag.
    pub fn kind_tag(&self) -> SegmentKindTag {
        self.kind.tag()
    }

    /// Ordered children.
    pub fn children(&self) -> &[Segment] {
        &self.children
    }

    /// Metadata map.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Text content, if this is a text segment.
    pub fn text_content(&self) -> Option<&str> {
        match &self.kind {
            SegmentKind::Text { content } => Some(content),
            _ => None,
        }
    }

    /// Whether this is a text segment with no content and no children.
    pub fn is_empty_text(&self) -> bool {
        self.children.is_empty() && self.text_content().is_some_and(str::is_empty)
    }

    /// Number of segments in this tree, including the root.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Segment::node_count).sum::<usize>()
    }

    /// Check that the tree can be committed for compilation.
    ///
    /// Returns the first fixed preset (pre-order) that lacks a selection.
    pub fn ensure_compilable(&self) -> Result<(), SegmentError> {
        if let SegmentKind::Preset {
            name,
            mode: PresetMode::Fixed,
            selected: None,
            ..
        } = &self.kind
        {
            return Err(SegmentError::MissingSelection { name: name.clone() });
        }
        self.children.iter().try_for_each(Segment::ensure_compilable)
    }

    /// Canonical fingerprint of the whole tree (xxh64, hex).
    pub fn fingerprint(&self) -> String {
        crate::canonical::canonical_hash_hex(self)
    }

    pub(crate) fn kind_mut(&mut self) -> &mut SegmentKind {
        &mut self.kind
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Segment> {
        &mut self.children
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
