//! Pure tree edits over segment trees.
//!
//! Every operation takes its input by reference and returns a new tree;
//! nothing here mutates a tree in place. Ids are preserved across edits
//! so callers can keep addressing the same logical segment.

use unicode_segmentation::UnicodeSegmentation;

use crate::types::{
    normalize_level, BracketType, Metadata, PresetMode, Segment, SegmentError, SegmentId,
    SegmentKind, SegmentKindTag,
};

/// Iteration cap for [`optimize_segment_tree`].
pub const OPTIMIZE_MAX_ITERATIONS: usize = 100;

/// Typed partial update for [`update_segment`].
///
/// Only fields that are `Some` are applied. `id` and `kind` are checks, not
/// changes: they must match the segment being updated.
#[derive(Debug, Clone, Default)]
pub struct SegmentUpdate {
    /// Must equal the segment id if set.
    pub id: Option<SegmentId>,
    /// Must equal the segment variant if set.
    pub kind: Option<SegmentKindTag>,
    /// Text content.
    pub content: Option<String>,
    /// Weighted bracket direction.
    pub bracket_type: Option<BracketType>,
    /// Weighted level (normalized: absolute value, clamped).
    pub bracket_level: Option<i64>,
    /// Preset name.
    pub name: Option<String>,
    /// Preset mode.
    pub mode: Option<PresetMode>,
    /// Preset selection; `Some(None)` clears it.
    pub selected: Option<Option<String>>,
    /// Preset value cache.
    pub values: Option<Vec<String>>,
    /// Inline wildcard options.
    pub options: Option<Vec<String>>,
    /// Replacement children.
    pub children: Option<Vec<Segment>>,
    /// Metadata entries merged into the existing map.
    pub metadata: Option<Metadata>,
}

impl SegmentUpdate {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set text content.
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set bracket type.
    pub fn bracket_type(mut self, bracket_type: BracketType) -> Self {
        self.bracket_type = Some(bracket_type);
        self
    }

    /// Set bracket level.
    pub fn bracket_level(mut self, level: i64) -> Self {
        self.bracket_level = Some(level);
        self
    }

    /// Set preset name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set preset mode.
    pub fn mode(mut self, mode: PresetMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the preset selection.
    pub fn selected(mut self, selected: impl Into<String>) -> Self {
        self.selected = Some(Some(selected.into()));
        self
    }

    /// Clear the preset selection.
    pub fn clear_selected(mut self) -> Self {
        self.selected = Some(None);
        self
    }

    /// Set preset values.
    pub fn values(mut self, values: Vec<String>) -> Self {
        self.values = Some(values);
        self
    }

    /// Set inline wildcard options.
    pub fn options(mut self, options: Vec<String>) -> Self {
        self.options = Some(options);
        self
    }

    /// Replace children.
    pub fn children(mut self, children: Vec<Segment>) -> Self {
        self.children = Some(children);
        self
    }

    /// Merge one metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), value);
        self
    }

    /// Assert the segment id (an update cannot change it).
    pub fn expect_id(mut self, id: impl Into<SegmentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Assert the segment variant (an update cannot change it).
    pub fn expect_kind(mut self, kind: SegmentKindTag) -> Self {
        self.kind = Some(kind);
        self
    }

    /// First set field that does not belong to `kind`.
    fn foreign_field(&self, kind: SegmentKindTag) -> Option<&'static str> {
        let fields: [(&'static str, bool, SegmentKindTag); 8] = [
            ("content", self.content.is_some(), SegmentKindTag::Text),
            ("bracket_type", self.bracket_type.is_some(), SegmentKindTag::Weighted),
            ("bracket_level", self.bracket_level.is_some(), SegmentKindTag::Weighted),
            ("name", self.name.is_some(), SegmentKindTag::Preset),
            ("mode", self.mode.is_some(), SegmentKindTag::Preset),
            ("selected", self.selected.is_some(), SegmentKindTag::Preset),
            ("values", self.values.is_some(), SegmentKindTag::Preset),
            ("options", self.options.is_some(), SegmentKindTag::InlineWildcard),
        ];
        fields
            .into_iter()
            .find(|(_, set, owner)| *set && *owner != kind)
            .map(|(field, _, _)| field)
    }
}

/// Depth-first pre-order search for a segment by id.
pub fn find_segment_by_id<'a>(root: &'a Segment, id: &str) -> Option<&'a Segment> {
    if root.id().as_str() == id {
        return Some(root);
    }
    root.children()
        .iter()
        .find_map(|child| find_segment_by_id(child, id))
}

/// Parent of the segment with `id`, if it is a strict descendant of `root`.
pub fn find_parent<'a>(root: &'a Segment, id: &str) -> Option<&'a Segment> {
    if root.children().iter().any(|c| c.id().as_str() == id) {
        return Some(root);
    }
    root.children().iter().find_map(|child| find_parent(child, id))
}

/// Apply a typed partial update, returning the updated segment.
///
/// Weighted levels are renormalized and display values recomputed. A fixed
/// preset left without a selection falls back to its first value, otherwise
/// the update fails with [`SegmentError::MissingSelection`].
pub fn update_segment(segment: &Segment, update: SegmentUpdate) -> Result<Segment, SegmentError> {
    if let Some(requested) = &update.id {
        if requested != segment.id() {
            return Err(SegmentError::IdChangeRejected {
                current: segment.id().clone(),
                requested: requested.clone(),
            });
        }
    }
    let found = segment.kind_tag();
    if let Some(expected) = update.kind {
        if expected != found {
            return Err(SegmentError::VariantMismatch { expected, found });
        }
    }
    if let Some(field) = update.foreign_field(found) {
        return Err(SegmentError::FieldNotApplicable { field, kind: found });
    }

    let mut next = segment.clone();
    match next.kind_mut() {
        SegmentKind::Text { content } => {
            if let Some(new_content) = update.content {
                *content = new_content;
            }
        }
        SegmentKind::Weighted {
            bracket_type,
            bracket_level,
            display_value,
        } => {
            if let Some(bt) = update.bracket_type {
                *bracket_type = bt;
            }
            if let Some(level) = update.bracket_level {
                *bracket_level = normalize_level(level);
            }
            *display_value = crate::types::display_value(*bracket_type, *bracket_level);
        }
        SegmentKind::Preset {
            name,
            mode,
            selected,
            values,
        } => {
            if let Some(new_name) = update.name {
                if new_name.trim().is_empty() {
                    return Err(SegmentError::EmptyName);
                }
                *name = new_name;
            }
            if let Some(new_values) = update.values {
                *values = new_values;
            }
            if let Some(new_mode) = update.mode {
                *mode = new_mode;
            }
            if let Some(new_selected) = update.selected {
                *selected = new_selected.filter(|s| !s.is_empty());
            }
            if *mode == PresetMode::Fixed && selected.is_none() {
                match values.first() {
                    Some(first) => *selected = Some(first.clone()),
                    None => {
                        return Err(SegmentError::MissingSelection { name: name.clone() })
                    }
                }
            }
        }
        SegmentKind::InlineWildcard { options } => {
            if let Some(new_options) = update.options {
                *options = crate::types::segment::normalize_options(new_options)?;
            }
        }
    }
    if let Some(children) = update.children {
        *next.children_mut() = children;
    }
    if let Some(metadata) = update.metadata {
        next.metadata_mut().extend(metadata);
    }
    Ok(next)
}

/// Insert `child` into `parent` at `index`; `None` or out of bounds appends.
pub fn insert_segment(parent: &Segment, child: Segment, index: Option<usize>) -> Segment {
    let mut next = parent.clone();
    let children = next.children_mut();
    match index {
        Some(i) if i <= children.len() => children.insert(i, child),
        _ => children.push(child),
    }
    next
}

/// Remove the first descendant with `id`. The root itself is never removed.
///
/// Returns the new tree and whether a removal happened.
pub fn remove_segment(root: &Segment, id: &str) -> (Segment, bool) {
    let mut next = root.clone();
    let removed = remove_in_place(&mut next, id);
    (next, removed)
}

fn remove_in_place(node: &mut Segment, id: &str) -> bool {
    let children = node.children_mut();
    if let Some(pos) = children.iter().position(|c| c.id().as_str() == id) {
        children.remove(pos);
        return true;
    }
    children.iter_mut().any(|child| remove_in_place(child, id))
}

/// Replace the segment with `id` (root included) by `replacement`.
///
/// Returns the new tree and whether a replacement happened.
pub fn replace_segment_by_id(root: &Segment, id: &str, replacement: Segment) -> (Segment, bool) {
    if root.id().as_str() == id {
        return (replacement, true);
    }
    let mut next = root.clone();
    let mut replacement = Some(replacement);
    let replaced = replace_in_place(&mut next, id, &mut replacement);
    (next, replaced)
}

fn replace_in_place(node: &mut Segment, id: &str, replacement: &mut Option<Segment>) -> bool {
    for child in node.children_mut().iter_mut() {
        if child.id().as_str() == id {
            if let Some(r) = replacement.take() {
                *child = r;
                return true;
            }
            return false;
        }
        if replace_in_place(child, id, replacement) {
            return true;
        }
    }
    false
}

/// Split a text segment at a grapheme index.
///
/// The left half keeps the original id, metadata and children; the right half
/// gets a fresh id and a copy of the metadata.
pub fn split_text_segment(
    segment: &Segment,
    position: usize,
) -> Result<(Segment, Segment), SegmentError> {
    let content = segment
        .text_content()
        .ok_or_else(|| SegmentError::NotText(segment.id().clone()))?;
    let graphemes: Vec<&str> = content.graphemes(true).collect();
    if position > graphemes.len() {
        return Err(SegmentError::InvalidRange {
            position,
            length: graphemes.len(),
        });
    }
    let left_text: String = graphemes[..position].concat();
    let right_text: String = graphemes[position..].concat();

    let mut left = segment.clone();
    *left.kind_mut() = SegmentKind::text(left_text);
    let mut right = Segment::text(right_text);
    *right.metadata_mut() = segment.metadata().clone();
    Ok((left, right))
}

/// Merge runs of consecutive childless text children of `parent`.
///
/// The merged node keeps the first sibling's id and metadata.
pub fn merge_adjacent_text_segments(parent: &Segment) -> (Segment, bool) {
    let mut next = parent.clone();
    let changed = merge_children_in_place(&mut next);
    (next, changed)
}

fn is_mergeable_text(segment: &Segment) -> bool {
    segment.children().is_empty() && segment.text_content().is_some()
}

fn merge_children_in_place(node: &mut Segment) -> bool {
    let children = std::mem::take(node.children_mut());
    let original_len = children.len();
    let mut merged: Vec<Segment> = Vec::with_capacity(original_len);
    for child in children {
        if let Some(prev) = merged.last_mut() {
            if is_mergeable_text(prev) && is_mergeable_text(&child) {
                if let (SegmentKind::Text { content }, Some(extra)) =
                    (prev.kind_mut(), child.text_content())
                {
                    content.push_str(extra);
                    continue;
                }
            }
        }
        merged.push(child);
    }
    let changed = merged.len() != original_len;
    *node.children_mut() = merged;
    changed
}

/// Outcome of an optimization run.
#[derive(Debug, Clone)]
pub struct OptimizeReport {
    /// Optimized tree.
    pub segment: Segment,
    /// Passes performed.
    pub iterations: usize,
    /// Whether a fixpoint was reached within the cap.
    pub converged: bool,
}

/// Remove empty text leaves and merge adjacent text siblings, to a fixpoint.
pub fn optimize_segment_tree(root: &Segment) -> Segment {
    optimize_segment_tree_with_limit(root, OPTIMIZE_MAX_ITERATIONS).segment
}

/// [`optimize_segment_tree`] with an explicit iteration cap.
pub fn optimize_segment_tree_with_limit(root: &Segment, max_iterations: usize) -> OptimizeReport {
    let mut current = root.clone();
    let mut iterations = 0;
    while iterations < max_iterations {
        iterations += 1;
        if !optimize_pass(&mut current) {
            return OptimizeReport {
                segment: current,
                iterations,
                converged: true,
            };
        }
    }
    // the last allowed pass may have reached the fixpoint
    let converged = !optimize_pass(&mut current.clone());
    if !converged {
        tracing::warn!(
            segment_id = %root.id(),
            max_iterations,
            "segment tree optimization hit iteration cap without converging"
        );
    }
    OptimizeReport {
        segment: current,
        iterations,
        converged,
    }
}

/// One bottom-up pass. Returns whether anything changed.
fn optimize_pass(node: &mut Segment) -> bool {
    let mut changed = false;
    for child in node.children_mut().iter_mut() {
        changed |= optimize_pass(child);
    }
    let children = node.children_mut();
    let before = children.len();
    children.retain(|c| !c.is_empty_text());
    changed |= children.len() != before;
    changed |= merge_children_in_place(node);
    changed
}
