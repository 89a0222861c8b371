//! Nested inline-wildcard expansion over raw text.
//!
//! Used for `(a|b)` fragments that live inside compiled text rather than as
//! parsed [`InlineWildcard`](crate::types::SegmentKind::InlineWildcard)
//! segments, and for options of a chosen inline wildcard that themselves
//! contain wildcards, e.g. `(a|(b|c))`.
//!
//! Parenthesis pairs come from the parser's [`ParenTable`], built once per
//! text, so unmatched runs of `(` stay linear. Only the chosen branch
//! is expanded further, one depth level per nesting, up to `max_depth`;
//! beyond that the branch is emitted as `[max depth exceeded: <text>]`.
//! Results are memoized by `(depth, text)` so repeated nested fragments are
//! expanded once.

use std::collections::HashMap;

use super::rng::SeededRandom;
use crate::parser::{split_top_level, ParenTable};

/// Default nesting cap for wildcard expansion.
pub const DEFAULT_MAX_WILDCARD_DEPTH: usize = 10;

/// Expand every `(a|b|...)` fragment in `text` using a generator seeded with `seed`.
pub fn expand_nested_wildcards(text: &str, seed: u64, max_depth: usize) -> String {
    let mut rng = SeededRandom::new(seed);
    NestedWildcardExpander::new(&mut rng, max_depth).expand(text)
}

/// Expander bound to a caller's generator stream.
pub struct NestedWildcardExpander<'r> {
    rng: &'r mut SeededRandom,
    max_depth: usize,
    memo: HashMap<(usize, String), String>,
}

impl<'r> NestedWildcardExpander<'r> {
    /// Create an expander drawing from `rng`.
    pub fn new(rng: &'r mut SeededRandom, max_depth: usize) -> Self {
        Self {
            rng,
            max_depth,
            memo: HashMap::new(),
        }
    }

    /// Expand `text` starting at depth 0.
    pub fn expand(&mut self, text: &str) -> String {
        self.expand_at(text, 0)
    }

    /// Expand `text` as if it were already nested `depth` levels deep.
    pub fn expand_at(&mut self, text: &str, depth: usize) -> String {
        if depth > self.max_depth {
            tracing::warn!(depth, max_depth = self.max_depth, "wildcard expansion depth exceeded");
            return format!("[max depth exceeded: {}]", text);
        }
        let key = (depth, text.to_string());
        if let Some(hit) = self.memo.get(&key) {
            return hit.clone();
        }

        let chars: Vec<char> = text.chars().collect();
        let parens = ParenTable::build(&chars);
        let mut out = String::with_capacity(text.len());
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == '(' && parens.has_top_level_pipe(i) {
                if let Some(close) = parens.close_of(i) {
                    let options = split_top_level(&chars[i + 1..close], '|');
                    if let Some(index) = self.rng.pick_index(options.len()) {
                        let chosen = self.expand_at(&options[index], depth + 1);
                        out.push_str(&chosen);
                    }
                    i = close + 1;
                    continue;
                }
            }
            out.push(chars[i]);
            i += 1;
        }

        self.memo.insert(key, out.clone());
        out
    }
}
