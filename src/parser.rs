//! Prompt text → segment tree.
//!
//! A single left-to-right pass with an explicit stack of open weight
//! contexts. Bracket matching is stack based, so adversarial input cannot
//! trigger backtracking.
//!
//! ## Syntax
//!
//! | Form | Segment |
//! |------|---------|
//! | `{x}`, `{{x}}`, `[x]` | `Weighted`, level = run length |
//! | `!name` | `Preset` (random) |
//! | `name:value` | `Preset` (fixed, `selected = value`) |
//! | `(a\|b\|c)` | `InlineWildcard` |
//!
//! ## Recovery
//!
//! Malformed input never fails. A closer whose type or run length does not
//! match the innermost open context turns that context back into literal
//! text (opening run + serialized children + closing run). Contexts still
//! open at end of input become literal text without a closer.
//!
//! ## Limits
//!
//! Weight contexts nest at most [`MAX_NESTING_DEPTH`] deep; brackets opened
//! beyond that are kept as literal text, so the tree depth stays bounded no
//! matter how deep the input nests. Parenthesis pairs are matched once per
//! parse with [`ParenTable`], keeping the pass linear.

use crate::compiler::serialize;
use crate::ops::optimize_segment_tree;
use crate::types::{BracketType, Segment, MAX_BRACKET_LEVEL};

/// Deepest weight nesting turned into segments; deeper brackets stay literal.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Parse prompt text into an optimized segment tree.
///
/// Several top-level segments are returned under a level-0 group; a single
/// one is returned directly; empty input yields an empty text segment.
pub fn parse(text: &str) -> Segment {
    Parser::new(text).run()
}

/// Length of the run of `ch` starting at `start`.
pub fn count_run(chars: &[char], start: usize, ch: char) -> usize {
    chars[start.min(chars.len())..]
        .iter()
        .take_while(|&&c| c == ch)
        .count()
}

/// Index of the `close` matching the `open` at `open_index`, by depth counting.
pub fn find_matching_close(
    chars: &[char],
    open_index: usize,
    open: char,
    close: char,
) -> Option<usize> {
    if chars.get(open_index) != Some(&open) {
        return None;
    }
    let mut depth = 0usize;
    for (offset, &c) in chars[open_index..].iter().enumerate() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(open_index + offset);
            }
        }
    }
    None
}

/// Matching `)` for every `(` of a text, built in one stack pass.
///
/// Pairs agree with [`find_matching_close`]: the `)` that brings the depth
/// counted from an open paren back to zero.
#[derive(Debug, Clone, Default)]
pub struct ParenTable {
    closes: Vec<Option<usize>>,
    piped: Vec<bool>,
}

impl ParenTable {
    /// Match all parentheses of `chars`.
    pub fn build(chars: &[char]) -> Self {
        let mut closes = vec![None; chars.len()];
        let mut piped = vec![false; chars.len()];
        let mut open = Vec::new();
        for (i, &c) in chars.iter().enumerate() {
            match c {
                '(' => open.push(i),
                ')' => {
                    if let Some(start) = open.pop() {
                        closes[start] = Some(i);
                    }
                }
                '|' => {
                    if let Some(&start) = open.last() {
                        piped[start] = true;
                    }
                }
                _ => {}
            }
        }
        Self { closes, piped }
    }

    /// Index of the `)` closing the `(` at `open_index`.
    pub fn close_of(&self, open_index: usize) -> Option<usize> {
        self.closes.get(open_index).copied().flatten()
    }

    /// Whether a `|` sits directly inside the pair opened at `open_index`.
    pub fn has_top_level_pipe(&self, open_index: usize) -> bool {
        self.piped.get(open_index).copied().unwrap_or(false)
    }
}

/// Split on `separator` occurrences outside nested parentheses.
pub fn split_top_level(chars: &[char], separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for &c in chars {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c == separator && depth == 0 => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Characters allowed in preset and keyword names.
fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Characters allowed in a keyword value.
fn is_value_char(c: char) -> bool {
    !c.is_whitespace()
        && !matches!(c, ',' | ':' | '{' | '}' | '[' | ']' | '(' | ')' | '|')
}

/// An open context: the root or a weight bracket awaiting its closer.
struct Frame {
    weight: Option<(BracketType, usize)>,
    children: Vec<Segment>,
    pending: String,
}

impl Frame {
    fn root() -> Self {
        Self {
            weight: None,
            children: Vec::new(),
            pending: String::new(),
        }
    }

    fn weighted(bracket_type: BracketType, level: usize) -> Self {
        Self {
            weight: Some((bracket_type, level)),
            ..Self::root()
        }
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            let content = std::mem::take(&mut self.pending);
            self.children.push(Segment::text(content));
        }
    }

    fn push(&mut self, segment: Segment) {
        self.flush();
        self.children.push(segment);
    }

    fn opening_text(&self) -> String {
        match self.weight {
            Some((bracket_type, level)) => bracket_type.open_char().to_string().repeat(level),
            None => String::new(),
        }
    }

    /// Literal text of this context without its closer.
    fn into_literal(mut self) -> String {
        self.flush();
        let mut literal = self.opening_text();
        for child in &self.children {
            literal.push_str(&serialize(child));
        }
        literal
    }
}

struct Parser {
    chars: Vec<char>,
    parens: ParenTable,
    pos: usize,
    /// `stack[0]` is the root and is never popped.
    stack: Vec<Frame>,
    /// Brackets opened past [`MAX_NESTING_DEPTH`], already emitted as text.
    literal_opens: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect();
        Self {
            parens: ParenTable::build(&chars),
            chars,
            pos: 0,
            stack: vec![Frame::root()],
            literal_opens: 0,
        }
    }

    fn top(&mut self) -> &mut Frame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn run(mut self) -> Segment {
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            if let Some(bracket_type) = BracketType::from_open(c) {
                self.open_weight(bracket_type, c);
                continue;
            }
            if let Some(bracket_type) = BracketType::from_close(c) {
                self.close_weight(bracket_type, c);
                continue;
            }
            if c == '!' && self.try_preset() {
                continue;
            }
            if c == ':' && self.try_keyword() {
                continue;
            }
            if c == '(' && self.try_inline_wildcard() {
                continue;
            }
            self.top().pending.push(c);
            self.pos += 1;
        }
        self.finish()
    }

    fn open_weight(&mut self, bracket_type: BracketType, c: char) {
        let level = count_run(&self.chars, self.pos, c);
        self.pos += level;
        if level > MAX_BRACKET_LEVEL as usize {
            // Not representable as a weight; keep the run verbatim.
            self.top().pending.push_str(&c.to_string().repeat(level));
            return;
        }
        if self.literal_opens > 0 || self.stack.len() > MAX_NESTING_DEPTH {
            if self.literal_opens == 0 {
                tracing::debug!(
                    position = self.pos,
                    max_depth = MAX_NESTING_DEPTH,
                    "weight nesting too deep, keeping brackets as literal text"
                );
            }
            self.literal_opens += 1;
            self.top().pending.push_str(&c.to_string().repeat(level));
            return;
        }
        self.top().flush();
        self.stack.push(Frame::weighted(bracket_type, level));
    }

    fn close_weight(&mut self, bracket_type: BracketType, c: char) {
        let count = count_run(&self.chars, self.pos, c);
        self.pos += count;
        let closers = c.to_string().repeat(count);

        if self.literal_opens > 0 {
            // closes a bracket that was never turned into a frame
            self.literal_opens -= 1;
            self.top().pending.push_str(&closers);
            return;
        }
        if self.stack.len() == 1 {
            self.top().pending.push_str(&closers);
            return;
        }
        let Some(mut frame) = self.stack.pop() else {
            return;
        };
        match frame.weight {
            Some((open_type, level)) if open_type == bracket_type && level == count => {
                frame.flush();
                let segment = Segment::weighted(bracket_type, level as i64, frame.children);
                self.top().push(segment);
            }
            _ => {
                let mut literal = frame.into_literal();
                literal.push_str(&closers);
                tracing::debug!(
                    position = self.pos,
                    literal = %literal,
                    "unmatched weight bracket recovered as literal text"
                );
                self.top().pending.push_str(&literal);
            }
        }
    }

    fn try_preset(&mut self) -> bool {
        let start = self.pos + 1;
        let len = self.chars[start..]
            .iter()
            .take_while(|&&c| is_name_char(c))
            .count();
        if len == 0 {
            return false;
        }
        let name: String = self.chars[start..start + len].iter().collect();
        match Segment::random_preset(name) {
            Ok(segment) => {
                self.top().push(segment);
                self.pos = start + len;
                true
            }
            Err(_) => false,
        }
    }

    fn try_keyword(&mut self) -> bool {
        let value_start = self.pos + 1;
        let value_len = self.chars[value_start..]
            .iter()
            .take_while(|&&c| is_value_char(c))
            .count();
        if value_len == 0 {
            return false;
        }
        let Some(pending) = self.stack.last().map(|frame| &frame.pending) else {
            return false;
        };
        let Some(name_start) = pending
            .char_indices()
            .rev()
            .take_while(|(_, c)| is_name_char(*c))
            .last()
            .map(|(i, _)| i)
        else {
            return false;
        };
        let name = pending[name_start..].to_string();
        let value: String = self.chars[value_start..value_start + value_len]
            .iter()
            .collect();
        match Segment::fixed_preset(name, value) {
            Ok(segment) => {
                let frame = self.top();
                frame.pending.truncate(name_start);
                frame.push(segment);
                self.pos = value_start + value_len;
                true
            }
            Err(_) => false,
        }
    }

    /// Innermost `(` pairs with its depth-matched `)`; surrounding parens stay literal.
    fn try_inline_wildcard(&mut self) -> bool {
        if !self.parens.has_top_level_pipe(self.pos) {
            return false;
        }
        let Some(close) = self.parens.close_of(self.pos) else {
            return false;
        };
        let options = split_top_level(&self.chars[self.pos + 1..close], '|');
        if options.len() < 2 {
            return false;
        }
        match Segment::inline_wildcard(options) {
            Ok(segment) => {
                self.top().push(segment);
                self.pos = close + 1;
                true
            }
            Err(_) => false,
        }
    }

    fn finish(mut self) -> Segment {
        while self.stack.len() > 1 {
            let Some(frame) = self.stack.pop() else {
                break;
            };
            let literal = frame.into_literal();
            tracing::debug!(literal = %literal, "unterminated weight bracket kept as literal text");
            self.top().pending.push_str(&literal);
        }
        let mut root = self.stack.pop().unwrap_or_else(Frame::root);
        root.flush();

        let optimized = optimize_segment_tree(&Segment::group(root.children));
        match optimized.children() {
            [] => Segment::text(""),
            [only] => only.clone(),
            _ => optimized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileOptions};
    use crate::types::{PresetMode, SegmentKind};

    fn literal(segment: &Segment) -> String {
        compile(segment, &CompileOptions::default())
    }

    fn assert_weighted(segment: &Segment, bt: BracketType, level: u8) {
        match segment.kind() {
            SegmentKind::Weighted {
                bracket_type,
                bracket_level,
                ..
            } => {
                assert_eq!(*bracket_type, bt);
                assert_eq!(*bracket_level, level);
            }
            other => panic!("expected weighted, got {:?}", other),
        }
    }

    #[test]
    fn test_helpers() {
        let chars: Vec<char> = "((a|(b|c))|d)".chars().collect();
        assert_eq!(count_run(&chars, 0, '('), 2);
        assert_eq!(count_run(&chars, 99, '('), 0);
        assert_eq!(find_matching_close(&chars, 0, '(', ')'), Some(12));
        assert_eq!(find_matching_close(&chars, 1, '(', ')'), Some(9));
        assert_eq!(find_matching_close(&chars, 2, '(', ')'), None);
        assert_eq!(
            split_top_level(&chars[1..12], '|'),
            vec!["(a|(b|c))".to_string(), "d".to_string()]
        );
    }

    #[test]
    fn test_parse_weighted_in_text() {
        let tree = parse("a{b}c");
        assert_eq!(tree.children().len(), 3);
        assert_eq!(tree.children()[0].text_content(), Some("a"));
        assert_weighted(&tree.children()[1], BracketType::Increase, 1);
        assert_eq!(tree.children()[1].children()[0].text_content(), Some("b"));
        assert_eq!(tree.children()[2].text_content(), Some("c"));
        assert_eq!(literal(&tree), "a{b}c");
    }

    #[test]
    fn test_parse_nested_levels() {
        let tree = parse("{{kw}}");
        assert_weighted(&tree, BracketType::Increase, 2);
        assert_eq!(tree.children().len(), 1);
        assert_eq!(tree.children()[0].text_content(), Some("kw"));

        let mixed = parse("{[[x]] y}");
        assert_weighted(&mixed, BracketType::Increase, 1);
        assert_weighted(&mixed.children()[0], BracketType::Decrease, 2);
        assert_eq!(literal(&mixed), "{[[x]] y}");
    }

    #[test]
    fn test_unterminated_recovers() {
        let tree = parse("{{abc");
        assert_eq!(tree.text_content(), Some("{{abc"));
        assert!(tree.children().is_empty());

        let nested = parse("x {{a [b");
        assert_eq!(nested.text_content(), Some("x {{a [b"));
    }

    #[test]
    fn test_mismatched_closers_recover() {
        assert_eq!(parse("{a]").text_content(), Some("{a]"));
        assert_eq!(parse("{{a}").text_content(), Some("{{a}"));
        assert_eq!(parse("{a}}").text_content(), Some("{a}}"));
        assert_eq!(parse("a}").text_content(), Some("a}"));

        let tree = parse("{{a}{b}}");
        assert_eq!(literal(&tree), "{{a}{b}}");
    }

    #[test]
    fn test_recovery_keeps_structure_text() {
        let tree = parse("{!style (a|b) mood:calm]");
        assert_eq!(tree.text_content(), Some("{!style (a|b) mood:calm]"));
    }

    #[test]
    fn test_parse_presets() {
        let tree = parse("a !hair_color, style:anime");
        let kinds: Vec<_> = tree.children().iter().map(|c| c.kind().clone()).collect();
        assert_eq!(kinds.len(), 4);
        assert_eq!(kinds[0], SegmentKind::text("a "));
        assert!(matches!(
            &kinds[1],
            SegmentKind::Preset { name, mode: PresetMode::Random, .. } if name == "hair_color"
        ));
        assert_eq!(kinds[2], SegmentKind::text(", "));
        assert!(matches!(
            &kinds[3],
            SegmentKind::Preset { name, mode: PresetMode::Fixed, selected: Some(v), .. }
                if name == "style" && v == "anime"
        ));
    }

    #[test]
    fn test_keyword_inside_weight() {
        let tree = parse("{style:anime}");
        assert_weighted(&tree, BracketType::Increase, 1);
        assert!(matches!(
            tree.children()[0].kind(),
            SegmentKind::Preset { mode: PresetMode::Fixed, .. }
        ));
    }

    #[test]
    fn test_bare_sigils_are_text() {
        assert_eq!(parse("wow! ok").text_content(), Some("wow! ok"));
        assert_eq!(parse("a: b").text_content(), Some("a: b"));
        assert_eq!(parse(":x").text_content(), Some(":x"));
        assert_eq!(parse("").text_content(), Some(""));
    }

    #[test]
    fn test_unicode_preset_name() {
        let tree = parse("!猫-cat");
        assert!(matches!(
            tree.kind(),
            SegmentKind::Preset { name, .. } if name == "猫-cat"
        ));
    }

    #[test]
    fn test_inline_wildcard() {
        let tree = parse("a (red|blue) car");
        assert_eq!(
            tree.children()[1].kind(),
            &SegmentKind::InlineWildcard {
                options: vec!["red".to_string(), "blue".to_string()]
            }
        );
        assert_eq!(literal(&tree), "a (red|blue) car");

        let nested = parse("(a|(b|c))");
        assert_eq!(
            nested.kind(),
            &SegmentKind::InlineWildcard {
                options: vec!["a".to_string(), "(b|c)".to_string()]
            }
        );
    }

    #[test]
    fn test_parens_without_pipe_are_text() {
        assert_eq!(parse("(masterpiece)").text_content(), Some("(masterpiece)"));
        assert_eq!(parse("(a|b").text_content(), Some("(a|b"));
        assert_eq!(parse("(|)").text_content(), Some("(|)"));
    }

    #[test]
    fn test_paren_run_uses_smaller_nesting() {
        // Surplus parens on either side stay literal around the wildcard.
        for text in ["((a|b))", "((a|b)", "(a|b))", "(((a|b))"] {
            let tree = parse(text);
            assert_eq!(literal(&tree), text);
            let wildcards = tree
                .children()
                .iter()
                .filter(|c| matches!(c.kind(), SegmentKind::InlineWildcard { .. }))
                .count();
            assert_eq!(wildcards, 1, "input {}", text);
        }
    }

    #[test]
    fn test_overlong_run_is_literal() {
        let text = format!("{}x{}", "{".repeat(80), "}".repeat(80));
        let tree = parse(&text);
        assert_eq!(literal(&tree), text);
    }

    #[test]
    fn test_paren_table_agrees_with_depth_counting() {
        let chars: Vec<char> = "((a|(b|c))|d) (x ((".chars().collect();
        let table = ParenTable::build(&chars);
        for (i, &c) in chars.iter().enumerate() {
            if c == '(' {
                assert_eq!(table.close_of(i), find_matching_close(&chars, i, '(', ')'));
            }
        }
        assert!(table.has_top_level_pipe(0));
        assert!(table.has_top_level_pipe(1));
        assert!(table.has_top_level_pipe(4));
        assert!(!table.has_top_level_pipe(14));
        assert_eq!(table.close_of(99), None);
    }

    fn depth(segment: &Segment) -> usize {
        1 + segment.children().iter().map(depth).max().unwrap_or(0)
    }

    #[test]
    fn test_deep_nesting_stays_bounded() {
        let n = 10_000;
        let text = format!("{}{}", "{a".repeat(n), "}b".repeat(n));
        let tree = parse(&text);
        assert!(depth(&tree) <= MAX_NESTING_DEPTH + 2);
        assert_eq!(literal(&tree), text);
        assert_eq!(serialize(&tree), text);

        let unterminated = "[x".repeat(n);
        assert_eq!(literal(&parse(&unterminated)), unterminated);
    }

    #[test]
    fn test_nesting_at_cap_is_structural() {
        let text = format!("{}x{}", "{y".repeat(MAX_NESTING_DEPTH), "}".repeat(MAX_NESTING_DEPTH));
        let tree = parse(&text);
        // the single top-level weight is unwrapped: weights plus innermost text
        assert_eq!(depth(&tree), MAX_NESTING_DEPTH + 1);
        assert_eq!(literal(&tree), text);
    }

    #[test]
    fn test_long_paren_runs() {
        let open_run = "(".repeat(50_000);
        assert_eq!(parse(&open_run).text_content(), Some(open_run.as_str()));

        let text = format!("{}a|b{}", "(".repeat(3), ")".repeat(3));
        let tree = parse(&text);
        assert_eq!(literal(&tree), text);
        assert_eq!(
            tree.children()[1].kind(),
            &SegmentKind::InlineWildcard {
                options: vec!["a".to_string(), "b".to_string()]
            }
        );
    }

    #[test]
    fn test_empty_weight() {
        let tree = parse("{}");
        assert_weighted(&tree, BracketType::Increase, 1);
        assert!(tree.children().is_empty());
        assert_eq!(literal(&tree), "{}");
    }
}
