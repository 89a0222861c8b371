//! Incremental compilation over a [`CompileCache`].
//!
//! Every node is looked up before it is rendered. A hit skips the whole
//! subtree; a miss renders the node (children go through the cache again),
//! records its children as dependency edges and stores the result.

use std::collections::HashMap;

use super::{CacheKey, CompileCache};
use crate::compiler::{render_segment, ChildCompiler, CompileOptions, SeededRandom, DEFAULT_MAX_WILDCARD_DEPTH};
use crate::config::KernelConfig;
use crate::types::{Segment, SegmentId};

/// Compiler that reuses cached subtrees between edits.
#[derive(Debug)]
pub struct IncrementalCompiler {
    cache: CompileCache,
    /// Last compiled version per root id.
    last_versions: HashMap<SegmentId, u64>,
    max_wildcard_depth: usize,
}

impl IncrementalCompiler {
    /// Create an incremental compiler around an injected cache.
    pub fn new(cache: CompileCache) -> Self {
        Self {
            cache,
            last_versions: HashMap::new(),
            max_wildcard_depth: DEFAULT_MAX_WILDCARD_DEPTH,
        }
    }

    /// Build the cache and depth cap from configuration.
    pub fn from_config(config: &KernelConfig) -> Self {
        Self::new(CompileCache::new(config.cache.clone())).with_max_wildcard_depth(config.max_wildcard_depth)
    }

    /// Override the nested wildcard depth cap.
    pub fn with_max_wildcard_depth(mut self, max_depth: usize) -> Self {
        self.max_wildcard_depth = max_depth;
        self
    }

    /// Compile `root` at store version `version`.
    ///
    /// When `version` matches the last compile of this root and nothing
    /// changed, the cached root text is returned directly. Otherwise every
    /// changed id is invalidated together with its recorded subtree and its
    /// ancestors, and the tree is recompiled through the cache.
    pub fn compile(
        &mut self,
        root: &Segment,
        version: u64,
        changed_ids: &[SegmentId],
        options: &CompileOptions,
    ) -> String {
        let root_key = CacheKey {
            segment_id: root.id().clone(),
            expand_wildcards: options.expand_wildcards,
            seed: options.seed,
        };

        if changed_ids.is_empty() && self.last_versions.get(root.id()) == Some(&version) {
            if let Some(text) = self.cache.get(&root_key) {
                tracing::debug!(root = %root.id(), version, "reusing cached root");
                return text;
            }
        }

        let mut removed = 0;
        for id in changed_ids {
            removed += self.cache.invalidate_tree(id.as_str());
            removed += self.cache.invalidate_dependents(id.as_str());
        }
        tracing::debug!(
            root = %root.id(),
            version,
            changed = changed_ids.len(),
            removed,
            "incremental compile"
        );

        let text = CachedCompiler {
            cache: &mut self.cache,
            options: *options,
            rng: SeededRandom::new(options.seed),
            max_wildcard_depth: self.max_wildcard_depth,
        }
        .compile_node(root);

        self.cache.prune_orphans();
        // versions of roots that fell out of the cache can never short-circuit
        let cache = &self.cache;
        self.last_versions.retain(|id, _| cache.is_cached(id.as_str()));
        self.last_versions.insert(root.id().clone(), version);
        text
    }

    /// Last version compiled for `root_id`, while its entry is still cached.
    pub fn last_version(&self, root_id: &str) -> Option<u64> {
        self.last_versions.get(root_id).copied()
    }

    /// The underlying cache.
    pub fn cache(&self) -> &CompileCache {
        &self.cache
    }

    /// Mutable access to the underlying cache.
    pub fn cache_mut(&mut self) -> &mut CompileCache {
        &mut self.cache
    }

    /// Clear the cache and forget every recorded version.
    pub fn reset(&mut self) {
        self.cache.clear();
        self.last_versions.clear();
    }
}

struct CachedCompiler<'c> {
    cache: &'c mut CompileCache,
    options: CompileOptions,
    rng: SeededRandom,
    max_wildcard_depth: usize,
}

impl CachedCompiler<'_> {
    fn key_for(&self, id: &SegmentId) -> CacheKey {
        let seed = if self.options.expand_wildcards {
            self.rng.state()
        } else {
            self.options.seed
        };
        CacheKey {
            segment_id: id.clone(),
            expand_wildcards: self.options.expand_wildcards,
            seed,
        }
    }

    fn compile_node(&mut self, segment: &Segment) -> String {
        let key = self.key_for(segment.id());
        if let Some(entry) = self.cache.get_entry(&key) {
            if let Some(state) = entry.rng_after {
                self.rng.set_state(state);
            }
            return entry.text;
        }

        let text = render_segment(self, segment);
        self.cache
            .record_children(segment.id(), segment.children().iter().map(|c| c.id().clone()));
        let rng_after = self.options.expand_wildcards.then(|| self.rng.state());
        self.cache.set_with_state(key, text.clone(), rng_after);
        text
    }
}

impl ChildCompiler for CachedCompiler<'_> {
    fn compile_child(&mut self, child: &Segment) -> String {
        self.compile_node(child)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::ops::{update_segment, replace_segment_by_id, SegmentUpdate};
    use crate::parser::parse;
    use crate::types::{PresetMode, SegmentKind};

    fn tree() -> Segment {
        parse("a {b [c]} (x|y|z) !style d")
    }

    fn with_values(root: &Segment) -> Segment {
        // give the random preset something to draw from
        let preset_id = find_kind(root, |k| matches!(k, SegmentKind::Preset { .. }));
        let preset = crate::ops::find_segment_by_id(root, preset_id.as_str()).unwrap();
        let updated = update_segment(
            preset,
            SegmentUpdate::new().values(vec!["p".into(), "q".into(), "r".into()]),
        )
        .unwrap();
        replace_segment_by_id(root, preset_id.as_str(), updated).0
    }

    fn find_kind(root: &Segment, pred: impl Fn(&SegmentKind) -> bool + Copy) -> SegmentId {
        fn walk(node: &Segment, pred: &dyn Fn(&SegmentKind) -> bool) -> Option<SegmentId> {
            if pred(node.kind()) {
                return Some(node.id().clone());
            }
            node.children().iter().find_map(|c| walk(c, pred))
        }
        walk(root, &pred).unwrap()
    }

    #[test]
    fn test_matches_full_compile() {
        let root = with_values(&tree());
        let mut inc = IncrementalCompiler::new(CompileCache::default());
        for options in [CompileOptions::literal(), CompileOptions::expanded(7)] {
            assert_eq!(inc.compile(&root, 1, &[], &options), compile(&root, &options));
        }
    }

    #[test]
    fn test_unchanged_version_hits_root() {
        let root = tree();
        let mut inc = IncrementalCompiler::new(CompileCache::default());
        let options = CompileOptions::literal();
        let first = inc.compile(&root, 1, &[], &options);
        let hits = inc.cache().stats().hits;

        assert_eq!(inc.compile(&root, 1, &[], &options), first);
        assert_eq!(inc.cache().stats().hits, hits + 1);
        assert_eq!(inc.last_version(root.id().as_str()), Some(1));
    }

    #[test]
    fn test_edit_recompiles_ancestors_only() {
        let root = tree();
        let mut inc = IncrementalCompiler::new(CompileCache::default());
        let options = CompileOptions::literal();
        inc.compile(&root, 1, &[], &options);

        let inner_id = find_kind(&root, |k| {
            matches!(k, SegmentKind::Text { content } if content == "c")
        });
        let inner = crate::ops::find_segment_by_id(&root, inner_id.as_str()).unwrap();
        let edited = update_segment(inner, SegmentUpdate::new().content("C")).unwrap();
        let (next, replaced) = replace_segment_by_id(&root, inner_id.as_str(), edited);
        assert!(replaced);

        let before = inc.cache().stats();
        let text = inc.compile(&next, 2, &[inner_id], &options);
        assert_eq!(text, "a {b [C]} (x|y|z) !style d");
        assert_eq!(text, compile(&next, &options));

        // untouched siblings of the edited branch come from the cache
        let after = inc.cache().stats();
        assert!(after.hits > before.hits);
    }

    #[test]
    fn test_expanded_incremental_equals_full_after_edit() {
        let root = with_values(&tree());
        let mut inc = IncrementalCompiler::new(CompileCache::default());
        let options = CompileOptions::expanded(3);
        inc.compile(&root, 1, &[], &options);

        let wc_id = find_kind(&root, |k| matches!(k, SegmentKind::InlineWildcard { .. }));
        let wc = crate::ops::find_segment_by_id(&root, wc_id.as_str()).unwrap();
        let edited = update_segment(
            wc,
            SegmentUpdate::new().options(vec!["one".into(), "(two|three)".into()]),
        )
        .unwrap();
        let next = replace_segment_by_id(&root, wc_id.as_str(), edited).0;

        assert_eq!(inc.compile(&next, 2, &[wc_id], &options), compile(&next, &options));
    }

    #[test]
    fn test_disabled_cache_still_compiles() {
        let root = tree();
        let mut inc = IncrementalCompiler::new(CompileCache::new(crate::cache::CacheConfig {
            max_entries: 10,
            enabled: false,
        }));
        let options = CompileOptions::literal();
        assert_eq!(inc.compile(&root, 1, &[], &options), compile(&root, &options));
        assert_eq!(inc.compile(&root, 1, &[], &options), compile(&root, &options));
    }

    #[test]
    fn test_replaced_roots_release_graph_and_versions() {
        let mut inc = IncrementalCompiler::new(CompileCache::new(crate::cache::CacheConfig {
            max_entries: 4,
            enabled: true,
        }));
        let options = CompileOptions::literal();
        let first = parse("a {b} c");
        inc.compile(&first, 1, &[], &options);
        assert_eq!(inc.cache().children_of(first.id().as_str()).len(), 3);

        for version in 2..200u64 {
            let root = parse(&format!("a {{b{}}} c", version));
            assert_eq!(inc.compile(&root, version, &[], &options), compile(&root, &options));
        }

        assert!(inc.cache().len() <= 4);
        assert!(inc.cache().children_of(first.id().as_str()).is_empty());
        assert_eq!(inc.last_version(first.id().as_str()), None);
        assert!(inc.cache().graph_len() <= 8);
        assert!(inc.last_versions.len() <= 4);
    }

    #[test]
    fn test_fixed_preset_marker_cached() {
        let broken = Segment::preset("pose", PresetMode::Fixed, None, vec![]).unwrap();
        let root = Segment::group(vec![Segment::text("x "), broken]);
        let mut inc = IncrementalCompiler::new(CompileCache::default());
        let text = inc.compile(&root, 1, &[], &CompileOptions::literal());
        assert!(text.starts_with("x [ERROR:"));
    }
}
