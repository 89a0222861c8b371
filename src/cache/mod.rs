//! Compile cache with LRU eviction and a segment dependency graph.
//!
//! ## Cache Key Design
//!
//! Keys are plain values, `(segment_id, expand_wildcards, seed)`:
//!
//! | Field | Literal compile | Expanding compile |
//! |-------|-----------------|-------------------|
//! | `segment_id` | node id | node id |
//! | `expand_wildcards` | `false` | `true` |
//! | `seed` | requested seed | generator state at node entry |
//!
//! For an expanding compile the root's entry state is the requested seed.
//! Each entry also remembers the generator state after its subtree, so a hit
//! restores the stream and the rest of the tree draws exactly what a full
//! compile would have drawn.
//!
//! ## Dependency Graph
//!
//! Edges are recorded while compiling (`parent -> children`) and mirrored
//! (`child -> parents`). [`CompileCache::invalidate_tree`] walks downward,
//! [`CompileCache::invalidate_dependents`] walks upward. Both are
//! breadth-first with a visited set, so a malformed cyclic graph still
//! terminates.
//!
//! A node with no entries and no recorded parents is an orphan: its outgoing
//! edges are dropped, which may orphan its children in turn. Orphans found
//! while the incremental compiler is filling the cache are only collected
//! once the compile has finished ([`CompileCache::prune_orphans`]), so every
//! node below a cached entry keeps the edges its invalidation needs.

pub mod incremental;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::types::SegmentId;
pub use incremental::IncrementalCompiler;

/// Default cache capacity.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Configuration for the compile cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_entries: usize,
    /// Whether to enable the cache.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_CAPACITY,
            enabled: true,
        }
    }
}

/// Cache key for one compiled segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Segment the entry belongs to.
    pub segment_id: SegmentId,
    /// Whether wildcards were expanded.
    pub expand_wildcards: bool,
    /// Seed (literal) or generator entry state (expanding).
    pub seed: u64,
}

impl CacheKey {
    /// Build a key.
    pub fn new(segment_id: impl Into<SegmentId>, expand_wildcards: bool, seed: u64) -> Self {
        Self {
            segment_id: segment_id.into(),
            expand_wildcards,
            seed,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.segment_id, self.expand_wildcards, self.seed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CacheEntry {
    pub(crate) text: String,
    pub(crate) rng_after: Option<u64>,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Current number of entries.
    pub size: usize,
    /// Maximum number of entries (0 when disabled).
    pub capacity: usize,
    /// Entries dropped by LRU eviction.
    pub evictions: u64,
    /// `hits / (hits + misses)`, or 0 before any lookup.
    pub hit_rate: f64,
}

/// Compile cache.
///
/// Owned by whatever drives compilation and passed in explicitly; there is
/// no process-wide instance.
#[derive(Debug)]
pub struct CompileCache {
    config: CacheConfig,
    entries: Option<LruCache<CacheKey, CacheEntry>>,
    /// Keys per segment, for exact invalidation.
    index: HashMap<SegmentId, HashSet<CacheKey>>,
    /// Parent -> children.
    children: BTreeMap<SegmentId, BTreeSet<SegmentId>>,
    /// Child -> parents.
    parents: BTreeMap<SegmentId, BTreeSet<SegmentId>>,
    /// Nodes that lost their last entry or parent since the last prune.
    orphan_candidates: HashSet<SegmentId>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Default for CompileCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CompileCache {
    /// Create a cache. A disabled or zero-capacity config stores nothing.
    pub fn new(config: CacheConfig) -> Self {
        let entries = match NonZeroUsize::new(config.max_entries) {
            Some(cap) if config.enabled => Some(LruCache::new(cap)),
            _ => None,
        };
        Self {
            config,
            entries,
            index: HashMap::new(),
            children: BTreeMap::new(),
            parents: BTreeMap::new(),
            orphan_candidates: HashSet::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether entries are stored at all.
    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Look up a compiled string, marking it most recently used.
    pub fn get(&mut self, key: &CacheKey) -> Option<String> {
        self.get_entry(key).map(|entry| entry.text)
    }

    pub(crate) fn get_entry(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let found = self.entries.as_mut().and_then(|entries| entries.get(key).cloned());
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    /// Whether `key` is present. Does not touch recency or statistics.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .as_ref()
            .map(|entries| entries.contains(key))
            .unwrap_or(false)
    }

    /// Whether any entry exists for `segment_id`.
    pub fn is_cached(&self, segment_id: &str) -> bool {
        self.index.contains_key(segment_id)
    }

    /// Store a compiled string.
    pub fn set(&mut self, key: CacheKey, value: impl Into<String>) {
        self.set_with_state(key, value.into(), None);
        self.prune_orphans();
    }

    pub(crate) fn set_with_state(&mut self, key: CacheKey, text: String, rng_after: Option<u64>) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };
        let displaced = entries.push(key.clone(), CacheEntry { text, rng_after });
        if let Some((old_key, _)) = displaced {
            if old_key != key {
                self.evictions += 1;
                self.unindex(&old_key);
                if !self.index.contains_key(&old_key.segment_id) {
                    self.orphan_candidates.insert(old_key.segment_id);
                }
            }
        }
        self.index.entry(key.segment_id.clone()).or_default().insert(key);
    }

    fn unindex(&mut self, key: &CacheKey) {
        if let Some(keys) = self.index.get_mut(&key.segment_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.index.remove(&key.segment_id);
            }
        }
    }

    /// Remove every entry whose key's segment id is exactly `segment_id`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&mut self, segment_id: &str) -> usize {
        let removed = self.remove_entries(segment_id);
        self.prune_orphans();
        removed
    }

    fn remove_entries(&mut self, segment_id: &str) -> usize {
        let Some(keys) = self.index.remove(segment_id) else {
            return 0;
        };
        self.orphan_candidates.insert(SegmentId::from(segment_id));
        let Some(entries) = self.entries.as_mut() else {
            return 0;
        };
        keys.iter().filter(|key| entries.pop(*key).is_some()).count()
    }

    /// Invalidate `segment_id` and everything reachable through recorded
    /// parent -> child edges.
    pub fn invalidate_tree(&mut self, segment_id: &str) -> usize {
        let removed = self.invalidate_reachable(segment_id, Direction::Children);
        tracing::debug!(segment_id, removed, "invalidated subtree");
        removed
    }

    /// Invalidate `segment_id` and every ancestor recorded through
    /// child -> parent edges.
    pub fn invalidate_dependents(&mut self, segment_id: &str) -> usize {
        let removed = self.invalidate_reachable(segment_id, Direction::Parents);
        tracing::debug!(segment_id, removed, "invalidated dependents");
        removed
    }

    fn invalidate_reachable(&mut self, start: &str, direction: Direction) -> usize {
        let mut visited: HashSet<SegmentId> = HashSet::new();
        let mut queue: VecDeque<SegmentId> = VecDeque::new();
        queue.push_back(SegmentId::from(start));
        let mut removed = 0;

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            removed += self.remove_entries(id.as_str());
            let edges = match direction {
                Direction::Children => self.children.get(&id),
                Direction::Parents => self.parents.get(&id),
            };
            if let Some(next) = edges {
                queue.extend(next.iter().filter(|n| !visited.contains(*n)).cloned());
            }
        }
        self.prune_orphans();
        removed
    }

    /// Drop the edges of nodes left with no entries and no parents.
    ///
    /// Returns the number of nodes whose edges were dropped. Called by
    /// [`set`](Self::set) and the invalidation methods; the incremental
    /// compiler calls it after each compile.
    pub fn prune_orphans(&mut self) -> usize {
        let mut queue: Vec<SegmentId> = self.orphan_candidates.drain().collect();
        let mut dropped = 0;
        while let Some(id) = queue.pop() {
            if self.index.contains_key(&id) || self.parents.contains_key(&id) {
                continue;
            }
            let Some(children) = self.children.remove(&id) else {
                continue;
            };
            dropped += 1;
            for child in children {
                if let Some(parents) = self.parents.get_mut(&child) {
                    parents.remove(&id);
                    if parents.is_empty() {
                        self.parents.remove(&child);
                        queue.push(child);
                    }
                }
            }
        }
        if dropped > 0 {
            tracing::debug!(dropped, "pruned orphaned dependency edges");
        }
        dropped
    }

    /// Number of segments with recorded edges in either direction.
    pub fn graph_len(&self) -> usize {
        self.children
            .keys()
            .chain(self.parents.keys())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Replace the recorded children of `parent`.
    ///
    /// A disabled cache records nothing, since it has no entries to
    /// invalidate.
    pub fn record_children<I>(&mut self, parent: &SegmentId, children: I)
    where
        I: IntoIterator<Item = SegmentId>,
    {
        if self.entries.is_none() {
            return;
        }
        if let Some(old) = self.children.remove(parent) {
            for child in old {
                if let Some(parents) = self.parents.get_mut(&child) {
                    parents.remove(parent);
                    if parents.is_empty() {
                        self.parents.remove(&child);
                        self.orphan_candidates.insert(child);
                    }
                }
            }
        }
        let children: BTreeSet<SegmentId> = children.into_iter().collect();
        if children.is_empty() {
            return;
        }
        for child in &children {
            self.parents.entry(child.clone()).or_default().insert(parent.clone());
        }
        self.children.insert(parent.clone(), children);
    }

    /// Recorded children of `parent`, in id order.
    pub fn children_of(&self, parent: &str) -> Vec<SegmentId> {
        self.children
            .get(parent)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Recorded parents of `child`, in id order.
    pub fn parents_of(&self, child: &str) -> Vec<SegmentId> {
        self.parents
            .get(child)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.as_ref().map(LruCache::len).unwrap_or(0)
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            size: self.len(),
            capacity: self.entries.as_ref().map(|e| e.cap().get()).unwrap_or(0),
            evictions: self.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }

    /// Drop all entries, edges and counters.
    pub fn clear(&mut self) {
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
        self.index.clear();
        self.children.clear();
        self.parents.clear();
        self.orphan_candidates.clear();
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Children,
    Parents,
}
