//! In-memory segment store.

use std::collections::{BTreeMap, BTreeSet};

use super::{SegmentStore, StoreError};
use crate::ops::{self, SegmentUpdate};
use crate::parser::parse;
use crate::types::{BracketType, PresetMode, PromptScope, Segment, SegmentId};

/// Which tree holds a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Owner {
    Root(PromptScope),
    Detached(SegmentId),
}

/// In-memory segment store.
///
/// Uses BTreeMap/BTreeSet for deterministic iteration order. A new store
/// holds empty `main.positive` and `main.negative` roots.
#[derive(Debug, Clone)]
pub struct InMemorySegmentStore {
    /// Root tree per scope.
    roots: BTreeMap<PromptScope, Segment>,
    /// Created but unattached trees, by top-level id.
    detached: BTreeMap<SegmentId, Segment>,
    version: u64,
    changed: BTreeSet<SegmentId>,
}

impl Default for InMemorySegmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySegmentStore {
    /// Create a store with empty main roots.
    pub fn new() -> Self {
        let mut roots = BTreeMap::new();
        roots.insert(PromptScope::MainPositive, Segment::text(""));
        roots.insert(PromptScope::MainNegative, Segment::text(""));
        Self {
            roots,
            detached: BTreeMap::new(),
            version: 0,
            changed: BTreeSet::new(),
        }
    }

    fn touch<'a>(&mut self, ids: impl IntoIterator<Item = &'a SegmentId>) {
        self.version += 1;
        self.changed.extend(ids.into_iter().cloned());
    }

    fn owner_of(&self, id: &str) -> Option<Owner> {
        for (scope, root) in &self.roots {
            if ops::find_segment_by_id(root, id).is_some() {
                return Some(Owner::Root(*scope));
            }
        }
        self.detached
            .iter()
            .find(|(_, tree)| ops::find_segment_by_id(tree, id).is_some())
            .map(|(key, _)| Owner::Detached(key.clone()))
    }

    fn tree(&self, owner: &Owner) -> Option<&Segment> {
        match owner {
            Owner::Root(scope) => self.roots.get(scope),
            Owner::Detached(key) => self.detached.get(key),
        }
    }

    fn put_tree(&mut self, owner: Owner, tree: Segment) {
        match owner {
            Owner::Root(scope) => {
                self.roots.insert(scope, tree);
            }
            Owner::Detached(key) => {
                self.detached.insert(key, tree);
            }
        }
    }

    /// Add an already built tree to the detached pool.
    pub fn insert_detached(&mut self, segment: Segment) -> Result<SegmentId, StoreError> {
        let mut ids = Vec::new();
        collect_ids(&segment, &mut ids);
        if let Some(dup) = ids.iter().find(|id| self.owner_of(id.as_str()).is_some()) {
            return Err(StoreError::DuplicateId(dup.clone()));
        }
        let id = segment.id().clone();
        self.detached.insert(id.clone(), segment);
        self.touch([&id]);
        Ok(id)
    }

    /// Create a detached text segment.
    pub fn create_text(&mut self, content: impl Into<String>) -> SegmentId {
        self.insert_fresh(Segment::text(content))
    }

    /// Create a detached, empty weighted segment. The level is clamped.
    pub fn create_weighted(&mut self, bracket_type: BracketType, level: i64) -> SegmentId {
        self.insert_fresh(Segment::weighted(bracket_type, level, Vec::new()))
    }

    /// Create a detached preset segment.
    pub fn create_preset(
        &mut self,
        name: impl Into<String>,
        mode: PresetMode,
        selected: Option<String>,
        values: Vec<String>,
    ) -> Result<SegmentId, StoreError> {
        let segment = Segment::preset(name, mode, selected, values)?;
        Ok(self.insert_fresh(segment))
    }

    /// Create a detached inline wildcard segment.
    pub fn create_inline_wildcard<I, S>(&mut self, options: I) -> Result<SegmentId, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segment = Segment::inline_wildcard(options)?;
        Ok(self.insert_fresh(segment))
    }

    fn insert_fresh(&mut self, segment: Segment) -> SegmentId {
        // generated ids never collide
        let id = segment.id().clone();
        self.detached.insert(id.clone(), segment);
        self.touch([&id]);
        id
    }

    /// Apply a typed update to the segment with `id`, wherever it lives.
    ///
    /// Updates that replace children are rejected; attach and detach through
    /// [`add_child`](Self::add_child) and [`remove_child`](Self::remove_child).
    pub fn update_segment(&mut self, id: &str, update: SegmentUpdate) -> Result<(), StoreError> {
        if update.children.is_some() {
            return Err(StoreError::ChildrenNotUpdatable(id.into()));
        }
        let owner = self
            .owner_of(id)
            .ok_or_else(|| StoreError::SegmentNotFound(id.into()))?;
        let tree = self
            .tree(&owner)
            .ok_or_else(|| StoreError::SegmentNotFound(id.into()))?;
        let current = ops::find_segment_by_id(tree, id)
            .ok_or_else(|| StoreError::SegmentNotFound(id.into()))?;
        let updated = ops::update_segment(current, update)?;
        let (next, _) = ops::replace_segment_by_id(tree, id, updated);
        let segment_id = SegmentId::from(id);
        self.put_tree(owner, next);
        self.touch([&segment_id]);
        Ok(())
    }

    /// Attach the detached segment `child_id` under `parent_id`.
    ///
    /// `index` of `None` (or past the end) appends.
    pub fn add_child(
        &mut self,
        parent_id: &str,
        child_id: &str,
        index: Option<usize>,
    ) -> Result<(), StoreError> {
        if !self.detached.contains_key(child_id) {
            return Err(match self.owner_of(child_id) {
                Some(_) => StoreError::NotDetached(child_id.into()),
                None => StoreError::SegmentNotFound(child_id.into()),
            });
        }
        let owner = self
            .owner_of(parent_id)
            .ok_or_else(|| StoreError::SegmentNotFound(parent_id.into()))?;
        if owner == Owner::Detached(SegmentId::from(child_id)) {
            return Err(StoreError::CycleRejected(child_id.into()));
        }

        let child = self
            .detached
            .remove(child_id)
            .ok_or_else(|| StoreError::SegmentNotFound(child_id.into()))?;
        let tree = self
            .tree(&owner)
            .ok_or_else(|| StoreError::SegmentNotFound(parent_id.into()))?;
        let parent = ops::find_segment_by_id(tree, parent_id)
            .ok_or_else(|| StoreError::SegmentNotFound(parent_id.into()))?;
        let child_key = child.id().clone();
        let updated = ops::insert_segment(parent, child, index);
        let (next, _) = ops::replace_segment_by_id(tree, parent_id, updated);
        self.put_tree(owner, next);

        let parent_key = SegmentId::from(parent_id);
        self.touch([&parent_key, &child_key]);
        Ok(())
    }

    /// Detach the direct child `child_id` of `parent_id` back into the pool.
    pub fn remove_child(&mut self, parent_id: &str, child_id: &str) -> Result<(), StoreError> {
        let owner = self
            .owner_of(parent_id)
            .ok_or_else(|| StoreError::SegmentNotFound(parent_id.into()))?;
        let tree = self
            .tree(&owner)
            .ok_or_else(|| StoreError::SegmentNotFound(parent_id.into()))?;
        let parent = ops::find_segment_by_id(tree, parent_id)
            .ok_or_else(|| StoreError::SegmentNotFound(parent_id.into()))?;
        let Some(child) = parent
            .children()
            .iter()
            .find(|c| c.id().as_str() == child_id)
            .cloned()
        else {
            return Err(StoreError::NotAChild {
                parent: parent_id.into(),
                child: child_id.into(),
            });
        };

        let (next, _) = ops::remove_segment(tree, child_id);
        self.put_tree(owner, next);
        let child_key = child.id().clone();
        self.detached.insert(child_key.clone(), child);

        let parent_key = SegmentId::from(parent_id);
        self.touch([&parent_key, &child_key]);
        Ok(())
    }

    /// Delete a segment and its subtree from the store.
    ///
    /// Removing a scope root replaces it with an empty text root. Returns the
    /// removed subtree.
    pub fn remove_segment(&mut self, id: &str) -> Result<Segment, StoreError> {
        let owner = self
            .owner_of(id)
            .ok_or_else(|| StoreError::SegmentNotFound(id.into()))?;
        let tree = self
            .tree(&owner)
            .ok_or_else(|| StoreError::SegmentNotFound(id.into()))?;

        if tree.id().as_str() == id {
            let removed = tree.clone();
            match owner {
                Owner::Root(scope) => {
                    self.roots.insert(scope, Segment::text(""));
                }
                Owner::Detached(key) => {
                    self.detached.remove(&key);
                }
            }
            self.touch([removed.id()]);
            return Ok(removed);
        }

        let removed = ops::find_segment_by_id(tree, id)
            .cloned()
            .ok_or_else(|| StoreError::SegmentNotFound(id.into()))?;
        let parent_key = ops::find_parent(tree, id).map(|p| p.id().clone());
        let (next, _) = ops::remove_segment(tree, id);
        self.put_tree(owner, next);
        match &parent_key {
            Some(parent) => self.touch([removed.id(), parent]),
            None => self.touch([removed.id()]),
        }
        Ok(removed)
    }

    /// Make the detached segment `id` the root of `scope`.
    ///
    /// A previous root moves to the detached pool.
    pub fn set_root(&mut self, scope: PromptScope, id: &str) -> Result<(), StoreError> {
        let segment = self.detached.remove(id).ok_or_else(|| match self.owner_of(id) {
            Some(_) => StoreError::NotDetached(id.into()),
            None => StoreError::SegmentNotFound(id.into()),
        })?;
        let new_id = segment.id().clone();
        let previous = self.roots.insert(scope, segment);
        let mut touched = vec![new_id];
        if let Some(old) = previous {
            touched.push(old.id().clone());
            self.detached.insert(old.id().clone(), old);
        }
        self.touch(touched.iter());
        tracing::debug!(%scope, root = %touched[0], "root replaced");
        Ok(())
    }

    /// Parse `text` and install the result as the root of `scope`.
    ///
    /// The previous root is dropped.
    pub fn set_root_text(&mut self, scope: PromptScope, text: &str) -> SegmentId {
        let root = parse(text);
        let id = root.id().clone();
        let previous = self.roots.insert(scope, root);
        match previous {
            Some(old) => self.touch([&id, old.id()]),
            None => self.touch([&id]),
        }
        id
    }

    /// Register the next character's positive and negative scopes.
    ///
    /// Returns the new character index.
    pub fn add_character(&mut self) -> usize {
        let index = self
            .roots
            .keys()
            .filter_map(PromptScope::character_index)
            .max()
            .map(|i| i + 1)
            .unwrap_or(0);
        let positive = Segment::text("");
        let negative = Segment::text("");
        let ids = [positive.id().clone(), negative.id().clone()];
        self.roots.insert(PromptScope::CharacterPositive(index), positive);
        self.roots.insert(PromptScope::CharacterNegative(index), negative);
        self.touch(ids.iter());
        index
    }

    /// Ids of the detached pool, in id order.
    pub fn detached_ids(&self) -> Vec<SegmentId> {
        self.detached.keys().cloned().collect()
    }
}

fn collect_ids(segment: &Segment, out: &mut Vec<SegmentId>) {
    out.push(segment.id().clone());
    for child in segment.children() {
        collect_ids(child, out);
    }
}

impl SegmentStore for InMemorySegmentStore {
    fn get_segment_by_id(&self, id: &str) -> Option<&Segment> {
        self.roots
            .values()
            .chain(self.detached.values())
            .find_map(|tree| ops::find_segment_by_id(tree, id))
    }

    fn get_root_segment(&self, scope: PromptScope) -> Option<&Segment> {
        self.roots.get(&scope)
    }

    fn scopes(&self) -> Vec<PromptScope> {
        self.roots.keys().copied().collect()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn take_changed_ids(&mut self) -> BTreeSet<SegmentId> {
        std::mem::take(&mut self.changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileOptions};

    fn root_text(store: &InMemorySegmentStore, scope: PromptScope) -> String {
        compile(
            store.get_root_segment(scope).unwrap(),
            &CompileOptions::literal(),
        )
    }

    #[test]
    fn test_new_store_has_main_roots() {
        let store = InMemorySegmentStore::new();
        assert_eq!(
            store.scopes(),
            vec![PromptScope::MainPositive, PromptScope::MainNegative]
        );
        assert!(store.get_root_segment(PromptScope::MainPositive).unwrap().is_empty_text());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_build_tree_through_mutations() {
        let mut store = InMemorySegmentStore::new();
        let group = store.create_weighted(BracketType::Increase, 0);
        let weighted = store.create_weighted(BracketType::Increase, 2);
        let kw = store.create_text("kw");
        let tail = store.create_text(" tail");

        store.add_child(weighted.as_str(), kw.as_str(), None).unwrap();
        store.add_child(group.as_str(), weighted.as_str(), None).unwrap();
        store.add_child(group.as_str(), tail.as_str(), None).unwrap();
        store.set_root(PromptScope::MainPositive, group.as_str()).unwrap();

        assert_eq!(root_text(&store, PromptScope::MainPositive), "{{kw}} tail");
        assert!(store.get_segment_by_id(kw.as_str()).is_some());
    }

    #[test]
    fn test_add_child_requires_detached() {
        let mut store = InMemorySegmentStore::new();
        let parent = store.create_weighted(BracketType::Decrease, 1);
        let child = store.create_text("x");
        store.add_child(parent.as_str(), child.as_str(), None).unwrap();

        let other = store.create_weighted(BracketType::Increase, 1);
        assert_eq!(
            store.add_child(other.as_str(), child.as_str(), None),
            Err(StoreError::NotDetached(child.clone()))
        );
        assert_eq!(
            store.add_child(parent.as_str(), "missing", None),
            Err(StoreError::SegmentNotFound("missing".into()))
        );
    }

    #[test]
    fn test_add_child_rejects_cycle() {
        let mut store = InMemorySegmentStore::new();
        let outer = store.create_weighted(BracketType::Increase, 1);
        let inner = store.create_weighted(BracketType::Increase, 1);
        store.add_child(outer.as_str(), inner.as_str(), None).unwrap();
        assert_eq!(
            store.add_child(inner.as_str(), outer.as_str(), None),
            Err(StoreError::CycleRejected(outer.clone()))
        );
        assert_eq!(
            store.add_child(outer.as_str(), outer.as_str(), None),
            Err(StoreError::CycleRejected(outer))
        );
    }

    #[test]
    fn test_update_tracks_changes_and_version() {
        let mut store = InMemorySegmentStore::new();
        let root_id = store.set_root_text(PromptScope::MainPositive, "a {b} c");
        store.take_changed_ids();
        let v = store.version();

        let weighted_id = store
            .get_root_segment(PromptScope::MainPositive)
            .unwrap()
            .children()[1]
            .id()
            .clone();
        store
            .update_segment(weighted_id.as_str(), SegmentUpdate::new().bracket_level(3))
            .unwrap();

        assert_eq!(store.version(), v + 1);
        assert_eq!(root_text(&store, PromptScope::MainPositive), "a {{{b}}} c");
        let changed = store.take_changed_ids();
        assert!(changed.contains(&weighted_id));
        assert!(!changed.contains(&root_id));
        assert!(store.take_changed_ids().is_empty());
    }

    #[test]
    fn test_update_error_leaves_store_untouched() {
        let mut store = InMemorySegmentStore::new();
        let id = store.create_text("x");
        let v = store.version();
        let err = store
            .update_segment(id.as_str(), SegmentUpdate::new().name("oops"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Segment(_)));
        assert_eq!(store.version(), v);
    }

    #[test]
    fn test_update_cannot_replace_children() {
        let mut store = InMemorySegmentStore::new();
        store.set_root_text(PromptScope::MainPositive, "a {b} c");
        store.set_root_text(PromptScope::MainNegative, "x {y}");
        let positive = store.get_root_segment(PromptScope::MainPositive).unwrap().clone();
        let negative = store.get_root_segment(PromptScope::MainNegative).unwrap().clone();
        let v = store.version();

        let err = store
            .update_segment(
                negative.id().as_str(),
                SegmentUpdate::new().children(positive.children().to_vec()),
            )
            .unwrap_err();
        assert_eq!(err, StoreError::ChildrenNotUpdatable(negative.id().clone()));
        assert_eq!(store.version(), v);
        assert_eq!(root_text(&store, PromptScope::MainNegative), "x {y}");

        let shared = positive.children()[1].id().as_str();
        let owners = [PromptScope::MainPositive, PromptScope::MainNegative]
            .iter()
            .filter(|scope| {
                let root = store.get_root_segment(**scope).unwrap();
                ops::find_segment_by_id(root, shared).is_some()
            })
            .count();
        assert_eq!(owners, 1);
    }

    #[test]
    fn test_remove_child_returns_to_pool() {
        let mut store = InMemorySegmentStore::new();
        store.set_root_text(PromptScope::MainPositive, "a {b} c");
        let root = store.get_root_segment(PromptScope::MainPositive).unwrap().clone();
        let weighted_id = root.children()[1].id().clone();

        store.remove_child(root.id().as_str(), weighted_id.as_str()).unwrap();
        assert_eq!(root_text(&store, PromptScope::MainPositive), "a  c");
        assert!(store.detached_ids().contains(&weighted_id));

        assert!(matches!(
            store.remove_child(root.id().as_str(), weighted_id.as_str()),
            Err(StoreError::NotAChild { .. })
        ));
    }

    #[test]
    fn test_remove_root_leaves_empty_text() {
        let mut store = InMemorySegmentStore::new();
        let root_id = store.set_root_text(PromptScope::MainNegative, "blurry, {lowres}");
        let removed = store.remove_segment(root_id.as_str()).unwrap();
        assert_eq!(removed.id(), &root_id);
        let root = store.get_root_segment(PromptScope::MainNegative).unwrap();
        assert!(root.is_empty_text());
        assert_ne!(root.id(), &root_id);
    }

    #[test]
    fn test_remove_nested_marks_parent() {
        let mut store = InMemorySegmentStore::new();
        store.set_root_text(PromptScope::MainPositive, "x {y} z");
        store.take_changed_ids();
        let root = store.get_root_segment(PromptScope::MainPositive).unwrap().clone();
        let inner_id = root.children()[1].children()[0].id().clone();

        store.remove_segment(inner_id.as_str()).unwrap();
        let changed = store.take_changed_ids();
        assert!(changed.contains(&inner_id));
        assert!(changed.contains(root.children()[1].id()));
        assert_eq!(root_text(&store, PromptScope::MainPositive), "x {} z");
    }

    #[test]
    fn test_set_root_moves_previous_to_pool() {
        let mut store = InMemorySegmentStore::new();
        let old = store.get_root_segment(PromptScope::MainPositive).unwrap().id().clone();
        let new = store.create_text("fresh");
        store.set_root(PromptScope::MainPositive, new.as_str()).unwrap();
        assert!(store.detached_ids().contains(&old));
        assert_eq!(
            store.set_root(PromptScope::MainNegative, new.as_str()),
            Err(StoreError::NotDetached(new))
        );
    }

    #[test]
    fn test_add_character_scopes() {
        let mut store = InMemorySegmentStore::new();
        assert_eq!(store.add_character(), 0);
        assert_eq!(store.add_character(), 1);
        assert!(store.get_root_segment(PromptScope::CharacterNegative(1)).is_some());
        assert_eq!(store.scopes().len(), 6);
    }

    #[test]
    fn test_insert_detached_rejects_duplicates() {
        let mut store = InMemorySegmentStore::new();
        let seg = Segment::text("a");
        store.insert_detached(seg.clone()).unwrap();
        assert_eq!(
            store.insert_detached(seg.clone()),
            Err(StoreError::DuplicateId(seg.id().clone()))
        );
    }

    #[test]
    fn test_create_preset_validation() {
        let mut store = InMemorySegmentStore::new();
        assert!(store.create_preset("  ", PresetMode::Random, None, vec![]).is_err());
        assert!(store.create_inline_wildcard(Vec::<String>::new()).is_err());
        let id = store
            .create_preset("style", PresetMode::Fixed, None, vec!["anime".into()])
            .unwrap();
        let seg = store.get_segment_by_id(id.as_str()).unwrap();
        assert_eq!(compile(seg, &CompileOptions::literal()), "anime");
    }
}
