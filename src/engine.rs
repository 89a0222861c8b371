//! Scope-level compilation over a segment store.
//!
//! The engine owns a store and an injected [`IncrementalCompiler`]. Each
//! incremental compile drains the store's changed ids, so edits made through
//! the store are invalidated exactly once regardless of which scope is
//! compiled next.

use std::collections::BTreeMap;

use crate::cache::{CacheStats, IncrementalCompiler};
use crate::compiler::{CompileOptions, Compiler};
use crate::config::KernelConfig;
use crate::ops::{optimize_segment_tree_with_limit, OptimizeReport};
use crate::store::SegmentStore;
use crate::types::{PromptScope, SegmentError, SegmentId};

/// Errors raised by the engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// No root registered for the scope.
    #[error("Unknown scope: {0}")]
    UnknownScope(PromptScope),
    /// The scope tree is not ready for compilation.
    #[error("Segment error: {0}")]
    Segment(#[from] SegmentError),
}

/// Compiles prompt scopes held in a [`SegmentStore`].
#[derive(Debug)]
pub struct PromptEngine<S: SegmentStore> {
    store: S,
    compiler: IncrementalCompiler,
    config: KernelConfig,
}

impl<S: SegmentStore> PromptEngine<S> {
    /// Create an engine whose cache is built from `config`.
    pub fn new(store: S, config: KernelConfig) -> Self {
        let compiler = IncrementalCompiler::from_config(&config);
        Self::with_compiler(store, compiler, config)
    }

    /// Create an engine around an existing compiler (and its cache).
    pub fn with_compiler(store: S, compiler: IncrementalCompiler, config: KernelConfig) -> Self {
        Self {
            store,
            compiler,
            config,
        }
    }

    /// The store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the store for edits.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Active configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Cache statistics of the incremental compiler.
    pub fn cache_stats(&self) -> CacheStats {
        self.compiler.cache().stats()
    }

    /// Incrementally compile `scope` with the configured options.
    pub fn compile_scope(&mut self, scope: PromptScope) -> Result<String, EngineError> {
        let options = self.config.compile;
        self.compile_scope_with(scope, &options)
    }

    /// Incrementally compile `scope` with explicit options.
    pub fn compile_scope_with(
        &mut self,
        scope: PromptScope,
        options: &CompileOptions,
    ) -> Result<String, EngineError> {
        if self.store.get_root_segment(scope).is_none() {
            return Err(EngineError::UnknownScope(scope));
        }
        let changed: Vec<SegmentId> = self.store.take_changed_ids().into_iter().collect();
        let version = self.store.version();
        let root = self
            .store
            .get_root_segment(scope)
            .ok_or(EngineError::UnknownScope(scope))?;
        Ok(self.compiler.compile(root, version, &changed, options))
    }

    /// Compile `scope` without consulting the cache.
    pub fn compile_scope_full(&self, scope: PromptScope) -> Result<String, EngineError> {
        let root = self
            .store
            .get_root_segment(scope)
            .ok_or(EngineError::UnknownScope(scope))?;
        Ok(Compiler::new(self.config.compile)
            .with_max_wildcard_depth(self.config.max_wildcard_depth)
            .compile(root))
    }

    /// Incrementally compile every registered scope, in scope order.
    pub fn compile_all(&mut self) -> Result<BTreeMap<PromptScope, String>, EngineError> {
        let mut out = BTreeMap::new();
        for scope in self.store.scopes() {
            let text = self.compile_scope(scope)?;
            out.insert(scope, text);
        }
        Ok(out)
    }

    /// Check that every fixed preset in `scope` has a selection.
    pub fn validate_scope(&self, scope: PromptScope) -> Result<(), EngineError> {
        self.store
            .get_root_segment(scope)
            .ok_or(EngineError::UnknownScope(scope))?
            .ensure_compilable()?;
        Ok(())
    }

    /// Optimized copy of the `scope` root, using the configured iteration cap.
    pub fn optimized_root(&self, scope: PromptScope) -> Result<OptimizeReport, EngineError> {
        let root = self
            .store
            .get_root_segment(scope)
            .ok_or(EngineError::UnknownScope(scope))?;
        Ok(optimize_segment_tree_with_limit(
            root,
            self.config.optimize_max_iterations,
        ))
    }
}
