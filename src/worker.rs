//! Background compilation (feature `worker`).
//!
//! A compile runs as an independent synchronous job on tokio's blocking pool
//! and resolves once with the full text. There are no partial results and no
//! mid-compile cancellation. Submitting a newer request through the same
//! [`BackgroundCompiler`] supersedes older ones: waiting on a stale
//! [`PendingCompile`] yields [`WorkerError::Superseded`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::compiler::{CompileOptions, Compiler, DEFAULT_MAX_WILDCARD_DEPTH};
use crate::types::Segment;

/// Errors raised by background compiles.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The blocking task panicked or was aborted.
    #[error("Background compile failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// A newer request was submitted before this one was awaited.
    #[error("Compile request {requested} superseded by {latest}")]
    Superseded {
        /// Generation of this request.
        requested: u64,
        /// Latest submitted generation.
        latest: u64,
    },
}

/// Compile `segment` on the blocking pool.
pub async fn compile_in_background(
    segment: Segment,
    options: CompileOptions,
) -> Result<String, WorkerError> {
    let text = tokio::task::spawn_blocking(move || Compiler::new(options).compile(&segment)).await?;
    Ok(text)
}

/// Issues background compiles and tracks which one is current.
#[derive(Debug, Clone)]
pub struct BackgroundCompiler {
    latest: Arc<AtomicU64>,
    max_wildcard_depth: usize,
}

impl Default for BackgroundCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundCompiler {
    /// Create a compiler with the default wildcard depth cap.
    pub fn new() -> Self {
        Self {
            latest: Arc::new(AtomicU64::new(0)),
            max_wildcard_depth: DEFAULT_MAX_WILDCARD_DEPTH,
        }
    }

    /// Override the nested wildcard depth cap.
    pub fn with_max_wildcard_depth(mut self, max_depth: usize) -> Self {
        self.max_wildcard_depth = max_depth;
        self
    }

    /// Start compiling `segment`. Must be called inside a tokio runtime.
    pub fn submit(&self, segment: Segment, options: CompileOptions) -> PendingCompile {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let max_depth = self.max_wildcard_depth;
        tracing::debug!(generation, segment_id = %segment.id(), "background compile submitted");
        let handle = tokio::task::spawn_blocking(move || {
            Compiler::new(options)
                .with_max_wildcard_depth(max_depth)
                .compile(&segment)
        });
        PendingCompile {
            generation,
            latest: Arc::clone(&self.latest),
            handle,
        }
    }

    /// Generation of the most recent submission (0 before any).
    pub fn latest_generation(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }
}

/// Handle to a submitted compile.
#[derive(Debug)]
pub struct PendingCompile {
    generation: u64,
    latest: Arc<AtomicU64>,
    handle: JoinHandle<String>,
}

impl PendingCompile {
    /// Generation assigned at submission.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether no newer request has been submitted.
    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::SeqCst) == self.generation
    }

    /// Wait for the result. Fails if a newer request exists by the time the
    /// compile finishes.
    pub async fn wait(self) -> Result<String, WorkerError> {
        let text = self.handle.await?;
        let latest = self.latest.load(Ordering::SeqCst);
        if latest != self.generation {
            tracing::debug!(requested = self.generation, latest, "dropping superseded compile");
            return Err(WorkerError::Superseded {
                requested: self.generation,
                latest,
            });
        }
        Ok(text)
    }
}
