//! Backend executor contract.
//!
//! Each backend store is reached through a `BackendExecutor`. Adapters live
//! outside this workspace; the SDK treats executors as opaque and swappable.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{BackendKind, MemoryContent, MemoryFilters, MemoryQuery, ScoredContent};

/// Capability surface of one backend store.
#[async_trait]
pub trait BackendExecutor: Send + Sync {
    /// Human-readable backend name, used in logs and errors.
    fn name(&self) -> &str;

    /// Read a single item. `Ok(None)` means not found.
    async fn read(&self, query: &MemoryQuery) -> Result<Option<MemoryContent>>;

    /// Persist an item, replacing any item with the same identifier.
    async fn write(&self, content: &MemoryContent) -> Result<()>;

    /// List items matching a filter set.
    async fn list(&self, filters: &MemoryFilters) -> Result<Vec<MemoryContent>>;

    /// Delete an item. Deleting an unknown identifier is not an error.
    async fn delete(&self, identifier: &str) -> Result<()>;

    /// Free-text search, best hits first.
    async fn search(&self, query: &MemoryQuery) -> Result<Vec<ScoredContent>>;
}

/// The two concrete backend executors.
#[derive(Clone)]
pub struct BackendSet {
    structured: Arc<dyn BackendExecutor>,
    semantic: Arc<dyn BackendExecutor>,
}

impl BackendSet {
    pub fn new(structured: Arc<dyn BackendExecutor>, semantic: Arc<dyn BackendExecutor>) -> Self {
        Self {
            structured,
            semantic,
        }
    }

    /// Executor for a concrete backend.
    ///
    /// `Unified` and `Hybrid` do not name a single executor and yield an error.
    pub fn get(&self, backend: BackendKind) -> Result<&Arc<dyn BackendExecutor>> {
        match backend {
            BackendKind::Structured => Ok(&self.structured),
            BackendKind::Semantic => Ok(&self.semantic),
            other => Err(Error::Other(format!(
                "no single executor for backend '{}'",
                other
            ))),
        }
    }

    pub fn structured(&self) -> &Arc<dyn BackendExecutor> {
        &self.structured
    }

    pub fn semantic(&self) -> &Arc<dyn BackendExecutor> {
        &self.semantic
    }
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSet")
            .field("structured", &self.structured.name())
            .field("semantic", &self.semantic.name())
            .finish()
    }
}
