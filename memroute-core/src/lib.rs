//! memroute-core - Core library for memroute
//!
//! This crate provides the pieces shared by every memroute component and by
//! backend adapters:
//!
//! - **types**: Queries, content payloads, filters and backend/content kinds
//! - **executor**: The `BackendExecutor` contract a backend store implements
//! - **memory**: An in-memory executor for tests, demos and benchmarks
//! - **error**: Backend-facing error type

pub mod error;
pub mod executor;
pub mod memory;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use executor::{BackendExecutor, BackendSet};
pub use memory::InMemoryExecutor;
pub use types::{
    BackendKind, ContentKind, ContentMetadata, DateRange, MemoryContent, MemoryFilters,
    MemoryQuery, OperationKind, Priority, QueryContext, ScoredContent,
};
