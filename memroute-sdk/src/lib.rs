//! memroute SDK - Routing, caching and deduplication between memory backends
//!
//! This crate sits between callers and two backend stores, a structured
//! (session) store and a semantic (pattern) store, reached through the
//! `BackendExecutor` contract from `memroute-core`.
//!
//! # Modules
//!
//! - **routing** - Picks the backend for each operation from rules, access patterns and latency
//! - **flow** - Query cache, background sync queue and predictive preload
//! - **dedup** - Content signatures and near-duplicate detection
//! - **manager** - The unified operation surface callers use
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use memroute_core::{BackendSet, ContentKind, InMemoryExecutor, MemoryContent, MemoryQuery};
//! use memroute_sdk::{ManagerConfig, UnifiedMemoryManager};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let backends = BackendSet::new(
//!         Arc::new(InMemoryExecutor::new("structured")),
//!         Arc::new(InMemoryExecutor::new("semantic")),
//!     );
//!     let manager = UnifiedMemoryManager::new(ManagerConfig::load()?, backends)?;
//!     manager.start_background_tasks();
//!
//!     let written = manager
//!         .write(MemoryContent::new(ContentKind::Pattern, "Retry with exponential backoff"))
//!         .await;
//!     if let Some(content) = written.data {
//!         let read = manager.read(&MemoryQuery::for_identifier(&content.id)).await;
//!         assert!(read.metrics.cache_hit);
//!     }
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dedup;
pub mod flow;
pub mod manager;
pub mod routing;
pub mod utils;

mod error;

// Re-export main SDK types
pub use config::{ConfigValidationError, ManagerConfig};
pub use error::{SDKError, SDKResult};
pub use manager::{
    MaintenanceReport, MemoryResult, Optimization, PerformanceMetrics, PerformanceReport,
    UnifiedMemoryManager,
};
pub use routing::{RoutingDecision, RoutingEngine};
