//! Flow Optimizer
//!
//! The stateful half of the SDK:
//! - `cache`: size-bounded query cache with kind-dependent TTLs
//! - `sync`: priority-ordered cross-backend replication queue
//! - `prediction`: keyword-triggered preload model
//! - `optimizer`: the façade the manager talks to

mod cache;
mod optimizer;
mod prediction;
mod sync;

pub use cache::{CacheEntry, CacheHit, CachePayload, CacheStats, QueryCache, cache_key};
pub use optimizer::FlowOptimizer;
pub use prediction::{Prediction, PredictionPattern, PredictiveLoader, default_patterns};
pub use sync::{
    DrainReport, SyncOperation, SyncOperationKind, SyncQueue, SyncStats, sync_priority,
    sync_target,
};
