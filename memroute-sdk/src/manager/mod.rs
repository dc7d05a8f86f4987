//! Unified Memory Manager
//!
//! The caller-facing operation surface:
//! - `read`, `write`, `list`, `search`, `delete`
//! - `read_batch`, `write_batch`
//! - `get_performance_metrics`, `run_performance_benchmark`
//! - `start_background_tasks`, `shutdown`, `run_maintenance_cycle`
//!
//! Operations never return `Err`. Backend failures surface as a
//! `MemoryResult` with `success == false`.

mod batch;
mod benchmark;
mod lifecycle;
mod metrics;
mod result;
mod unified;

pub use benchmark::{BenchmarkReport, OperationBenchmark};
pub use lifecycle::MaintenanceReport;
pub use metrics::{
    BackendSummary, MetricsSummary, MetricsTracker, OperationSummary, Optimization,
    PerformanceMetrics, PerformanceReport,
};
pub use result::MemoryResult;
pub use unified::UnifiedMemoryManager;
