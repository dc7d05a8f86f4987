//! Performance metrics.
//!
//! Every operation attaches a `PerformanceMetrics` record to its result and
//! reports it to the `MetricsTracker`, which keeps lifetime totals and a
//! sliding window of recent samples for averages.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use memroute_core::{BackendKind, OperationKind};

use crate::flow::{CacheStats, SyncStats};

/// Optimization applied while serving an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimization {
    CacheHit,
    Deduplicated,
    Merged,
    Appended,
    Replaced,
    ParallelExecution,
    HybridMerge,
    SyncScheduled,
    PredictivePreload,
    SequentialFallback,
}

/// Per-operation performance record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub operation: OperationKind,
    pub elapsed_ms: f64,
    pub cache_hit: bool,
    pub backend: Option<BackendKind>,
    pub optimizations: Vec<Optimization>,
}

impl PerformanceMetrics {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            elapsed_ms: 0.0,
            cache_hit: false,
            backend: None,
            optimizations: Vec::new(),
        }
    }

    /// Record an optimization once
    pub fn add(&mut self, optimization: Optimization) {
        if !self.optimizations.contains(&optimization) {
            self.optimizations.push(optimization);
        }
    }

    pub fn has(&self, optimization: Optimization) -> bool {
        self.optimizations.contains(&optimization)
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    operation: OperationKind,
    elapsed_ms: f64,
}

#[derive(Debug, Default, Clone)]
struct BackendStats {
    operations: u64,
    errors: u64,
    total_ms: f64,
}

#[derive(Debug, Default)]
struct MetricsInner {
    recent: VecDeque<Sample>,
    total: u64,
    successful: u64,
    failed: u64,
    cache_hits: u64,
    per_operation: BTreeMap<OperationKind, u64>,
    optimizations: BTreeMap<Optimization, u64>,
    backends: BTreeMap<BackendKind, BackendStats>,
}

/// Count and recent average for one operation kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub count: u64,
    pub avg_ms: f64,
}

/// Backend executor call statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendSummary {
    pub operations: u64,
    pub errors: u64,
    pub avg_ms: f64,
}

/// Aggregated metrics at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_operations: u64,
    pub successful: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    /// Average over the recent window
    pub avg_elapsed_ms: f64,
    pub per_operation: BTreeMap<OperationKind, OperationSummary>,
    pub backends: BTreeMap<BackendKind, BackendSummary>,
    pub optimizations: BTreeMap<Optimization, u64>,
    pub calculated_at: DateTime<Utc>,
}

/// Everything `get_performance_metrics` reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub summary: MetricsSummary,
    pub cache: CacheStats,
    pub sync: SyncStats,
    pub dedup_index_size: usize,
    pub access_patterns: usize,
    pub background_running: bool,
}

pub struct MetricsTracker {
    window: usize,
    inner: Mutex<MetricsInner>,
    latest: RwLock<Option<MetricsSummary>>,
}

impl MetricsTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            inner: Mutex::new(MetricsInner::default()),
            latest: RwLock::new(None),
        }
    }

    /// Record a finished operation
    pub fn record(&self, metrics: &PerformanceMetrics, success: bool) {
        let mut inner = self.inner.lock();
        inner.total += 1;
        if success {
            inner.successful += 1;
        } else {
            inner.failed += 1;
        }
        if metrics.cache_hit {
            inner.cache_hits += 1;
        }
        *inner.per_operation.entry(metrics.operation).or_insert(0) += 1;
        for optimization in &metrics.optimizations {
            *inner.optimizations.entry(*optimization).or_insert(0) += 1;
        }

        if inner.recent.len() == self.window {
            inner.recent.pop_front();
        }
        inner.recent.push_back(Sample {
            operation: metrics.operation,
            elapsed_ms: metrics.elapsed_ms,
        });
    }

    /// Record one backend executor call
    pub fn record_backend(&self, backend: BackendKind, elapsed: Duration, ok: bool) {
        let mut inner = self.inner.lock();
        let stats = inner.backends.entry(backend).or_default();
        stats.operations += 1;
        stats.total_ms += elapsed.as_secs_f64() * 1000.0;
        if !ok {
            stats.errors += 1;
        }
    }

    /// Recompute the summary and keep it as the latest
    pub fn recalculate(&self, now: DateTime<Utc>) -> MetricsSummary {
        let summary = {
            let inner = self.inner.lock();

            let mut per_operation: BTreeMap<OperationKind, OperationSummary> = inner
                .per_operation
                .iter()
                .map(|(op, count)| {
                    (
                        *op,
                        OperationSummary {
                            count: *count,
                            avg_ms: 0.0,
                        },
                    )
                })
                .collect();
            let mut window_totals: BTreeMap<OperationKind, (f64, u64)> = BTreeMap::new();
            for sample in &inner.recent {
                let entry = window_totals.entry(sample.operation).or_insert((0.0, 0));
                entry.0 += sample.elapsed_ms;
                entry.1 += 1;
            }
            for (op, (total, n)) in window_totals {
                if let Some(summary) = per_operation.get_mut(&op) {
                    summary.avg_ms = total / n as f64;
                }
            }

            let recent_total: f64 = inner.recent.iter().map(|s| s.elapsed_ms).sum();
            MetricsSummary {
                total_operations: inner.total,
                successful: inner.successful,
                failed: inner.failed,
                cache_hits: inner.cache_hits,
                cache_hit_rate: ratio(inner.cache_hits, inner.total),
                avg_elapsed_ms: if inner.recent.is_empty() {
                    0.0
                } else {
                    recent_total / inner.recent.len() as f64
                },
                per_operation,
                backends: inner
                    .backends
                    .iter()
                    .map(|(backend, stats)| {
                        (
                            *backend,
                            BackendSummary {
                                operations: stats.operations,
                                errors: stats.errors,
                                avg_ms: if stats.operations == 0 {
                                    0.0
                                } else {
                                    stats.total_ms / stats.operations as f64
                                },
                            },
                        )
                    })
                    .collect(),
                optimizations: inner.optimizations.clone(),
                calculated_at: now,
            }
        };

        *self.latest.write() = Some(summary.clone());
        summary
    }

    /// The last summary computed, if any
    pub fn latest(&self) -> Option<MetricsSummary> {
        self.latest.read().clone()
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
