//! Synthetic performance benchmark.
//!
//! The run uses a scratch manager over the same executors, so the caller's
//! cache, dedup index, access patterns and metrics are left untouched. Only
//! the executors see traffic, and everything written is deleted again.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use memroute_core::{ContentKind, MemoryContent, MemoryQuery, OperationKind};

use super::metrics::PerformanceMetrics;
use super::result::MemoryResult;
use super::unified::UnifiedMemoryManager;

/// Kinds cycled through so both backends see traffic
const BENCHMARK_KINDS: [ContentKind; 3] = [ContentKind::Session, ContentKind::Pattern, ContentKind::Project];

const BENCHMARK_TAG: &str = "benchmark";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationBenchmark {
    pub operations: usize,
    pub failures: usize,
    pub total_ms: f64,
    pub avg_ms: f64,
}

impl OperationBenchmark {
    fn record<T>(&mut self, result: &MemoryResult<T>) {
        self.operations += 1;
        if !result.success {
            self.failures += 1;
        }
        self.total_ms += result.metrics.elapsed_ms;
        self.avg_ms = self.total_ms / self.operations as f64;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub iterations: usize,
    pub operations: BTreeMap<OperationKind, OperationBenchmark>,
    pub total_operations: usize,
    pub elapsed_ms: f64,
    pub throughput_ops_per_sec: f64,
    /// Fraction of benchmark reads served from cache
    pub cache_hit_rate: f64,
    /// Writes the dedup engine folded into an earlier sample
    pub deduplicated: usize,
}

/// A body sharing no words with any other sample
fn sample_body() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    let words: Vec<&str> = (0..hex.len()).step_by(8).map(|i| &hex[i..i + 8]).collect();
    words.join(" ")
}

impl UnifiedMemoryManager {
    /// Run `iterations` write, read, read, search cycles and delete what was written
    pub async fn run_performance_benchmark(&self, iterations: usize) -> MemoryResult<BenchmarkReport> {
        let started = Instant::now();
        let mut metrics = PerformanceMetrics::new(OperationKind::Benchmark);

        let scratch = match UnifiedMemoryManager::with_routing_engine(
            self.config.clone(),
            self.backends.clone(),
            self.routing.detached(),
            self.clock.clone(),
        ) {
            Ok(scratch) => scratch,
            Err(e) => return MemoryResult::failure(e.to_string(), metrics),
        };

        let mut operations: BTreeMap<OperationKind, OperationBenchmark> = BTreeMap::new();
        let mut written = Vec::with_capacity(iterations);
        let mut reads = 0usize;
        let mut read_hits = 0usize;
        let mut deduplicated = 0usize;
        let run_id = Uuid::new_v4();

        for i in 0..iterations {
            let kind = BENCHMARK_KINDS[i % BENCHMARK_KINDS.len()];
            let body = sample_body();
            let search_term = body.split(' ').next().unwrap_or_default().to_string();
            let content = MemoryContent::new(kind, body).with_tags([BENCHMARK_TAG]);

            let write = scratch.write(content).await;
            operations.entry(OperationKind::Write).or_default().record(&write);
            if write.dedup.as_ref().is_some_and(|d| d.is_duplicate) {
                deduplicated += 1;
            }
            let Some(stored) = write.data else {
                continue;
            };

            // The second read is expected to come from cache
            for _ in 0..2 {
                let read = scratch.read(&MemoryQuery::for_identifier(&stored.id)).await;
                operations.entry(OperationKind::Read).or_default().record(&read);
                reads += 1;
                if read.metrics.cache_hit {
                    read_hits += 1;
                }
            }

            let search = scratch.search(&MemoryQuery::search(search_term)).await;
            operations.entry(OperationKind::Search).or_default().record(&search);

            if !written.contains(&stored.id) {
                written.push(stored.id);
            }
        }

        for id in &written {
            let delete = scratch.delete(id).await;
            operations.entry(OperationKind::Delete).or_default().record(&delete);
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let total_operations: usize = operations.values().map(|o| o.operations).sum();
        let report = BenchmarkReport {
            iterations,
            operations,
            total_operations,
            elapsed_ms,
            throughput_ops_per_sec: if elapsed_ms > 0.0 {
                total_operations as f64 / (elapsed_ms / 1000.0)
            } else {
                0.0
            },
            cache_hit_rate: if reads == 0 { 0.0 } else { read_hits as f64 / reads as f64 },
            deduplicated,
        };
        info!(
            run = %run_id,
            iterations,
            total_operations,
            deduplicated,
            elapsed_ms = report.elapsed_ms,
            "Benchmark complete"
        );

        metrics.elapsed_ms = elapsed_ms;
        MemoryResult::ok(Some(report), metrics)
    }
}
