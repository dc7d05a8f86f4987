//! Batch reads and writes.
//!
//! Items run concurrently up to `batch.max_concurrency`. A failed item is
//! re-executed once sequentially, and a batch-wide timeout returns whatever
//! finished, marking the rest failed. Results always keep input order.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use memroute_core::{MemoryContent, MemoryQuery, OperationKind};

use super::metrics::{Optimization, PerformanceMetrics};
use super::result::MemoryResult;
use super::unified::UnifiedMemoryManager;
use crate::dedup::DedupEngine;
use crate::error::SDKError;
use crate::utils::content_hash;

/// Unfinished slots become failures carrying the batch timeout
fn fill_timed_out<T>(
    slots: Vec<Option<MemoryResult<T>>>,
    operation: OperationKind,
    timeout_ms: u64,
) -> Vec<MemoryResult<T>> {
    let error = SDKError::timeout(timeout_ms).to_string();
    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| MemoryResult::failure(error.clone(), PerformanceMetrics::new(operation)))
        })
        .collect()
}

/// Split a write batch into items that may run concurrently and items that
/// collide with an earlier item: same identifier, same content hash, or
/// similar enough for dedup to act on
fn partition_writes(contents: &[MemoryContent], dedup: &DedupEngine) -> (Vec<usize>, Vec<usize>) {
    let overlapping = dedup.overlaps_earlier(contents);
    let mut ids = HashSet::new();
    let mut hashes = HashSet::new();
    let mut concurrent = Vec::new();
    let mut deferred = Vec::new();

    for (i, content) in contents.iter().enumerate() {
        let fresh_id = ids.insert(content.id.as_str());
        let fresh_hash = hashes.insert(content_hash(&content.body));
        if fresh_id && fresh_hash && !overlapping[i] {
            concurrent.push(i);
        } else {
            deferred.push(i);
        }
    }
    (concurrent, deferred)
}

impl UnifiedMemoryManager {
    fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.config.batch.timeout_ms)
    }

    async fn run_batch<T, F, Fut>(
        &self,
        slots: &mut [Option<MemoryResult<T>>],
        concurrent: Vec<usize>,
        sequential: Vec<usize>,
        run: F,
    ) where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = MemoryResult<T>>,
    {
        let mut retry = Vec::new();
        {
            let mut results = stream::iter(concurrent)
                .map(|i| {
                    let item = run(i);
                    async move { (i, item.await) }
                })
                .buffer_unordered(self.config.batch.max_concurrency);
            while let Some((i, result)) = results.next().await {
                if !result.success {
                    retry.push(i);
                }
                slots[i] = Some(result);
            }
        }

        let mut remaining: Vec<(usize, bool)> = sequential
            .into_iter()
            .map(|i| (i, false))
            .chain(retry.into_iter().map(|i| (i, true)))
            .collect();
        remaining.sort_unstable();

        for (i, is_retry) in remaining {
            let mut result = run(i).await;
            result.metrics.add(Optimization::SequentialFallback);
            if is_retry {
                debug!(index = i, success = result.success, "Batch item retried");
            }
            slots[i] = Some(result);
        }
    }

    /// Read several queries
    pub async fn read_batch(&self, queries: &[MemoryQuery]) -> Vec<MemoryResult<MemoryContent>> {
        let mut slots: Vec<Option<MemoryResult<MemoryContent>>> = queries.iter().map(|_| None).collect();
        let indices: Vec<usize> = (0..queries.len()).collect();

        let run = self.run_batch(&mut slots, indices, Vec::new(), |i| self.read(&queries[i]));
        if tokio::time::timeout(self.batch_timeout(), run).await.is_err() {
            warn!(items = queries.len(), timeout_ms = self.config.batch.timeout_ms, "Read batch timed out");
        }
        fill_timed_out(slots, OperationKind::Read, self.config.batch.timeout_ms)
    }

    /// Write several items.
    ///
    /// Items sharing an identifier or content hash with an earlier item, or
    /// near duplicates of one, run sequentially after the others so
    /// deduplication sees the earlier write.
    pub async fn write_batch(&self, contents: &[MemoryContent]) -> Vec<MemoryResult<MemoryContent>> {
        let mut slots: Vec<Option<MemoryResult<MemoryContent>>> = contents.iter().map(|_| None).collect();
        let (concurrent, deferred) = partition_writes(contents, &self.dedup);
        debug!(concurrent = concurrent.len(), deferred = deferred.len(), "Write batch");

        let run = self.run_batch(&mut slots, concurrent, deferred, |i| self.write(contents[i].clone()));
        if tokio::time::timeout(self.batch_timeout(), run).await.is_err() {
            warn!(items = contents.len(), timeout_ms = self.config.batch.timeout_ms, "Write batch timed out");
        }
        fill_timed_out(slots, OperationKind::Write, self.config.batch.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use memroute_core::{BackendSet, ContentKind, InMemoryExecutor};

    use crate::config::{BatchConfig, ManagerConfig};
    use crate::utils::ManualClock;

    fn manager_with(
        batch: BatchConfig,
    ) -> (UnifiedMemoryManager, Arc<InMemoryExecutor>, Arc<InMemoryExecutor>) {
        let structured = Arc::new(InMemoryExecutor::new("structured"));
        let semantic = Arc::new(InMemoryExecutor::new("semantic"));
        let manager = UnifiedMemoryManager::with_clock(
            ManagerConfig::default().with_batch(batch),
            BackendSet::new(structured.clone(), semantic.clone()),
            Arc::new(ManualClock::default()),
        )
        .unwrap();
        (manager, structured, semantic)
    }

    fn session(body: &str) -> MemoryContent {
        MemoryContent::new(ContentKind::Session, body)
    }

    #[test]
    fn test_partition_defers_collisions() {
        let dedup = DedupEngine::new(Default::default());
        let a = session("Deploy window opens at nine after the release freeze lifts");
        let b = session("Rollback plan reviewed");
        let same_id = session("Cache warmed before traffic shifted").with_id(&a.id);
        let same_hash = session("Rollback plan reviewed");
        let near = session("Deploy window opens at nine after the release freeze lifts on Friday");
        let (concurrent, deferred) = partition_writes(&[a, b, same_id, same_hash, near], &dedup);
        assert_eq!(concurrent, vec![0, 1]);
        assert_eq!(deferred, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_write_batch_keeps_order_and_dedups() {
        let (manager, structured, _) = manager_with(BatchConfig::default());
        let items = vec![
            session("Deploy window opens at nine"),
            session("Rollback plan reviewed"),
            session("Deploy window opens at nine"),
        ];

        let results = manager.write_batch(&items).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(results[1].data.as_ref().unwrap().body, "Rollback plan reviewed");

        // The repeat ran after the first copy and was recognised
        let repeat = &results[2];
        assert!(repeat.dedup.as_ref().unwrap().exact);
        assert!(repeat.metrics.has(Optimization::SequentialFallback));
        assert_eq!(repeat.data.as_ref().unwrap().id, results[0].data.as_ref().unwrap().id);
        assert_eq!(structured.calls().writes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_batch_folds_near_duplicates() {
        let (manager, structured, _) = manager_with(BatchConfig::default());
        structured.set_latency(Duration::from_millis(10));
        let items = vec![
            session("Deploy window opens at nine after the release freeze lifts"),
            session("Rollback plan reviewed"),
            session("Deploy window opens at nine after the release freeze lifts on Friday"),
        ];

        let results = manager.write_batch(&items).await;
        assert!(results.iter().all(|r| r.success));

        let near = &results[2];
        assert!(near.metrics.has(Optimization::SequentialFallback));
        assert!(near.dedup.as_ref().unwrap().is_duplicate);
        assert_eq!(near.data.as_ref().unwrap().id, results[0].data.as_ref().unwrap().id);
        assert_eq!(structured.len(), 2);
    }

    #[tokio::test]
    async fn test_read_batch_keeps_order() {
        let (manager, structured, _) = manager_with(BatchConfig::default());
        let ids: Vec<String> = (0..5)
            .map(|i| {
                let content = session(&format!("entry {}", i));
                let id = content.id.clone();
                structured.insert(content);
                id
            })
            .collect();
        let queries: Vec<MemoryQuery> = ids.iter().map(|id| MemoryQuery::for_identifier(id)).collect();

        let results = manager.read_batch(&queries).await;
        for (i, result) in results.iter().enumerate() {
            assert!(result.success);
            assert_eq!(result.data.as_ref().unwrap().id, ids[i]);
        }
    }

    #[tokio::test]
    async fn test_failed_item_retried_once() {
        let (manager, structured, _) = manager_with(BatchConfig::default());
        structured.set_failing_writes(true);

        let results = manager.write_batch(&[session("Never lands")]).await;
        assert!(!results[0].success);
        assert!(results[0].metrics.has(Optimization::SequentialFallback));
        assert_eq!(structured.calls().writes, 2);
    }

    #[tokio::test]
    async fn test_batch_timeout_marks_unfinished() {
        let batch = BatchConfig {
            max_concurrency: 1,
            timeout_ms: 50,
        };
        let (manager, structured, semantic) = manager_with(batch);
        structured.set_latency(Duration::from_millis(30));
        semantic.set_latency(Duration::from_millis(30));

        let items: Vec<MemoryContent> = [
            "Rotate signing keys",
            "Archive stale branches",
            "Refresh lockfile pins",
            "Prune dangling images",
        ]
        .into_iter()
        .map(session)
        .collect();
        let results = manager.write_batch(&items).await;

        assert_eq!(results.len(), 4);
        assert!(results[0].success);
        assert!(!results[3].success);
        let expected = SDKError::timeout(50).to_string();
        assert_eq!(results[3].error.as_deref(), Some(expected.as_str()));
    }
}
