//! Cross-backend sync queue.
//!
//! Replication items are ordered by priority, then by enqueue sequence. A
//! drain cycle executes a bounded slice of the queue. An item stays queued
//! while it runs and leaves only when it succeeds, is abandoned after
//! `max_attempts` failures, or is purged. Purging an item that is already
//! executing revokes it: a completed copy is deleted from the target again.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use memroute_core::{BackendKind, BackendSet, ContentKind, MemoryContent, Priority};

use crate::config::SyncConfig;
use crate::utils::SharedClock;

/// Replication action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperationKind {
    Create,
    Update,
    Delete,
}

/// A pending replication task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
    pub sequence: u64,
    pub kind: SyncOperationKind,
    pub content: MemoryContent,
    pub source: BackendKind,
    pub target: BackendKind,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl SyncOperation {
    fn key(&self) -> QueueKey {
        (Reverse(self.priority), self.sequence)
    }
}

/// Replication target for content written to `source`, if it replicates at all
pub fn sync_target(source: BackendKind, kind: ContentKind) -> Option<BackendKind> {
    match (source, kind) {
        (BackendKind::Structured, ContentKind::Pattern | ContentKind::Semantic) => {
            Some(BackendKind::Semantic)
        }
        (BackendKind::Semantic, ContentKind::Session | ContentKind::Architectural) => {
            Some(BackendKind::Structured)
        }
        _ => None,
    }
}

/// Replication priority for a content kind
pub fn sync_priority(kind: ContentKind) -> Priority {
    match kind {
        ContentKind::Session | ContentKind::Architectural => Priority::High,
        ContentKind::Pattern => Priority::Medium,
        _ => Priority::Low,
    }
}

/// Outcome of one drain cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items dropped after reaching `max_attempts`
    pub abandoned: usize,
    /// Items purged while this cycle was executing them
    pub revoked: usize,
    pub remaining: usize,
    /// Sequence numbers in execution order
    pub executed: Vec<u64>,
    /// (identifier, target) of every successful replication
    pub replicated: Vec<(String, BackendKind)>,
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub pending: usize,
    pub enqueued: u64,
    pub succeeded: u64,
    pub failed_attempts: u64,
    pub abandoned: u64,
    pub purged: u64,
}

type QueueKey = (Reverse<Priority>, u64);

#[derive(Debug, Default)]
struct QueueInner {
    pending: BTreeMap<QueueKey, SyncOperation>,
    /// Items a drain is executing right now
    in_flight: HashSet<QueueKey>,
    /// In-flight items purged before they finished
    revoked: HashSet<QueueKey>,
    next_sequence: u64,
    stats: SyncStats,
}

/// How a finished item left the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Done,
    Retained,
    Abandoned,
    Revoked,
}

/// Marks one item as executing until dropped.
///
/// Dropping the guard without settling (a cancelled drain) leaves the item
/// queued for the next cycle.
struct InFlight<'a> {
    queue: &'a SyncQueue,
    key: QueueKey,
}

impl InFlight<'_> {
    fn succeed(self) -> Settled {
        let mut inner = self.queue.inner.lock();
        if inner.revoked.remove(&self.key) {
            return Settled::Revoked;
        }
        inner.pending.remove(&self.key);
        inner.stats.succeeded += 1;
        Settled::Done
    }

    fn fail(self, error: String) -> Settled {
        let max_attempts = self.queue.config.max_attempts;
        let mut inner = self.queue.inner.lock();
        if inner.revoked.remove(&self.key) {
            return Settled::Revoked;
        }
        inner.stats.failed_attempts += 1;

        let Some(op) = inner.pending.get_mut(&self.key) else {
            return Settled::Revoked;
        };
        op.attempts += 1;
        op.last_error = Some(error);
        if max_attempts > 0 && op.attempts >= max_attempts {
            let attempts = op.attempts;
            if let Some(op) = inner.pending.remove(&self.key) {
                warn!(
                    id = %op.content.id,
                    target = %op.target,
                    attempts,
                    "Sync abandoned"
                );
            }
            inner.stats.abandoned += 1;
            return Settled::Abandoned;
        }
        Settled::Retained
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut inner = self.queue.inner.lock();
        inner.in_flight.remove(&self.key);
        inner.revoked.remove(&self.key);
    }
}

/// Priority-ordered replication queue
pub struct SyncQueue {
    config: SyncConfig,
    clock: SharedClock,
    inner: Mutex<QueueInner>,
}

impl SyncQueue {
    pub fn new(config: SyncConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Queue replication of content written to `source`.
    ///
    /// Returns the number of items queued (0 when the content does not replicate).
    pub fn schedule(&self, content: &MemoryContent, source: BackendKind, kind: SyncOperationKind) -> usize {
        if !self.config.enabled {
            return 0;
        }
        match sync_target(source, content.kind) {
            Some(target) => {
                self.enqueue(kind, content.clone(), source, target, sync_priority(content.kind));
                1
            }
            None => 0,
        }
    }

    /// Queue an explicit replication and return its sequence number
    pub fn enqueue(
        &self,
        kind: SyncOperationKind,
        content: MemoryContent,
        source: BackendKind,
        target: BackendKind,
        priority: Priority,
    ) -> u64 {
        let enqueued_at = self.clock.now();
        let mut inner = self.inner.lock();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.stats.enqueued += 1;

        debug!(
            id = %content.id,
            source = %source,
            target = %target,
            priority = %priority,
            sequence,
            "Sync scheduled"
        );
        inner.pending.insert(
            (Reverse(priority), sequence),
            SyncOperation {
                sequence,
                kind,
                content,
                source,
                target,
                priority,
                enqueued_at,
                attempts: 0,
                last_error: None,
            },
        );
        sequence
    }

    /// Items the next cycle executes, in execution order. The queue is not changed.
    ///
    /// All high items and a bounded number of medium items are planned. Low
    /// items are only planned when nothing with higher priority was pending.
    /// Items another drain is executing are left out.
    pub fn plan_cycle(&self) -> Vec<SyncOperation> {
        let inner = self.inner.lock();

        let mut planned = Vec::new();
        let mut medium = 0;
        let mut urgent_pending = false;
        let mut low = 0;
        for (key, op) in &inner.pending {
            if inner.in_flight.contains(key) {
                continue;
            }
            match op.priority {
                Priority::High => {
                    urgent_pending = true;
                    planned.push(op.clone());
                }
                Priority::Medium => {
                    urgent_pending = true;
                    if medium < self.config.max_medium_per_cycle {
                        medium += 1;
                        planned.push(op.clone());
                    }
                }
                Priority::Low => {
                    if !urgent_pending && low < self.config.max_low_per_cycle {
                        low += 1;
                        planned.push(op.clone());
                    }
                }
            }
        }
        planned
    }

    /// Claim a planned item, or None when it was purged or claimed since planning
    fn claim(&self, key: QueueKey) -> Option<InFlight<'_>> {
        let mut inner = self.inner.lock();
        if !inner.pending.contains_key(&key) || !inner.in_flight.insert(key) {
            return None;
        }
        Some(InFlight { queue: self, key })
    }

    /// Execute one drain cycle against the target executors
    pub async fn drain(&self, backends: &BackendSet) -> DrainReport {
        let planned = self.plan_cycle();
        let mut report = DrainReport::default();

        for op in planned {
            let Some(flight) = self.claim(op.key()) else {
                continue;
            };
            report.attempted += 1;
            report.executed.push(op.sequence);

            let result = match backends.get(op.target) {
                Ok(executor) => match op.kind {
                    SyncOperationKind::Create | SyncOperationKind::Update => {
                        executor.write(&op.content).await
                    }
                    SyncOperationKind::Delete => executor.delete(&op.content.id).await,
                },
                Err(e) => Err(e),
            };

            let landed = result.is_ok();
            let settled = match result {
                Ok(()) => flight.succeed(),
                Err(e) => {
                    warn!(
                        id = %op.content.id,
                        target = %op.target,
                        attempts = op.attempts + 1,
                        error = %e,
                        "Sync failed"
                    );
                    flight.fail(e.to_string())
                }
            };

            match settled {
                Settled::Done => {
                    report.succeeded += 1;
                    report.replicated.push((op.content.id.clone(), op.target));
                }
                Settled::Retained => report.failed += 1,
                Settled::Abandoned => {
                    report.failed += 1;
                    report.abandoned += 1;
                }
                Settled::Revoked => {
                    report.revoked += 1;
                    if landed {
                        self.undo_revoked(backends, &op).await;
                    }
                }
            }
        }

        report.remaining = self.len();
        if report.attempted > 0 {
            debug!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                remaining = report.remaining,
                "Sync drain cycle"
            );
        }
        report
    }

    /// Remove a copy that landed after its item was purged
    async fn undo_revoked(&self, backends: &BackendSet, op: &SyncOperation) {
        if op.kind == SyncOperationKind::Delete {
            return;
        }
        let Ok(executor) = backends.get(op.target) else {
            return;
        };
        match executor.delete(&op.content.id).await {
            Ok(()) => debug!(id = %op.content.id, target = %op.target, "Revoked sync undone"),
            Err(e) => warn!(
                id = %op.content.id,
                target = %op.target,
                error = %e,
                "Revoked sync could not be undone"
            ),
        }
    }

    /// Drop pending items matching a predicate.
    ///
    /// Matching items that are executing right now are revoked.
    pub fn purge(&self, pred: impl Fn(&SyncOperation) -> bool) -> usize {
        let mut inner = self.inner.lock();
        let keys: Vec<QueueKey> = inner
            .pending
            .iter()
            .filter(|(_, op)| pred(op))
            .map(|(key, _)| *key)
            .collect();

        for key in &keys {
            inner.pending.remove(key);
            if inner.in_flight.contains(key) {
                inner.revoked.insert(*key);
            }
        }
        inner.stats.purged += keys.len() as u64;
        keys.len()
    }

    /// Drop pending items for one identifier
    pub fn purge_identifier(&self, identifier: &str) -> usize {
        self.purge(|op| op.content.id == identifier)
    }

    pub fn purge_all(&self) -> usize {
        self.purge(|_| true)
    }

    /// Snapshot of pending items in dequeue order
    pub fn pending(&self) -> Vec<SyncOperation> {
        self.inner.lock().pending.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SyncStats {
        let inner = self.inner.lock();
        SyncStats {
            pending: inner.pending.len(),
            ..inner.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{ManualClock, SystemClock};
    use memroute_core::InMemoryExecutor;
    use std::sync::Arc;

    fn queue() -> SyncQueue {
        SyncQueue::new(SyncConfig::default(), Arc::new(SystemClock))
    }

    fn backends() -> (Arc<InMemoryExecutor>, Arc<InMemoryExecutor>, BackendSet) {
        let structured = Arc::new(InMemoryExecutor::new("structured"));
        let semantic = Arc::new(InMemoryExecutor::new("semantic"));
        let set = BackendSet::new(structured.clone(), semantic.clone());
        (structured, semantic, set)
    }

    fn push(queue: &SyncQueue, priority: Priority) -> u64 {
        let content = MemoryContent::new(ContentKind::Project, format!("{} item", priority));
        queue.enqueue(
            SyncOperationKind::Create,
            content,
            BackendKind::Structured,
            BackendKind::Semantic,
            priority,
        )
    }

    #[test]
    fn test_replication_rules() {
        assert_eq!(
            sync_target(BackendKind::Structured, ContentKind::Pattern),
            Some(BackendKind::Semantic)
        );
        assert_eq!(
            sync_target(BackendKind::Semantic, ContentKind::Architectural),
            Some(BackendKind::Structured)
        );
        assert_eq!(sync_target(BackendKind::Structured, ContentKind::Session), None);
        assert_eq!(sync_target(BackendKind::Semantic, ContentKind::Pattern), None);
        assert_eq!(sync_target(BackendKind::Hybrid, ContentKind::Pattern), None);

        assert_eq!(sync_priority(ContentKind::Session), Priority::High);
        assert_eq!(sync_priority(ContentKind::Pattern), Priority::Medium);
        assert_eq!(sync_priority(ContentKind::Project), Priority::Low);
    }

    #[test]
    fn test_schedule_respects_rules_and_toggle() {
        let queue = queue();
        let pattern = MemoryContent::new(ContentKind::Pattern, "p");
        assert_eq!(queue.schedule(&pattern, BackendKind::Structured, SyncOperationKind::Create), 1);
        assert_eq!(queue.schedule(&pattern, BackendKind::Semantic, SyncOperationKind::Create), 0);
        assert_eq!(queue.pending()[0].priority, Priority::Medium);

        let disabled = SyncQueue::new(
            SyncConfig {
                enabled: false,
                ..Default::default()
            },
            Arc::new(SystemClock),
        );
        assert_eq!(disabled.schedule(&pattern, BackendKind::Structured, SyncOperationKind::Create), 0);
    }

    #[tokio::test]
    async fn test_drain_order_high_first() {
        let queue = queue();
        let (_, semantic, set) = backends();
        let low = push(&queue, Priority::Low);
        let high_a = push(&queue, Priority::High);
        let medium = push(&queue, Priority::Medium);
        let high_b = push(&queue, Priority::High);

        let report = queue.drain(&set).await;
        assert_eq!(report.executed, vec![high_a, high_b, medium]);
        assert_eq!(report.remaining, 1);
        assert_eq!(semantic.len(), 3);

        let report = queue.drain(&set).await;
        assert_eq!(report.executed, vec![low]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_medium_capped_per_cycle() {
        let queue = queue();
        let (_, _, set) = backends();
        let mediums: Vec<u64> = (0..5).map(|_| push(&queue, Priority::Medium)).collect();

        let report = queue.drain(&set).await;
        assert_eq!(report.executed, mediums[..3].to_vec());
        let report = queue.drain(&set).await;
        assert_eq!(report.executed, mediums[3..].to_vec());
    }

    #[tokio::test]
    async fn test_failed_items_keep_their_place() {
        let queue = queue();
        let (_, semantic, set) = backends();
        let first = push(&queue, Priority::High);
        let second = push(&queue, Priority::High);

        semantic.set_failing(true);
        let report = queue.drain(&set).await;
        assert_eq!(report.failed, 2);
        assert_eq!(report.remaining, 2);

        let pending = queue.pending();
        assert_eq!(pending[0].sequence, first);
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].last_error.as_deref().unwrap().contains("semantic"));

        let third = push(&queue, Priority::High);
        semantic.set_failing(false);
        let report = queue.drain(&set).await;
        assert_eq!(report.executed, vec![first, second, third]);
        assert_eq!(report.succeeded, 3);
        assert_eq!(queue.stats().failed_attempts, 2);
    }

    #[tokio::test]
    async fn test_delete_replication() {
        let queue = queue();
        let (structured, _, set) = backends();
        let content = MemoryContent::new(ContentKind::Session, "gone").with_id("s-1");
        structured.insert(content.clone());

        queue.enqueue(
            SyncOperationKind::Delete,
            content,
            BackendKind::Semantic,
            BackendKind::Structured,
            Priority::High,
        );
        let report = queue.drain(&set).await;
        assert_eq!(report.replicated, vec![("s-1".to_string(), BackendKind::Structured)]);
        assert!(!structured.contains("s-1"));
    }

    #[test]
    fn test_purge() {
        let queue = queue();
        push(&queue, Priority::Low);
        let content = MemoryContent::new(ContentKind::Session, "x").with_id("target");
        queue.enqueue(
            SyncOperationKind::Update,
            content,
            BackendKind::Semantic,
            BackendKind::Structured,
            Priority::High,
        );

        assert_eq!(queue.purge_identifier("target"), 1);
        assert_eq!(queue.purge_all(), 1);
        assert_eq!(queue.stats().purged, 2);
    }

    fn session_item(queue: &SyncQueue, id: &str) -> u64 {
        let content = MemoryContent::new(ContentKind::Session, "replicated session note").with_id(id);
        queue.enqueue(
            SyncOperationKind::Create,
            content,
            BackendKind::Structured,
            BackendKind::Semantic,
            Priority::High,
        )
    }

    fn manual_queue(config: SyncConfig) -> SyncQueue {
        SyncQueue::new(config, Arc::new(ManualClock::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_while_executing_undoes_copy() {
        let queue = manual_queue(SyncConfig::default());
        let (_, semantic, set) = backends();
        semantic.set_latency(std::time::Duration::from_millis(50));
        session_item(&queue, "s-1");

        let purge = async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            queue.purge_identifier("s-1")
        };
        let (report, purged) = tokio::join!(queue.drain(&set), purge);

        assert_eq!(purged, 1);
        assert_eq!(report.attempted, 1);
        assert_eq!(report.revoked, 1);
        assert_eq!(report.succeeded, 0);
        assert!(report.replicated.is_empty());
        assert!(!semantic.contains("s-1"));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_while_failing_is_not_requeued() {
        let queue = manual_queue(SyncConfig::default());
        let (_, semantic, set) = backends();
        semantic.set_latency(std::time::Duration::from_millis(50));
        semantic.set_failing(true);
        session_item(&queue, "s-1");

        let purge = async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            queue.purge_identifier("s-1")
        };
        let (report, _) = tokio::join!(queue.drain(&set), purge);

        assert_eq!(report.revoked, 1);
        assert_eq!(report.failed, 0);
        assert!(queue.is_empty());

        semantic.set_failing(false);
        let report = queue.drain(&set).await;
        assert_eq!(report.attempted, 0);
        assert!(!semantic.contains("s-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_drain_keeps_items() {
        let queue = manual_queue(SyncConfig::default());
        let (_, semantic, set) = backends();
        semantic.set_latency(std::time::Duration::from_millis(50));
        let sequence = session_item(&queue, "s-1");

        let cancelled = tokio::time::timeout(std::time::Duration::from_millis(10), queue.drain(&set)).await;
        assert!(cancelled.is_err());
        assert_eq!(queue.len(), 1);

        semantic.set_latency(std::time::Duration::ZERO);
        let report = queue.drain(&set).await;
        assert_eq!(report.executed, vec![sequence]);
        assert_eq!(report.succeeded, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failing_item_stays_until_abandoned() {
        let (_, semantic, set) = backends();
        semantic.set_failing(true);

        // Without a cap the item is retried on every cycle
        let unbounded = manual_queue(SyncConfig::default());
        session_item(&unbounded, "s-1");
        for _ in 0..5 {
            let report = unbounded.drain(&set).await;
            assert_eq!(report.failed, 1);
            assert_eq!(report.abandoned, 0);
        }
        assert_eq!(unbounded.pending()[0].attempts, 5);

        let capped = manual_queue(SyncConfig {
            max_attempts: 3,
            ..Default::default()
        });
        session_item(&capped, "s-2");
        for attempt in 1..3 {
            let report = capped.drain(&set).await;
            assert_eq!(report.remaining, 1);
            assert_eq!(capped.pending()[0].attempts, attempt);
        }
        let report = capped.drain(&set).await;
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(capped.stats().abandoned, 1);
        assert_eq!(capped.stats().failed_attempts, 3);
    }

    #[test]
    fn test_plan_cycle_leaves_queue_untouched() {
        let queue = queue();
        let high = push(&queue, Priority::High);
        push(&queue, Priority::Low);

        let planned: Vec<u64> = queue.plan_cycle().iter().map(|op| op.sequence).collect();
        assert_eq!(planned, vec![high]);
        assert_eq!(queue.len(), 2);
    }
}
