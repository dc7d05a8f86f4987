//! Unified memory manager.
//!
//! The public façade over routing, caching, deduplication and sync. Every
//! operation follows the same shape: consult the cache, route, execute
//! against one or both backends, then update the shared tables and record
//! metrics.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, warn};

use memroute_core::{
    BackendKind, BackendSet, MemoryContent, MemoryFilters, MemoryQuery, OperationKind,
    ScoredContent,
};

use super::lifecycle::BackgroundTasks;
use super::metrics::{MetricsTracker, Optimization, PerformanceMetrics, PerformanceReport};
use super::result::MemoryResult;
use crate::config::ManagerConfig;
use crate::dedup::{DedupEngine, DedupOutcome, MergeKind, merge_contents};
use crate::error::SDKResult;
use crate::flow::{CachePayload, FlowOptimizer, SyncOperationKind};
use crate::routing::RoutingEngine;
use crate::utils::{SharedClock, SystemClock, content_hash};

/// Concrete backends an operation routed to `backend` runs against
fn execution_plan(backend: BackendKind) -> Vec<BackendKind> {
    if backend.is_concrete() {
        vec![backend]
    } else {
        BackendKind::CONCRETE.to_vec()
    }
}

/// Same kind and annotations. The origin stamp is ignored.
fn same_metadata(a: &MemoryContent, b: &MemoryContent) -> bool {
    a.kind == b.kind
        && a.metadata.content_type == b.metadata.content_type
        && a.metadata.tags == b.metadata.tags
        && a.metadata.priority == b.metadata.priority
        && a.metadata.dependencies == b.metadata.dependencies
}

fn join_errors(errors: &[(BackendKind, String)]) -> String {
    errors
        .iter()
        .map(|(backend, e)| format!("{}: {}", backend, e))
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct UnifiedMemoryManager {
    pub(super) config: ManagerConfig,
    pub(super) backends: BackendSet,
    pub(super) routing: Arc<RoutingEngine>,
    pub(super) dedup: Arc<DedupEngine>,
    pub(super) flow: Arc<FlowOptimizer>,
    pub(super) metrics: Arc<MetricsTracker>,
    pub(super) clock: SharedClock,
    pub(super) background: Mutex<Option<BackgroundTasks>>,
}

impl UnifiedMemoryManager {
    /// Create a manager on the wall clock.
    ///
    /// Background tasks are not started; see `start_background_tasks`.
    pub fn new(config: ManagerConfig, backends: BackendSet) -> SDKResult<Self> {
        Self::with_clock(config, backends, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ManagerConfig, backends: BackendSet, clock: SharedClock) -> SDKResult<Self> {
        let routing = RoutingEngine::new(config.routing.clone(), clock.clone());
        Self::with_routing_engine(config, backends, routing, clock)
    }

    /// Create a manager around a preconfigured routing engine
    pub fn with_routing_engine(
        config: ManagerConfig,
        backends: BackendSet,
        routing: RoutingEngine,
        clock: SharedClock,
    ) -> SDKResult<Self> {
        config.validate()?;
        Ok(Self {
            routing: Arc::new(routing),
            dedup: Arc::new(DedupEngine::new(config.dedup.clone())),
            flow: Arc::new(FlowOptimizer::new(&config, backends.clone(), clock.clone())),
            metrics: Arc::new(MetricsTracker::new(config.metrics.window)),
            background: Mutex::new(None),
            config,
            backends,
            clock,
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    pub fn routing_engine(&self) -> &Arc<RoutingEngine> {
        &self.routing
    }

    pub fn dedup_engine(&self) -> &Arc<DedupEngine> {
        &self.dedup
    }

    pub fn flow_optimizer(&self) -> &Arc<FlowOptimizer> {
        &self.flow
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Await one executor call, recording its latency and outcome
    async fn call<T, F>(&self, backend: BackendKind, call: F) -> memroute_core::Result<T>
    where
        F: Future<Output = memroute_core::Result<T>>,
    {
        let started = Instant::now();
        let result = call.await;
        let elapsed = started.elapsed();
        self.routing.record_latency(backend, elapsed);
        self.metrics.record_backend(backend, elapsed, result.is_ok());
        if let Err(e) = &result {
            warn!(backend = %backend, error = %e, "Backend call failed");
        }
        result
    }

    /// Stamp elapsed time and report the operation
    pub(super) fn finish<T>(&self, mut result: MemoryResult<T>, started: Instant) -> MemoryResult<T> {
        result.metrics.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record(&result.metrics, result.success);
        result
    }

    /// ≥ `complex_filter_keys` keys, or a date range with any other key
    pub fn is_complex_filter(&self, filters: &MemoryFilters) -> bool {
        let keys = filters.key_count();
        keys >= self.config.query.complex_filter_keys || (filters.date_range.is_some() && keys >= 2)
    }

    /// Current content for an identifier, from the cache or a known location
    async fn lookup_existing(&self, identifier: &str) -> Option<MemoryContent> {
        let query = MemoryQuery::for_identifier(identifier);
        if let Some(CachePayload::Content(content)) = self.flow.peek_cache(OperationKind::Read, &query) {
            return Some(content);
        }

        for backend in self.routing.find_locations(identifier) {
            let Ok(executor) = self.backends.get(backend) else {
                continue;
            };
            if let Ok(Some(content)) = self.call(backend, executor.read(&query)).await {
                return Some(content);
            }
        }
        None
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read
    // ─────────────────────────────────────────────────────────────────────────

    /// Read one item. Not found is a success with no data.
    pub async fn read(&self, query: &MemoryQuery) -> MemoryResult<MemoryContent> {
        let started = Instant::now();
        let mut metrics = PerformanceMetrics::new(OperationKind::Read);

        if let Some(context) = &query.context {
            if !self.flow.predictive_load(context).is_empty() {
                metrics.add(Optimization::PredictivePreload);
            }
        }

        if let Some(CachePayload::Content(content)) = self.flow.check_cache(OperationKind::Read, query) {
            metrics.cache_hit = true;
            metrics.add(Optimization::CacheHit);
            return self.finish(MemoryResult::ok(Some(content), metrics), started);
        }

        let decision = self.routing.route_read(query);
        metrics.backend = Some(decision.backend);
        let plan = execution_plan(decision.backend);
        if plan.len() > 1 {
            metrics.add(Optimization::ParallelExecution);
        }

        let calls = plan.iter().map(|&backend| async move {
            let result = match self.backends.get(backend) {
                Ok(executor) => self.call(backend, executor.read(query)).await,
                Err(e) => Err(e),
            };
            (backend, result)
        });

        let mut found: Vec<(BackendKind, MemoryContent)> = Vec::new();
        let mut errors = Vec::new();
        for (backend, result) in join_all(calls).await {
            match result {
                Ok(Some(content)) => found.push((backend, content)),
                Ok(None) => {}
                Err(e) => errors.push((backend, e.to_string())),
            }
        }

        if errors.len() == plan.len() {
            let result = MemoryResult::failure(join_errors(&errors), metrics).with_routing(Some(decision));
            return self.finish(result, started);
        }

        let newest = found
            .iter()
            .max_by(|a, b| a.1.created_at.cmp(&b.1.created_at))
            .map(|(_, content)| content.clone());
        if found.len() > 1 {
            metrics.add(Optimization::HybridMerge);
        }

        if let Some(content) = &newest {
            for (backend, item) in &found {
                if item.id == content.id {
                    self.routing.record_location(&item.id, *backend);
                }
            }
            self.flow
                .update_cache(OperationKind::Read, query, CachePayload::Content(content.clone()));
        }
        debug!(backend = %decision.backend, found = newest.is_some(), "Read complete");

        self.finish(MemoryResult::ok(newest, metrics).with_routing(Some(decision)), started)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Write
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist content, deduplicating against what was written before.
    ///
    /// The returned data is the content as written, which for a replace or
    /// merge carries the existing identifier.
    pub async fn write(&self, content: MemoryContent) -> MemoryResult<MemoryContent> {
        let started = Instant::now();
        let mut metrics = PerformanceMetrics::new(OperationKind::Write);

        // A cached copy under the same identifier with the same body and metadata
        let id_query = MemoryQuery::for_identifier(&content.id);
        if let Some(CachePayload::Content(cached)) = self.flow.peek_cache(OperationKind::Read, &id_query) {
            if content_hash(&cached.body) == content_hash(&content.body) && same_metadata(&cached, &content) {
                metrics.cache_hit = true;
                metrics.add(Optimization::CacheHit);
                metrics.add(Optimization::Deduplicated);
                let outcome = DedupOutcome {
                    is_duplicate: true,
                    exact: true,
                    existing_ref: Some(cached.id.clone()),
                    similarity: Some(1.0),
                    confidence: Some(1.0),
                    merge_strategy: None,
                };
                debug!(id = %content.id, "Write skipped, cached exact duplicate");
                let result = MemoryResult::ok(Some(cached), metrics).with_dedup(Some(outcome));
                return self.finish(result, started);
            }
        }

        let outcome = self.dedup.analyze(&content);
        let mut effective = content.clone();
        let mut sync_kind = SyncOperationKind::Create;

        if outcome.exact {
            let existing_id = outcome
                .existing_ref
                .clone()
                .unwrap_or_else(|| content.id.clone());

            // Same body: only newer, different metadata is worth a write
            let refreshed = match &outcome.merge_strategy {
                Some(strategy) if strategy.prefer_new => match self.lookup_existing(&existing_id).await {
                    Some(existing) if !same_metadata(&existing, &content) => {
                        Some(merge_contents(&existing, &content, strategy))
                    }
                    _ => None,
                },
                _ => None,
            };

            match refreshed {
                Some(updated) => {
                    debug!(id = %content.id, existing = %existing_id, "Exact duplicate with new metadata");
                    effective = updated;
                    sync_kind = SyncOperationKind::Update;
                    metrics.add(Optimization::Deduplicated);
                    metrics.add(Optimization::Replaced);
                }
                None => {
                    metrics.add(Optimization::Deduplicated);
                    debug!(id = %content.id, existing = %existing_id, "Write skipped, exact duplicate");
                    let result =
                        MemoryResult::ok(Some(content.with_id(existing_id)), metrics).with_dedup(Some(outcome));
                    return self.finish(result, started);
                }
            }
        } else if let Some(strategy) = &outcome.merge_strategy {
            match strategy.kind {
                MergeKind::Replace | MergeKind::Merge => match self.lookup_existing(&strategy.target).await {
                    Some(existing) => {
                        effective = merge_contents(&existing, &content, strategy);
                        sync_kind = SyncOperationKind::Update;
                        metrics.add(Optimization::Deduplicated);
                        metrics.add(if strategy.kind == MergeKind::Replace {
                            Optimization::Replaced
                        } else {
                            Optimization::Merged
                        });
                    }
                    None => {
                        warn!(
                            id = %content.id,
                            target = %strategy.target,
                            strategy = strategy.kind.as_str(),
                            "Existing content unavailable, writing as new"
                        );
                    }
                },
                MergeKind::Append => {
                    if !effective.metadata.dependencies.contains(&strategy.target) {
                        effective.metadata.dependencies.push(strategy.target.clone());
                    }
                    metrics.add(Optimization::Appended);
                }
            }
        }

        let decision = self.routing.route_write(&effective);
        if effective.metadata.origin == BackendKind::Unified {
            effective.metadata.origin = decision.backend;
        }
        metrics.backend = Some(decision.backend);
        let plan = execution_plan(decision.backend);
        if plan.len() > 1 {
            metrics.add(Optimization::ParallelExecution);
        }

        let target = &effective;
        let calls = plan.iter().map(|&backend| async move {
            let result = match self.backends.get(backend) {
                Ok(executor) => self.call(backend, executor.write(target)).await,
                Err(e) => Err(e),
            };
            (backend, result)
        });

        let mut succeeded = Vec::new();
        let mut errors = Vec::new();
        for (backend, result) in join_all(calls).await {
            match result {
                Ok(()) => succeeded.push(backend),
                Err(e) => errors.push((backend, e.to_string())),
            }
        }

        if succeeded.is_empty() {
            let result = MemoryResult::failure(join_errors(&errors), metrics)
                .with_routing(Some(decision))
                .with_dedup(Some(outcome));
            return self.finish(result, started);
        }

        // Hybrid partial failure: copy to the side that missed it
        for (failed, _) in &errors {
            self.flow.schedule_repair(&effective, succeeded[0], *failed);
            metrics.add(Optimization::SyncScheduled);
        }

        self.dedup.commit(&effective);
        self.flow.invalidate(Some(effective.id.as_str()));
        self.flow.invalidate_relevant(&effective);
        self.flow.update_cache(
            OperationKind::Read,
            &MemoryQuery::for_identifier(&effective.id),
            CachePayload::Content(effective.clone()),
        );
        if plan.len() == 1 && self.flow.schedule_sync_as(&effective, succeeded[0], sync_kind) > 0 {
            metrics.add(Optimization::SyncScheduled);
        }
        for backend in &succeeded {
            self.routing.record_location(&effective.id, *backend);
        }
        debug!(id = %effective.id, backend = %decision.backend, "Write complete");

        let result = MemoryResult::ok(Some(effective), metrics)
            .with_routing(Some(decision))
            .with_dedup(Some(outcome));
        self.finish(result, started)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // List & search
    // ─────────────────────────────────────────────────────────────────────────

    /// List items, newest first
    pub async fn list(&self, filters: &MemoryFilters) -> MemoryResult<Vec<MemoryContent>> {
        let started = Instant::now();
        let mut metrics = PerformanceMetrics::new(OperationKind::List);

        let cache_query = MemoryQuery::for_filters(filters.clone());
        if let Some(CachePayload::Contents(items)) = self.flow.check_cache(OperationKind::List, &cache_query) {
            metrics.cache_hit = true;
            metrics.add(Optimization::CacheHit);
            return self.finish(MemoryResult::ok(Some(items), metrics), started);
        }

        // Complex filters skip routing and query both backends
        let decision = if self.is_complex_filter(filters) {
            None
        } else {
            Some(self.routing.route_list(filters))
        };
        let backend = decision
            .as_ref()
            .map(|d| d.backend)
            .unwrap_or(BackendKind::Hybrid);
        metrics.backend = Some(backend);
        let plan = execution_plan(backend);
        if plan.len() > 1 {
            metrics.add(Optimization::ParallelExecution);
        }

        let calls = plan.iter().map(|&backend| async move {
            let result = match self.backends.get(backend) {
                Ok(executor) => self.call(backend, executor.list(filters)).await,
                Err(e) => Err(e),
            };
            (backend, result)
        });

        let mut merged: HashMap<String, MemoryContent> = HashMap::new();
        let mut errors = Vec::new();
        let mut answered = 0;
        for (backend, result) in join_all(calls).await {
            let items = match result {
                Ok(items) => items,
                Err(e) => {
                    errors.push((backend, e.to_string()));
                    continue;
                }
            };
            answered += 1;
            for item in items {
                self.routing.record_location(&item.id, backend);
                match merged.get(&item.id) {
                    Some(current) if current.created_at >= item.created_at => {}
                    _ => {
                        merged.insert(item.id.clone(), item);
                    }
                }
            }
        }

        if answered == 0 {
            let result = MemoryResult::failure(join_errors(&errors), metrics).with_routing(decision);
            return self.finish(result, started);
        }
        if answered > 1 {
            metrics.add(Optimization::HybridMerge);
        }

        let mut items: Vec<MemoryContent> = merged.into_values().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filters.limit {
            items.truncate(limit);
        }

        // A partial answer is returned but not cached
        if errors.is_empty() {
            self.flow
                .update_cache(OperationKind::List, &cache_query, CachePayload::Contents(items.clone()));
        }
        self.finish(MemoryResult::ok(Some(items), metrics).with_routing(decision), started)
    }

    /// Free-text search, best hits first
    pub async fn search(&self, query: &MemoryQuery) -> MemoryResult<Vec<ScoredContent>> {
        let started = Instant::now();
        let mut metrics = PerformanceMetrics::new(OperationKind::Search);

        if let Some(CachePayload::Scored(hits)) = self.flow.check_cache(OperationKind::Search, query) {
            metrics.cache_hit = true;
            metrics.add(Optimization::CacheHit);
            return self.finish(MemoryResult::ok(Some(hits), metrics), started);
        }

        let decision = self.routing.route_search(query);
        metrics.backend = Some(decision.backend);
        let plan = execution_plan(decision.backend);
        if plan.len() > 1 {
            metrics.add(Optimization::ParallelExecution);
        }

        let calls = plan.iter().map(|&backend| async move {
            let result = match self.backends.get(backend) {
                Ok(executor) => self.call(backend, executor.search(query)).await,
                Err(e) => Err(e),
            };
            (backend, result)
        });

        let mut merged: HashMap<String, ScoredContent> = HashMap::new();
        let mut errors = Vec::new();
        let mut answered = 0;
        for (backend, result) in join_all(calls).await {
            let hits = match result {
                Ok(hits) => hits,
                Err(e) => {
                    errors.push((backend, e.to_string()));
                    continue;
                }
            };
            answered += 1;
            for hit in hits {
                self.routing.record_location(&hit.content.id, backend);
                match merged.get(&hit.content.id) {
                    Some(current) if current.score >= hit.score => {}
                    _ => {
                        merged.insert(hit.content.id.clone(), hit);
                    }
                }
            }
        }

        if answered == 0 {
            let result = MemoryResult::failure(join_errors(&errors), metrics).with_routing(Some(decision));
            return self.finish(result, started);
        }
        if answered > 1 {
            metrics.add(Optimization::HybridMerge);
        }

        let limit = query
            .filters
            .as_ref()
            .and_then(|f| f.limit)
            .unwrap_or(self.config.query.default_search_limit);
        let mut hits: Vec<ScoredContent> = merged.into_values().collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.content.id.cmp(&b.content.id))
        });
        hits.truncate(limit);

        if errors.is_empty() {
            self.flow
                .update_cache(OperationKind::Search, query, CachePayload::Scored(hits.clone()));
        }
        self.finish(MemoryResult::ok(Some(hits), metrics).with_routing(Some(decision)), started)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Delete
    // ─────────────────────────────────────────────────────────────────────────

    /// Delete an identifier everywhere it is known to live.
    ///
    /// Returns the backends the item was deleted from. Local state for the
    /// identifier is dropped even when a backend fails.
    pub async fn delete(&self, identifier: &str) -> MemoryResult<Vec<BackendKind>> {
        let started = Instant::now();
        let mut metrics = PerformanceMetrics::new(OperationKind::Delete);

        let locations = self.routing.find_locations(identifier);
        metrics.backend = Some(match locations.as_slice() {
            [single] => *single,
            _ => BackendKind::Hybrid,
        });
        if locations.len() > 1 {
            metrics.add(Optimization::ParallelExecution);
        }

        let calls = locations.iter().map(|&backend| async move {
            let result = match self.backends.get(backend) {
                Ok(executor) => self.call(backend, executor.delete(identifier)).await,
                Err(e) => Err(e),
            };
            (backend, result)
        });

        let mut succeeded = Vec::new();
        let mut errors = Vec::new();
        for (backend, result) in join_all(calls).await {
            match result {
                Ok(()) => succeeded.push(backend),
                Err(e) => errors.push((backend, e.to_string())),
            }
        }

        for backend in &succeeded {
            self.routing.forget_location(identifier, *backend);
        }
        self.flow.invalidate(Some(identifier));
        self.dedup.forget(identifier);
        let purged = self.flow.sync_queue().purge_identifier(identifier);
        debug!(identifier, deleted = succeeded.len(), purged, "Delete complete");

        let result = if errors.is_empty() {
            MemoryResult::ok(Some(succeeded), metrics)
        } else {
            MemoryResult::failure(join_errors(&errors), metrics)
        };
        self.finish(result, started)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get_performance_metrics(&self) -> PerformanceReport {
        PerformanceReport {
            summary: self.metrics.recalculate(self.clock.now()),
            cache: self.flow.cache_stats(),
            sync: self.flow.sync_queue().stats(),
            dedup_index_size: self.dedup.len(),
            access_patterns: self.routing.access_pattern_count(),
            background_running: self.is_background_running(),
        }
    }
}
