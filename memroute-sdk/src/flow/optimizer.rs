//! Flow optimizer façade over the cache, sync queue and preload model.

use std::sync::Arc;

use tracing::{debug, warn};

use memroute_core::{
    BackendKind, BackendSet, MemoryContent, MemoryQuery, OperationKind, Priority, QueryContext,
};

use super::cache::{CachePayload, CacheStats, QueryCache, cache_key};
use super::prediction::{Prediction, PredictiveLoader};
use super::sync::{DrainReport, SyncOperationKind, SyncQueue};
use crate::config::ManagerConfig;
use crate::utils::SharedClock;

/// Owns the cache, the sync queue and the predictive loader
pub struct FlowOptimizer {
    cache: Arc<QueryCache>,
    sync: Arc<SyncQueue>,
    prediction: Arc<PredictiveLoader>,
    backends: BackendSet,
}

impl FlowOptimizer {
    pub fn new(config: &ManagerConfig, backends: BackendSet, clock: SharedClock) -> Self {
        Self {
            cache: Arc::new(QueryCache::new(config.cache.clone(), clock.clone())),
            sync: Arc::new(SyncQueue::new(config.sync.clone(), clock)),
            prediction: Arc::new(PredictiveLoader::new(config.prediction.clone())),
            backends,
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn sync_queue(&self) -> &Arc<SyncQueue> {
        &self.sync
    }

    pub fn predictions(&self) -> &Arc<PredictiveLoader> {
        &self.prediction
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cache
    // ─────────────────────────────────────────────────────────────────────────

    /// Cached payload for a query, if live
    pub fn check_cache(&self, operation: OperationKind, query: &MemoryQuery) -> Option<CachePayload> {
        let key = cache_key(operation, query);
        let hit = self.cache.get(&key)?;
        if hit.was_preloaded {
            if let Some(id) = &query.identifier {
                self.prediction.record_useful(id);
            }
        }
        debug!(operation = %operation, key = %key, "Cache hit");
        Some(hit.payload)
    }

    /// Cached payload for a query, without counting a hit or miss
    pub fn peek_cache(&self, operation: OperationKind, query: &MemoryQuery) -> Option<CachePayload> {
        self.cache.peek(&cache_key(operation, query))
    }

    pub fn update_cache(&self, operation: OperationKind, query: &MemoryQuery, payload: CachePayload) -> bool {
        let key = cache_key(operation, query);
        self.cache
            .insert(&key, query.identifier.as_deref(), payload, false)
    }

    pub fn invalidate(&self, identifier: Option<&str>) -> usize {
        self.cache.invalidate(identifier)
    }

    pub fn invalidate_relevant(&self, content: &MemoryContent) -> usize {
        self.cache.invalidate_relevant(content)
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue replication of freshly written content
    pub fn schedule_sync(&self, content: &MemoryContent, source: BackendKind) -> usize {
        self.schedule_sync_as(content, source, SyncOperationKind::Create)
    }

    pub fn schedule_sync_as(&self, content: &MemoryContent, source: BackendKind, kind: SyncOperationKind) -> usize {
        self.sync.schedule(content, source, kind)
    }

    /// Queue a copy to a backend whose hybrid write failed
    pub fn schedule_repair(&self, content: &MemoryContent, source: BackendKind, target: BackendKind) -> u64 {
        self.sync.enqueue(
            SyncOperationKind::Create,
            content.clone(),
            source,
            target,
            Priority::High,
        )
    }

    pub async fn drain_sync_queue(&self) -> DrainReport {
        self.sync.drain(&self.backends).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Prediction
    // ─────────────────────────────────────────────────────────────────────────

    fn uncached_predictions(&self, context: &QueryContext) -> Vec<Prediction> {
        if !self.prediction.is_enabled() {
            return Vec::new();
        }
        self.prediction
            .predict(context)
            .into_iter()
            .filter(|p| !self.cache.contains(&cache_key(OperationKind::Read, &p.query())))
            .collect()
    }

    /// Start preloading predicted items in the background.
    ///
    /// Returns the predictions that were scheduled. Failures are logged only.
    pub fn predictive_load(&self, context: &QueryContext) -> Vec<Prediction> {
        let predictions = self.uncached_predictions(context);
        if predictions.is_empty() {
            return predictions;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No runtime available for predictive preload");
                return Vec::new();
            }
        };

        let cache = Arc::clone(&self.cache);
        let backends = self.backends.clone();
        let scheduled = predictions.clone();
        handle.spawn(async move {
            for prediction in &predictions {
                preload_one(&cache, &backends, prediction).await;
            }
        });
        scheduled
    }

    /// Preload predicted items and wait for completion.
    ///
    /// Returns the predictions whose item was found and cached.
    pub async fn preload(&self, context: &QueryContext) -> Vec<Prediction> {
        let mut loaded = Vec::new();
        for prediction in self.uncached_predictions(context) {
            if preload_one(&self.cache, &self.backends, &prediction).await {
                loaded.push(prediction);
            }
        }
        loaded
    }

    pub fn refresh_predictions(&self) -> usize {
        self.prediction.refresh()
    }
}

async fn preload_one(cache: &QueryCache, backends: &BackendSet, prediction: &Prediction) -> bool {
    let query = prediction.query();
    let executor = match backends.get(prediction.backend) {
        Ok(executor) => executor,
        Err(e) => {
            warn!(identifier = %prediction.identifier, error = %e, "Preload skipped");
            return false;
        }
    };

    match executor.read(&query).await {
        Ok(Some(content)) => {
            let key = cache_key(OperationKind::Read, &query);
            let cached = cache.insert(
                &key,
                Some(prediction.identifier.as_str()),
                CachePayload::Content(content),
                true,
            );
            debug!(identifier = %prediction.identifier, cached, "Preloaded");
            cached
        }
        Ok(None) => false,
        Err(e) => {
            warn!(identifier = %prediction.identifier, error = %e, "Preload failed");
            false
        }
    }
}
