//! In-memory backend executor.
//!
//! A `DashMap`-backed executor with optional simulated latency, failure
//! injection and per-operation call counters. Used by tests and by the
//! performance benchmark; it is not a production store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use crate::error::{Error, Result};
use crate::executor::BackendExecutor;
use crate::types::{MemoryContent, MemoryFilters, MemoryQuery, ScoredContent};

/// Snapshot of executor call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub reads: usize,
    pub writes: usize,
    pub lists: usize,
    pub deletes: usize,
    pub searches: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.reads + self.writes + self.lists + self.deletes + self.searches
    }
}

#[derive(Default)]
struct Counters {
    reads: AtomicUsize,
    writes: AtomicUsize,
    lists: AtomicUsize,
    deletes: AtomicUsize,
    searches: AtomicUsize,
}

pub struct InMemoryExecutor {
    name: String,
    data: DashMap<String, MemoryContent>,
    latency_ms: AtomicU64,
    failing: AtomicBool,
    failing_writes: AtomicBool,
    counters: Counters,
}

impl InMemoryExecutor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: DashMap::new(),
            latency_ms: AtomicU64::new(0),
            failing: AtomicBool::new(false),
            failing_writes: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Add simulated latency to every call
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Make every call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Make writes fail while reads keep working
    pub fn set_failing_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::Relaxed);
    }

    /// Seed an item without counting a call
    pub fn insert(&self, content: MemoryContent) {
        self.data.insert(content.id.clone(), content);
    }

    /// Direct lookup without counting a call
    #[must_use]
    pub fn get(&self, id: &str) -> Option<MemoryContent> {
        self.data.get(id).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.data.contains_key(id)
    }

    /// Get current item count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all items
    pub fn clear(&self) {
        self.data.clear();
    }

    #[must_use]
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            lists: self.counters.lists.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            searches: self.counters.searches.load(Ordering::Relaxed),
        }
    }

    async fn simulate(&self, counter: &AtomicUsize) -> Result<()> {
        counter.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.failing.load(Ordering::Relaxed) {
            trace!(backend = %self.name, "Injected failure");
            return Err(Error::backend(&self.name, "simulated failure"));
        }
        Ok(())
    }

    fn score(terms: &[String], body: &str) -> f64 {
        if terms.is_empty() {
            return 0.0;
        }
        let words: HashSet<String> = tokenize(body).collect();
        let matched = terms.iter().filter(|t| words.contains(*t)).count();
        matched as f64 / terms.len() as f64
    }
}

impl Default for InMemoryExecutor {
    fn default() -> Self {
        Self::new("memory")
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
        .map(str::to_lowercase)
}

#[async_trait]
impl BackendExecutor for InMemoryExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, query: &MemoryQuery) -> Result<Option<MemoryContent>> {
        self.simulate(&self.counters.reads).await?;

        if let Some(id) = &query.identifier {
            return Ok(self.get(id));
        }

        let filters = query.filters.clone().unwrap_or_default();
        if let Some(text) = &query.content {
            let terms: Vec<String> = tokenize(text).collect();
            let best = self
                .data
                .iter()
                .filter(|e| filters.matches(e.value()))
                .map(|e| (Self::score(&terms, &e.value().body), e.value().clone()))
                .filter(|(score, _)| *score > 0.0)
                .max_by(|a, b| {
                    a.0.partial_cmp(&b.0)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.1.id.cmp(&a.1.id))
                });
            return Ok(best.map(|(_, content)| content));
        }

        let mut matching: Vec<MemoryContent> = self
            .data
            .iter()
            .filter(|e| filters.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching.into_iter().next())
    }

    async fn write(&self, content: &MemoryContent) -> Result<()> {
        self.simulate(&self.counters.writes).await?;

        if self.failing_writes.load(Ordering::Relaxed) {
            return Err(Error::backend(&self.name, "simulated write failure"));
        }
        self.data.insert(content.id.clone(), content.clone());
        Ok(())
    }

    async fn list(&self, filters: &MemoryFilters) -> Result<Vec<MemoryContent>> {
        self.simulate(&self.counters.lists).await?;

        let mut items: Vec<MemoryContent> = self
            .data
            .iter()
            .filter(|e| filters.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filters.limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn delete(&self, identifier: &str) -> Result<()> {
        self.simulate(&self.counters.deletes).await?;
        self.data.remove(identifier);
        Ok(())
    }

    async fn search(&self, query: &MemoryQuery) -> Result<Vec<ScoredContent>> {
        self.simulate(&self.counters.searches).await?;

        let terms: Vec<String> = query
            .content
            .as_deref()
            .map(|t| tokenize(t).collect())
            .unwrap_or_default();
        let filters = query.filters.clone().unwrap_or_default();

        let mut hits: Vec<ScoredContent> = self
            .data
            .iter()
            .filter(|e| filters.matches(e.value()))
            .filter_map(|e| {
                let score = Self::score(&terms, &e.value().body);
                (score > 0.0).then(|| ScoredContent {
                    content: e.value().clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.content.id.cmp(&b.content.id))
        });
        if let Some(limit) = filters.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }
}
