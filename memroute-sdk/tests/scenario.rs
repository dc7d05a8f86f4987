//! End-to-end scenarios through the unified manager.

use std::io::Write;
use std::sync::Arc;

use chrono::Duration;
use memroute_core::{BackendKind, BackendSet, ContentKind, InMemoryExecutor, MemoryContent, MemoryQuery};
use memroute_sdk::dedup::MergeKind;
use memroute_sdk::utils::ManualClock;
use memroute_sdk::{ManagerConfig, Optimization, UnifiedMemoryManager};

const PATTERN_A: &str = "## Retry with backoff\n\
Retry transient network failures with exponential backoff.\n\
Cap the retry budget so backoff never exceeds thirty seconds.\n\
- log every retry attempt\n\
- surface the final error";

struct Harness {
    manager: UnifiedMemoryManager,
    structured: Arc<InMemoryExecutor>,
    semantic: Arc<InMemoryExecutor>,
    clock: Arc<ManualClock>,
}

fn harness(config: ManagerConfig) -> Harness {
    let structured = Arc::new(InMemoryExecutor::new("structured"));
    let semantic = Arc::new(InMemoryExecutor::new("semantic"));
    let clock = Arc::new(ManualClock::default());
    let manager = UnifiedMemoryManager::with_clock(
        config,
        BackendSet::new(structured.clone(), semantic.clone()),
        clock.clone(),
    )
    .unwrap();
    Harness {
        manager,
        structured,
        semantic,
        clock,
    }
}

#[tokio::test]
async fn test_pattern_lifecycle_cache_merge_and_expiry() {
    let h = harness(ManagerConfig::default());

    // 1. A pattern lands on the semantic backend
    let written = h
        .manager
        .write(MemoryContent::new(ContentKind::Pattern, PATTERN_A))
        .await;
    assert!(written.success);
    assert_eq!(written.routing.as_ref().unwrap().backend, BackendKind::Semantic);
    let a = written.data.unwrap();
    assert!(h.semantic.contains(&a.id));
    assert!(!h.structured.contains(&a.id));

    // 2. Reading it back is served from cache
    let reads_before = h.semantic.calls().reads;
    let cached = h.manager.read(&MemoryQuery::for_identifier(&a.id)).await;
    assert!(cached.success);
    assert!(cached.metrics.cache_hit);
    assert!(cached.routing.is_none());
    assert_eq!(cached.data.as_ref().unwrap().body, PATTERN_A);
    assert_eq!(h.semantic.calls().reads, reads_before);

    // 3. A near duplicate merges into the existing item
    let variant = format!("{}\n- add jitter to each retry delay", PATTERN_A);
    let merged = h
        .manager
        .write(MemoryContent::new(ContentKind::Pattern, variant))
        .await;
    assert!(merged.success);
    let outcome = merged.dedup.as_ref().unwrap();
    assert!(outcome.is_duplicate);
    assert!(!outcome.exact);
    assert_eq!(outcome.strategy_kind(), Some(MergeKind::Merge));
    assert!(merged.metrics.has(Optimization::Merged));
    let merged_content = merged.data.unwrap();
    assert_eq!(merged_content.id, a.id);
    assert!(merged_content.body.ends_with("- add jitter to each retry delay"));
    assert_eq!(h.semantic.len(), 1);

    // 4. Past the pattern TTL the read misses and routes again
    h.clock.advance(Duration::minutes(31));
    let reads_before = h.semantic.calls().reads;
    let fresh = h.manager.read(&MemoryQuery::for_identifier(&a.id)).await;
    assert!(fresh.success);
    assert!(!fresh.metrics.cache_hit);
    assert!(fresh.routing.is_some());
    assert_eq!(h.semantic.calls().reads, reads_before + 1);
    assert!(fresh.data.unwrap().body.contains("jitter"));
}

#[tokio::test]
async fn test_batch_write_then_delete_everything() {
    let h = harness(ManagerConfig::default());
    let items = vec![
        MemoryContent::new(ContentKind::Session, "Opened workspace at the repository root"),
        MemoryContent::new(ContentKind::Project, "Workspace members share dependency tables"),
        MemoryContent::new(ContentKind::Session, "Opened workspace at the repository root"),
    ];

    let results = h.manager.write_batch(&items).await;
    assert!(results.iter().all(|r| r.success));
    assert!(results[2].dedup.as_ref().unwrap().exact);

    let ids: Vec<String> = results[..2]
        .iter()
        .map(|r| r.data.as_ref().unwrap().id.clone())
        .collect();
    for id in &ids {
        let deleted = h.manager.delete(id).await;
        assert!(deleted.success, "delete failed: {:?}", deleted.error);
    }
    assert!(h.structured.is_empty());

    let report = h.manager.get_performance_metrics();
    assert_eq!(report.dedup_index_size, 0);
    assert_eq!(report.cache.entries, 0);
    assert_eq!(report.sync.pending, 0);
}

#[tokio::test]
async fn test_config_file_drives_manager() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[cache]\npattern_ttl_secs = 60\n\n[dedup]\nenabled = false\n"
    )
    .unwrap();
    let config = ManagerConfig::from_file(file.path()).unwrap();
    let h = harness(config);

    let a = h
        .manager
        .write(MemoryContent::new(ContentKind::Pattern, PATTERN_A))
        .await
        .data
        .unwrap();
    // Dedup is off, so an identical body is stored again
    let b = h
        .manager
        .write(MemoryContent::new(ContentKind::Pattern, PATTERN_A))
        .await
        .data
        .unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(h.semantic.len(), 2);

    h.clock.advance(Duration::seconds(61));
    let read = h.manager.read(&MemoryQuery::for_identifier(&a.id)).await;
    assert!(!read.metrics.cache_hit);
}
