//! Duplicate detection engine.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use memroute_core::MemoryContent;

use super::signature::ContentSignature;
use super::similarity::{content_similarity, signature_similarity};
use crate::config::DedupConfig;
use crate::utils::content_hash;

/// What to do with content similar to an indexed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    /// Keep one of the two, whichever is newer
    Replace,
    /// Combine both bodies into the indexed item
    Merge,
    /// Store separately, linked to the indexed item
    Append,
}

impl MergeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Merge => "merge",
            Self::Append => "append",
        }
    }
}

/// One step of a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStep {
    PreserveCommon,
    AppendUnique,
    UnionTags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeStrategy {
    pub kind: MergeKind,
    /// Identifier of the indexed item
    pub target: String,
    /// The incoming content is at least as new as the indexed item
    pub prefer_new: bool,
    pub steps: Vec<MergeStep>,
}

/// Result of a duplicate check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupOutcome {
    pub is_duplicate: bool,
    /// Byte-identical to an indexed item
    pub exact: bool,
    pub existing_ref: Option<String>,
    pub similarity: Option<f64>,
    pub confidence: Option<f64>,
    pub merge_strategy: Option<MergeStrategy>,
}

impl DedupOutcome {
    /// Not similar to anything indexed
    pub fn unique() -> Self {
        Self {
            is_duplicate: false,
            exact: false,
            existing_ref: None,
            similarity: None,
            confidence: None,
            merge_strategy: None,
        }
    }

    pub fn strategy_kind(&self) -> Option<MergeKind> {
        self.merge_strategy.as_ref().map(|s| s.kind)
    }
}

#[derive(Debug, Clone)]
struct IndexedSignature {
    signature: ContentSignature,
    created_at: DateTime<Utc>,
}

/// Content hash and signature index
pub struct DedupEngine {
    config: DedupConfig,
    /// content hash -> identifier
    hashes: DashMap<String, String>,
    /// identifier -> signature
    signatures: DashMap<String, IndexedSignature>,
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            hashes: DashMap::new(),
            signatures: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn signature(&self, content: &MemoryContent) -> Option<ContentSignature> {
        match ContentSignature::compute(
            &content.body,
            self.config.fingerprint_terms,
            self.config.max_signature_bytes,
        ) {
            Ok(signature) => Some(signature),
            Err(e) => {
                warn!(id = %content.id, error = %e, "Signature unavailable, treating as unique");
                None
            }
        }
    }

    /// Compare content against the index without changing it
    pub fn analyze(&self, content: &MemoryContent) -> DedupOutcome {
        if !self.config.enabled {
            return DedupOutcome::unique();
        }

        let hash = content_hash(&content.body);
        let exact_ref = self.hashes.get(&hash).map(|id| id.value().clone());
        if let Some(existing) = exact_ref {
            let prefer_new = self.is_newer(content, &existing);
            debug!(id = %content.id, existing = %existing, "Exact duplicate");
            return DedupOutcome {
                is_duplicate: true,
                exact: true,
                existing_ref: Some(existing.clone()),
                similarity: Some(1.0),
                confidence: Some(1.0),
                merge_strategy: Some(MergeStrategy {
                    kind: MergeKind::Replace,
                    target: existing,
                    prefer_new,
                    steps: Vec::new(),
                }),
            };
        }

        let Some(signature) = self.signature(content) else {
            return DedupOutcome::unique();
        };

        let mut candidates: Vec<(f64, String)> = self
            .signatures
            .iter()
            .map(|e| (signature_similarity(&e.value().signature, &signature), e.key().clone()))
            .filter(|(score, _)| *score > self.config.candidate_threshold)
            .collect();
        candidates.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        let Some((_, best)) = candidates.into_iter().next() else {
            return DedupOutcome::unique();
        };
        let best_signature = match self.signatures.get(&best) {
            Some(entry) => entry.value().signature.clone(),
            None => return DedupOutcome::unique(),
        };

        let similarity = content_similarity(&best_signature, &signature);
        let prefer_new = self.is_newer(content, &best);
        let strategy = |kind: MergeKind, steps: Vec<MergeStep>| MergeStrategy {
            kind,
            target: best.clone(),
            prefer_new,
            steps,
        };

        let (is_duplicate, merge_strategy) = if similarity.score > self.config.replace_threshold {
            (true, Some(strategy(MergeKind::Replace, Vec::new())))
        } else if similarity.score > self.config.merge_threshold {
            let steps = vec![MergeStep::PreserveCommon, MergeStep::AppendUnique, MergeStep::UnionTags];
            (true, Some(strategy(MergeKind::Merge, steps)))
        } else if similarity.score > self.config.append_threshold {
            (false, Some(strategy(MergeKind::Append, Vec::new())))
        } else {
            (false, None)
        };

        debug!(
            id = %content.id,
            candidate = %best,
            score = similarity.score,
            strategy = merge_strategy.as_ref().map(|s| s.kind.as_str()).unwrap_or("none"),
            "Similarity check"
        );

        DedupOutcome {
            is_duplicate,
            exact: false,
            existing_ref: merge_strategy.as_ref().map(|s| s.target.clone()),
            similarity: Some(similarity.score),
            confidence: Some(similarity.confidence),
            merge_strategy,
        }
    }

    /// For each item, whether dedup would act on it because of an earlier
    /// item in the same slice: an equal hash, or a score above the append
    /// threshold. Nothing is indexed.
    pub fn overlaps_earlier(&self, contents: &[MemoryContent]) -> Vec<bool> {
        if !self.config.enabled {
            return vec![false; contents.len()];
        }
        let signatures: Vec<Option<ContentSignature>> = contents.iter().map(|c| self.signature(c)).collect();

        signatures
            .iter()
            .enumerate()
            .map(|(i, signature)| {
                let Some(signature) = signature else {
                    return false;
                };
                signatures[..i].iter().flatten().any(|earlier| {
                    earlier.content_hash == signature.content_hash
                        || content_similarity(earlier, signature).score > self.config.append_threshold
                })
            })
            .collect()
    }

    /// Analyze, and index the content when it is not a duplicate
    pub fn check(&self, content: &MemoryContent) -> DedupOutcome {
        let outcome = self.analyze(content);
        if !outcome.is_duplicate {
            self.commit(content);
        }
        outcome
    }

    /// Index content that was written. Re-indexing an identifier replaces its entry.
    pub fn commit(&self, content: &MemoryContent) -> bool {
        if !self.config.enabled {
            return false;
        }
        let Some(signature) = self.signature(content) else {
            return false;
        };

        self.forget(&content.id);
        self.hashes
            .insert(signature.content_hash.clone(), content.id.clone());
        self.signatures.insert(
            content.id.clone(),
            IndexedSignature {
                signature,
                created_at: content.created_at,
            },
        );
        true
    }

    /// Drop an identifier from the index
    pub fn forget(&self, identifier: &str) -> bool {
        match self.signatures.remove(identifier) {
            Some((_, indexed)) => {
                self.hashes
                    .remove_if(&indexed.signature.content_hash, |_, id| id == identifier);
                true
            }
            None => false,
        }
    }

    /// Indexed item count
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    fn is_newer(&self, content: &MemoryContent, existing: &str) -> bool {
        self.signatures
            .get(existing)
            .map(|e| content.created_at >= e.value().created_at)
            .unwrap_or(true)
    }
}

/// Apply a strategy to an indexed item and an incoming item.
///
/// The result carries the identifier the write should land on.
pub fn merge_contents(
    existing: &MemoryContent,
    incoming: &MemoryContent,
    strategy: &MergeStrategy,
) -> MemoryContent {
    match strategy.kind {
        MergeKind::Replace => {
            if strategy.prefer_new {
                incoming.clone().with_id(&existing.id)
            } else {
                existing.clone()
            }
        }
        MergeKind::Merge => {
            let mut lines: Vec<&str> = existing.body.lines().collect();
            for line in incoming.body.lines() {
                let trimmed = line.trim();
                if !trimmed.is_empty() && !lines.iter().any(|l| l.trim() == trimmed) {
                    lines.push(line);
                }
            }

            let mut merged = existing.clone();
            merged.body = lines.join("\n");
            merged
                .metadata
                .tags
                .extend(incoming.metadata.tags.iter().cloned());
            for dep in &incoming.metadata.dependencies {
                if !merged.metadata.dependencies.contains(dep) {
                    merged.metadata.dependencies.push(dep.clone());
                }
            }
            merged.metadata.priority = merged.metadata.priority.max(incoming.metadata.priority);
            merged.created_at = existing.created_at.max(incoming.created_at);
            merged
        }
        MergeKind::Append => {
            let mut related = incoming.clone();
            if related.id != existing.id && !related.metadata.dependencies.contains(&existing.id) {
                related.metadata.dependencies.push(existing.id.clone());
            }
            related
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use memroute_core::ContentKind;

    const BASE: &str = "Retry transient network failures with exponential backoff. \
        Retry budget caps backoff attempts. Exponential backoff doubles transient retry delays. \
        Network failures trigger retry budget checks.";

    fn engine() -> DedupEngine {
        DedupEngine::new(DedupConfig::default())
    }

    fn pattern(body: &str) -> MemoryContent {
        MemoryContent::new(ContentKind::Pattern, body)
    }

    /// The base text followed by `n` unrelated words
    fn padded(n: usize) -> String {
        let filler: Vec<String> = (0..n).map(|i| format!("filler{:03}", i)).collect();
        format!("{}\n{}", BASE, filler.join(" "))
    }

    #[test]
    fn test_unique_content_is_indexed() {
        let engine = engine();
        let outcome = engine.check(&pattern(BASE));
        assert!(!outcome.is_duplicate);
        assert!(outcome.merge_strategy.is_none());
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_exact_duplicate_idempotence() {
        let engine = engine();
        let first = pattern(BASE).with_id("first");
        engine.check(&first);

        let second = pattern(BASE);
        let outcome = engine.check(&second);
        assert!(outcome.is_duplicate);
        assert!(outcome.exact);
        assert_eq!(outcome.similarity, Some(1.0));
        assert_eq!(outcome.existing_ref.as_deref(), Some("first"));
        assert_eq!(outcome.strategy_kind(), Some(MergeKind::Replace));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_overlaps_earlier_within_slice() {
        let engine = engine();
        let items = [
            pattern(BASE),
            pattern("Render tables with fixed column widths"),
            pattern(&padded(2)),
            pattern(BASE),
        ];
        assert_eq!(engine.overlaps_earlier(&items), vec![false, false, true, true]);
        assert!(engine.is_empty());

        let disabled = DedupEngine::new(DedupConfig {
            enabled: false,
            ..Default::default()
        });
        assert_eq!(disabled.overlaps_earlier(&items), vec![false; 4]);
    }

    #[test]
    fn test_strategy_progression() {
        let engine = engine();
        engine.check(&pattern(BASE).with_id("base"));

        let expected = [
            (1, Some(MergeKind::Replace), true),
            (5, Some(MergeKind::Merge), true),
            (20, Some(MergeKind::Append), false),
            (300, None, false),
        ];
        let mut last = f64::INFINITY;
        for (n, kind, duplicate) in expected {
            let outcome = engine.analyze(&pattern(&padded(n)));
            assert_eq!(outcome.strategy_kind(), kind, "padding {}", n);
            assert_eq!(outcome.is_duplicate, duplicate, "padding {}", n);

            let similarity = outcome.similarity.unwrap();
            assert!(similarity < last);
            last = similarity;
        }
        // analyze never indexes
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_similarity_decreases_with_appended_text() {
        let engine = engine();
        engine.check(&pattern(BASE));

        let scores: Vec<f64> = (1..=12)
            .map(|n| engine.analyze(&pattern(&padded(n))).similarity.unwrap())
            .collect();
        assert!(scores.windows(2).all(|w| w[0] > w[1]), "{:?}", scores);
    }

    #[test]
    fn test_merge_target_and_confidence() {
        let engine = engine();
        engine.check(&pattern(BASE).with_id("base"));

        let outcome = engine.analyze(&pattern(&padded(5)));
        let strategy = outcome.merge_strategy.unwrap();
        assert_eq!(strategy.target, "base");
        assert!(strategy.prefer_new);
        assert_eq!(
            strategy.steps,
            vec![MergeStep::PreserveCommon, MergeStep::AppendUnique, MergeStep::UnionTags]
        );
        let confidence = outcome.confidence.unwrap();
        assert!(confidence > 0.0 && confidence < outcome.similarity.unwrap());
    }

    #[test]
    fn test_replace_keeps_newer_side() {
        let engine = engine();
        engine.check(&pattern(BASE).with_id("base"));

        let older = pattern(&padded(1)).with_created_at(Utc::now() - Duration::days(1));
        let outcome = engine.analyze(&older);
        assert_eq!(outcome.strategy_kind(), Some(MergeKind::Replace));
        assert!(!outcome.merge_strategy.unwrap().prefer_new);
    }

    #[test]
    fn test_commit_reindexes_identifier() {
        let engine = engine();
        engine.commit(&pattern(BASE).with_id("doc"));
        engine.commit(&pattern("Completely different body about caches.").with_id("doc"));
        assert_eq!(engine.len(), 1);
        assert!(!engine.analyze(&pattern(BASE)).exact);
    }

    #[test]
    fn test_forget() {
        let engine = engine();
        engine.check(&pattern(BASE).with_id("doc"));
        assert!(engine.forget("doc"));
        assert!(engine.is_empty());
        assert!(!engine.analyze(&pattern(BASE)).is_duplicate);
        assert!(!engine.forget("doc"));
    }

    #[test]
    fn test_signature_failure_degrades_to_unique() {
        let engine = DedupEngine::new(DedupConfig {
            max_signature_bytes: 16,
            ..Default::default()
        });
        let outcome = engine.check(&pattern(BASE));
        assert_eq!(outcome, DedupOutcome::unique());
        assert!(engine.is_empty());
    }

    #[test]
    fn test_disabled_engine() {
        let engine = DedupEngine::new(DedupConfig {
            enabled: false,
            ..Default::default()
        });
        engine.check(&pattern(BASE));
        assert!(!engine.check(&pattern(BASE)).is_duplicate);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_merge_contents() {
        let existing = pattern("line one\nline two")
            .with_id("a")
            .with_tags(["retry"]);
        let incoming = pattern("line two\nline three")
            .with_tags(["backoff"])
            .with_dependency("x");
        let strategy = MergeStrategy {
            kind: MergeKind::Merge,
            target: "a".into(),
            prefer_new: true,
            steps: vec![MergeStep::PreserveCommon, MergeStep::AppendUnique, MergeStep::UnionTags],
        };

        let merged = merge_contents(&existing, &incoming, &strategy);
        assert_eq!(merged.id, "a");
        assert_eq!(merged.body, "line one\nline two\nline three");
        assert_eq!(merged.metadata.tags.len(), 2);
        assert_eq!(merged.metadata.dependencies, vec!["x".to_string()]);
        assert_eq!(merged.created_at, existing.created_at.max(incoming.created_at));

        let append = MergeStrategy {
            kind: MergeKind::Append,
            ..strategy.clone()
        };
        let related = merge_contents(&existing, &incoming, &append);
        assert_eq!(related.id, incoming.id);
        assert!(related.metadata.dependencies.contains(&"a".to_string()));

        let replace = MergeStrategy {
            kind: MergeKind::Replace,
            prefer_new: false,
            ..strategy
        };
        assert_eq!(merge_contents(&existing, &incoming, &replace), existing);
    }
}
