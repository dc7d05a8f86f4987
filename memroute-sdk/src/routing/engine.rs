//! Routing engine implementation.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use memroute_core::{
    BackendKind, ContentKind, MemoryContent, MemoryFilters, MemoryQuery, OperationKind,
};

use super::classifier::{KeywordClassifier, QueryClassifier};
use super::rules::{RoutingPayload, RoutingRule, RuleTable};
use crate::config::RoutingConfig;
use crate::utils::SharedClock;

/// Confidence of an explicit backend hint
pub const CONFIDENCE_EXPLICIT: f64 = 1.0;
/// Confidence of a rule match
pub const CONFIDENCE_RULE: f64 = 0.9;
/// Confidence of a semantic-query override
pub const CONFIDENCE_SEMANTIC: f64 = 0.85;
/// Confidence of a learned access pattern
pub const CONFIDENCE_PATTERN: f64 = 0.8;
/// Confidence of choosing the faster fallback
pub const CONFIDENCE_FALLBACK: f64 = 0.7;
/// Confidence of the catch-all rule
pub const CONFIDENCE_DEFAULT: f64 = 0.6;

/// Which branch of the decision procedure produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingBranch {
    ExplicitHint,
    SemanticOverride,
    AccessPattern,
    RuleMatch,
    FallbackPreferred,
    ComplexQuery,
    Default,
}

/// Output of one routing call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub backend: BackendKind,
    pub reason: String,
    pub confidence: f64,
    /// At most two other backends that could serve the operation
    pub alternatives: Vec<BackendKind>,
    pub branch: RoutingBranch,
}

/// Running statistics for one (operation, content kind) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPattern {
    pub operation: OperationKind,
    pub kind: Option<ContentKind>,
    pub preferred: BackendKind,
    /// In [0, 1]
    pub frequency: f64,
    pub last_access: DateTime<Utc>,
    pub observations: u64,
}

type PatternKey = (OperationKind, Option<ContentKind>);

#[derive(Debug)]
struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, ms: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(ms);
    }

    fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Routing engine.
///
/// Owns the rule table, access-pattern table, latency windows and the
/// identifier location index. All tables are safe to use concurrently.
pub struct RoutingEngine {
    config: RoutingConfig,
    rules: RwLock<RuleTable>,
    classifier: Arc<dyn QueryClassifier>,
    patterns: DashMap<PatternKey, AccessPattern>,
    latencies: DashMap<BackendKind, LatencyWindow>,
    locations: DashMap<String, BTreeSet<BackendKind>>,
    clock: SharedClock,
}

impl RoutingEngine {
    /// Create an engine with the default rule table and classifier
    pub fn new(config: RoutingConfig, clock: SharedClock) -> Self {
        Self::with_parts(config, RuleTable::default(), Arc::new(KeywordClassifier), clock)
    }

    pub fn with_parts(
        config: RoutingConfig,
        rules: RuleTable,
        classifier: Arc<dyn QueryClassifier>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            rules: RwLock::new(rules),
            classifier,
            patterns: DashMap::new(),
            latencies: DashMap::new(),
            locations: DashMap::new(),
            clock,
        }
    }

    /// An engine with the same rules, classifier and clock, and empty tables
    pub fn detached(&self) -> Self {
        Self::with_parts(
            self.config.clone(),
            self.rules.read().clone(),
            Arc::clone(&self.classifier),
            self.clock.clone(),
        )
    }

    /// Classifier used for semantic/complex detection
    pub fn classifier(&self) -> &Arc<dyn QueryClassifier> {
        &self.classifier
    }

    /// Add a routing rule
    pub fn add_rule(&self, rule: RoutingRule) {
        self.rules.write().add(rule);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Routing operations
    // ─────────────────────────────────────────────────────────────────────────

    pub fn route_read(&self, query: &MemoryQuery) -> RoutingDecision {
        let payload = query_payload(OperationKind::Read, query);
        self.decide(payload, query.backend_hint(), false)
    }

    pub fn route_write(&self, content: &MemoryContent) -> RoutingDecision {
        let mut context: Vec<&str> = vec![content.metadata.content_type.as_str()];
        context.extend(content.metadata.tags.iter().map(String::as_str));
        let payload = RoutingPayload {
            operation: OperationKind::Write,
            kind: Some(content.kind),
            size_bytes: content.size_bytes(),
            context: context.join(" "),
            text: Some(content.body.as_str()),
        };
        self.decide(payload, BackendKind::Unified, false)
    }

    pub fn route_list(&self, filters: &MemoryFilters) -> RoutingDecision {
        let payload = RoutingPayload {
            operation: OperationKind::List,
            kind: filters.kind,
            size_bytes: 0,
            context: filters.content_type.clone().unwrap_or_default(),
            text: None,
        };
        self.decide(payload, BackendKind::Unified, false)
    }

    pub fn route_search(&self, query: &MemoryQuery) -> RoutingDecision {
        let payload = query_payload(OperationKind::Search, query);
        self.decide(payload, query.backend_hint(), true)
    }

    /// Concrete backends known to hold an identifier.
    ///
    /// Unknown identifiers report both concrete backends.
    pub fn find_locations(&self, identifier: &str) -> Vec<BackendKind> {
        match self.locations.get(identifier) {
            Some(set) if !set.is_empty() => set.iter().copied().collect(),
            _ => BackendKind::CONCRETE.to_vec(),
        }
    }

    pub fn record_location(&self, identifier: &str, backend: BackendKind) {
        let targets: Vec<BackendKind> = match backend {
            BackendKind::Hybrid => BackendKind::CONCRETE.to_vec(),
            b if b.is_concrete() => vec![b],
            _ => return,
        };
        self.locations
            .entry(identifier.to_string())
            .or_default()
            .extend(targets);
    }

    pub fn forget_location(&self, identifier: &str, backend: BackendKind) {
        let now_empty = match self.locations.get_mut(identifier) {
            Some(mut set) => {
                set.remove(&backend);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.locations.remove(identifier);
        }
    }

    /// Record an observed backend response time
    pub fn record_latency(&self, backend: BackendKind, elapsed: Duration) {
        if !backend.is_concrete() {
            return;
        }
        let window = self.config.latency_window;
        self.latencies
            .entry(backend)
            .or_insert_with(|| LatencyWindow::new(window))
            .push(elapsed.as_secs_f64() * 1000.0);
    }

    /// Average response time in milliseconds, if measured
    pub fn average_latency_ms(&self, backend: BackendKind) -> Option<f64> {
        self.latencies.get(&backend).and_then(|w| w.average())
    }

    pub fn access_pattern(&self, operation: OperationKind, kind: Option<ContentKind>) -> Option<AccessPattern> {
        self.patterns.get(&(operation, kind)).map(|p| p.clone())
    }

    pub fn access_pattern_count(&self) -> usize {
        self.patterns.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Decision procedure
    // ─────────────────────────────────────────────────────────────────────────

    fn decide(&self, payload: RoutingPayload<'_>, hint: BackendKind, search: bool) -> RoutingDecision {
        let rule = self.rules.read().select(&payload).clone();
        let key = (payload.operation, payload.kind);

        let (backend, branch, reason) = self.choose(&payload, hint, search, &rule, &key);
        let confidence = match branch {
            RoutingBranch::ExplicitHint => CONFIDENCE_EXPLICIT,
            RoutingBranch::SemanticOverride => CONFIDENCE_SEMANTIC,
            RoutingBranch::AccessPattern => CONFIDENCE_PATTERN,
            RoutingBranch::RuleMatch => CONFIDENCE_RULE,
            RoutingBranch::FallbackPreferred => CONFIDENCE_FALLBACK,
            RoutingBranch::ComplexQuery | RoutingBranch::Default => CONFIDENCE_DEFAULT,
        };

        self.update_pattern(key, backend);

        let decision = RoutingDecision {
            backend,
            reason,
            confidence,
            alternatives: alternatives(backend, rule.fallback),
            branch,
        };
        debug!(
            operation = %payload.operation,
            kind = ?payload.kind,
            backend = %decision.backend,
            branch = ?decision.branch,
            confidence = decision.confidence,
            "Routing decision"
        );
        decision
    }

    fn choose(
        &self,
        payload: &RoutingPayload<'_>,
        hint: BackendKind,
        search: bool,
        rule: &RoutingRule,
        key: &PatternKey,
    ) -> (BackendKind, RoutingBranch, String) {
        if hint != BackendKind::Unified {
            return (hint, RoutingBranch::ExplicitHint, format!("explicit {} hint", hint));
        }

        if let Some(text) = payload.text {
            if self.classifier.is_semantic(text) {
                return (
                    BackendKind::Semantic,
                    RoutingBranch::SemanticOverride,
                    "meaning-based query text".into(),
                );
            }
            if search && self.classifier.is_complex(text) {
                return (
                    BackendKind::Hybrid,
                    RoutingBranch::ComplexQuery,
                    "complex query searches both backends".into(),
                );
            }
        }

        if let Some(pattern) = self.patterns.get(key) {
            if pattern.frequency > self.config.pattern_override_threshold {
                return (
                    pattern.preferred,
                    RoutingBranch::AccessPattern,
                    format!("access pattern prefers {} ({:.2})", pattern.preferred, pattern.frequency),
                );
            }
        }

        if rule.is_catch_all() {
            return (rule.primary, RoutingBranch::Default, format!("no rule matched, using {}", rule.name));
        }

        let threshold = self.config.latency_threshold_ms as f64;
        let primary_ms = self.average_latency_ms(rule.primary);
        match (primary_ms, rule.fallback) {
            (Some(primary_ms), Some(fallback)) if primary_ms >= threshold => {
                // Unmeasured fallback counts as fast
                let fallback_ms = self.average_latency_ms(fallback).unwrap_or(0.0);
                if fallback_ms < primary_ms {
                    return (
                        fallback,
                        RoutingBranch::FallbackPreferred,
                        format!(
                            "rule {}: {} slow ({:.1}ms), fallback {} faster",
                            rule.name, rule.primary, primary_ms, fallback
                        ),
                    );
                }
                (rule.primary, RoutingBranch::RuleMatch, format!("rule {}", rule.name))
            }
            _ => (rule.primary, RoutingBranch::RuleMatch, format!("rule {}", rule.name)),
        }
    }

    fn update_pattern(&self, key: PatternKey, backend: BackendKind) {
        let now = self.clock.now();
        let increment = self.config.pattern_increment;
        let reset = self.config.pattern_reset;

        self.patterns
            .entry(key)
            .and_modify(|p| {
                if p.preferred == backend {
                    p.frequency = round2((p.frequency + increment).min(1.0));
                } else {
                    p.preferred = backend;
                    p.frequency = reset;
                }
                p.last_access = now;
                p.observations += 1;
            })
            .or_insert_with(|| AccessPattern {
                operation: key.0,
                kind: key.1,
                preferred: backend,
                frequency: reset,
                last_access: now,
                observations: 1,
            });
    }
}

fn query_payload(operation: OperationKind, query: &MemoryQuery) -> RoutingPayload<'_> {
    RoutingPayload {
        operation,
        kind: query.content_kind(),
        size_bytes: query.content.as_ref().map(String::len).unwrap_or(0),
        context: query.context.as_ref().map(|c| c.text()).unwrap_or_default(),
        text: query.content.as_deref(),
    }
}

fn alternatives(selected: BackendKind, fallback: Option<BackendKind>) -> Vec<BackendKind> {
    let mut out = Vec::with_capacity(2);
    let candidates = fallback
        .into_iter()
        .chain([BackendKind::Structured, BackendKind::Semantic, BackendKind::Hybrid]);
    for candidate in candidates {
        if candidate != selected && !out.contains(&candidate) {
            out.push(candidate);
        }
        if out.len() == 2 {
            break;
        }
    }
    out
}
