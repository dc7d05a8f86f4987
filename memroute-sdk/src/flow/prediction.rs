//! Predictive preload model.
//!
//! A small table of trigger keyword sets. When a caller's task or recent
//! operations mention a trigger, the pattern's identifier is a candidate for
//! loading into the cache ahead of the request.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use memroute_core::{BackendKind, MemoryQuery, QueryContext};

use crate::config::PredictionConfig;

/// One trigger pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionPattern {
    pub triggers: Vec<String>,
    pub backend: BackendKind,
    pub identifier: String,
    pub confidence: f64,
    /// Contexts this pattern matched
    pub matches: u64,
    /// Preloads of this pattern that were later hit
    pub useful: u64,
}

impl PredictionPattern {
    pub fn new<I, S>(triggers: I, backend: BackendKind, identifier: impl Into<String>, confidence: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            triggers: triggers.into_iter().map(|t| t.into().to_lowercase()).collect(),
            backend,
            identifier: identifier.into(),
            confidence,
            matches: 0,
            useful: 0,
        }
    }

    fn matches_text(&self, text: &str) -> bool {
        self.triggers.iter().any(|t| text.contains(t.as_str()))
    }
}

/// A candidate preload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub backend: BackendKind,
    pub identifier: String,
    pub confidence: f64,
}

impl Prediction {
    /// Query that loads the predicted item
    pub fn query(&self) -> MemoryQuery {
        MemoryQuery::for_identifier(&self.identifier).with_backend(self.backend)
    }
}

/// Default trigger table
pub fn default_patterns() -> Vec<PredictionPattern> {
    vec![
        PredictionPattern::new(
            ["session", "resume", "continue"],
            BackendKind::Structured,
            "session:current",
            0.8,
        ),
        PredictionPattern::new(
            ["architecture", "design", "system"],
            BackendKind::Structured,
            "architecture:overview",
            0.75,
        ),
        PredictionPattern::new(
            ["pattern", "refactor", "convention"],
            BackendKind::Semantic,
            "patterns:common",
            0.72,
        ),
        PredictionPattern::new(
            ["debug", "error", "fix"],
            BackendKind::Semantic,
            "troubleshooting:recent",
            0.65,
        ),
    ]
}

/// Keyword-triggered preload predictor
pub struct PredictiveLoader {
    config: PredictionConfig,
    patterns: RwLock<Vec<PredictionPattern>>,
}

impl PredictiveLoader {
    pub fn new(config: PredictionConfig) -> Self {
        Self::with_patterns(config, default_patterns())
    }

    pub fn with_patterns(config: PredictionConfig, patterns: Vec<PredictionPattern>) -> Self {
        Self {
            config,
            patterns: RwLock::new(patterns),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Match a context against the table.
    ///
    /// Every matching pattern counts the match. Only matches above the
    /// confidence threshold are returned.
    pub fn predict(&self, context: &QueryContext) -> Vec<Prediction> {
        let text = context.text().to_lowercase();
        if text.is_empty() {
            return Vec::new();
        }

        let mut patterns = self.patterns.write();
        let mut predictions = Vec::new();
        for pattern in patterns.iter_mut().filter(|p| p.matches_text(&text)) {
            pattern.matches += 1;
            if pattern.confidence > self.config.min_confidence {
                predictions.push(Prediction {
                    backend: pattern.backend,
                    identifier: pattern.identifier.clone(),
                    confidence: pattern.confidence,
                });
            }
        }
        predictions
    }

    /// Credit patterns whose preloaded identifier was hit
    pub fn record_useful(&self, identifier: &str) {
        let mut patterns = self.patterns.write();
        for pattern in patterns.iter_mut().filter(|p| p.identifier == identifier) {
            pattern.useful += 1;
        }
    }

    /// Re-estimate confidence of patterns with enough matches.
    ///
    /// Returns how many patterns were updated.
    pub fn refresh(&self) -> usize {
        let mut patterns = self.patterns.write();
        let mut updated = 0;
        for pattern in patterns
            .iter_mut()
            .filter(|p| p.matches >= self.config.refresh_min_matches)
        {
            let usefulness = pattern.useful as f64 / pattern.matches as f64;
            let confidence = (0.5 * pattern.confidence + 0.5 * usefulness).clamp(0.1, 0.95);
            debug!(
                identifier = %pattern.identifier,
                old = pattern.confidence,
                new = confidence,
                "Prediction confidence refreshed"
            );
            pattern.confidence = confidence;
            updated += 1;
        }
        updated
    }

    pub fn add_pattern(&self, pattern: PredictionPattern) {
        self.patterns.write().push(pattern);
    }

    pub fn patterns(&self) -> Vec<PredictionPattern> {
        self.patterns.read().clone()
    }
}
