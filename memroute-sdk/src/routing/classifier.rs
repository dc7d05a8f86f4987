//! Query classification heuristics.
//!
//! The defaults are keyword and punctuation checks with no precision target.
//! Callers needing better detection plug in their own `QueryClassifier`.

use std::collections::HashSet;

/// Detects meaning-based and complex queries
pub trait QueryClassifier: Send + Sync {
    /// The text asks for meaning rather than an exact lookup
    fn is_semantic(&self, text: &str) -> bool;

    /// The text combines several criteria and should search both backends
    fn is_complex(&self, text: &str) -> bool;
}

const SEMANTIC_TERMS: &[&str] = &[
    "how", "why", "what", "explain", "describe", "similar", "related", "meaning", "concept",
    "understand", "like",
];

const BOOLEAN_OPERATORS: &[&str] = &["and", "or", "not"];

/// Word count above which a query is complex
const COMPLEX_WORD_COUNT: usize = 12;

/// Default keyword classifier
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl QueryClassifier for KeywordClassifier {
    fn is_semantic(&self, text: &str) -> bool {
        if text.trim_end().ends_with('?') {
            return true;
        }
        let words: HashSet<String> = words(text).into_iter().collect();
        SEMANTIC_TERMS.iter().any(|t| words.contains(*t))
    }

    fn is_complex(&self, text: &str) -> bool {
        let words = words(text);
        if words.len() > COMPLEX_WORD_COUNT {
            return true;
        }
        if text.matches('"').count() >= 2 {
            return true;
        }
        words.iter().any(|w| BOOLEAN_OPERATORS.contains(&w.as_str()))
    }
}
