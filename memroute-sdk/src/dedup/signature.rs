//! Content signatures.
//!
//! A signature is a pure function of a body: exact hash, key phrases,
//! markdown structure counts and a top-N term fingerprint.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{SDKError, SDKResult};
use crate::utils::content_hash;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "his",
    "was", "one", "our", "out", "has", "have", "with", "this", "that", "from", "they", "will",
    "would", "there", "their", "what", "which", "when", "where", "been", "were", "into", "than",
    "then", "them", "these", "those", "some", "such", "only", "also", "just", "more", "most",
    "other", "over", "very", "your", "about", "after", "before", "each", "should", "could",
    "does", "did", "its", "how", "why", "who", "may", "being", "because", "while", "here",
    "both", "same", "own", "off", "too", "under", "again", "further", "once", "between",
    "through", "during", "above", "below", "upon", "via", "per",
];

/// Markdown structure counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuralProfile {
    pub headings: usize,
    pub code_blocks: usize,
    pub list_items: usize,
    pub tables: usize,
    pub links: usize,
    pub complexity: f64,
}

impl StructuralProfile {
    /// Field values in a fixed order, complexity last
    pub fn fields(&self) -> [f64; 6] {
        [
            self.headings as f64,
            self.code_blocks as f64,
            self.list_items as f64,
            self.tables as f64,
            self.links as f64,
            self.complexity,
        ]
    }
}

/// Derived, immutable description of a content body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSignature {
    pub content_hash: String,
    pub key_phrases: BTreeSet<String>,
    pub structure: StructuralProfile,
    /// Most frequent significant terms
    pub fingerprint: BTreeSet<String>,
    /// Every lowercase word, for lexical overlap
    pub words: BTreeSet<String>,
}

impl ContentSignature {
    /// Compute the signature of a body.
    ///
    /// Bodies larger than `max_bytes` are rejected.
    pub fn compute(body: &str, fingerprint_terms: usize, max_bytes: usize) -> SDKResult<Self> {
        if body.len() > max_bytes {
            return Err(SDKError::signature(format!(
                "body of {} bytes exceeds the {} byte signature limit",
                body.len(),
                max_bytes
            )));
        }

        let (structure, key_phrases) = scan_lines(body);
        let words: BTreeSet<String> = tokenize(body).collect();

        Ok(Self {
            content_hash: content_hash(body),
            key_phrases,
            structure,
            fingerprint: fingerprint(body, fingerprint_terms),
            words,
        })
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn is_significant(word: &str) -> bool {
    word.len() >= 3 && !STOPWORDS.contains(&word)
}

fn significant_terms(text: &str) -> Vec<String> {
    tokenize(text).filter(|w| is_significant(w)).collect()
}

/// Top `n` significant terms by frequency, ties broken alphabetically
fn fingerprint(body: &str, n: usize) -> BTreeSet<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for term in significant_terms(body) {
        *counts.entry(term).or_insert(0) += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(term, _)| term).collect()
}

fn is_list_item(line: &str) -> bool {
    if line.starts_with("- ") || line.starts_with("* ") || line.starts_with("+ ") {
        return true;
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && line[digits..].starts_with(". ")
}

fn count_links(line: &str) -> usize {
    let mut count = line.matches("](").count();
    for scheme in ["http://", "https://"] {
        for (i, _) in line.match_indices(scheme) {
            // Targets of markdown links were counted above
            if i == 0 || !line[..i].ends_with('(') {
                count += 1;
            }
        }
    }
    count
}

/// Odd segments of `line` split on `delim`, i.e. the text between pairs
fn delimited_spans<'a>(line: &'a str, delim: &str) -> Vec<&'a str> {
    let parts: Vec<&str> = line.split(delim).collect();
    if parts.len() < 3 {
        return Vec::new();
    }
    parts[..parts.len() - 1]
        .iter()
        .skip(1)
        .step_by(2)
        .copied()
        .collect()
}

fn add_phrase(phrases: &mut BTreeSet<String>, text: &str) {
    let text = text.trim().to_lowercase();
    if !text.is_empty() {
        phrases.insert(text);
    }
}

fn scan_lines(body: &str) -> (StructuralProfile, BTreeSet<String>) {
    let mut profile = StructuralProfile::default();
    let mut phrases = BTreeSet::new();
    let mut in_fence = false;
    let mut in_table = false;

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            if !in_fence {
                profile.code_blocks += 1;
            }
            in_fence = !in_fence;
            in_table = false;
            continue;
        }

        if !in_fence {
            if trimmed.starts_with('#') {
                profile.headings += 1;
                add_phrase(&mut phrases, trimmed.trim_start_matches('#'));
            }
            if is_list_item(trimmed) {
                profile.list_items += 1;
            }
            if trimmed.starts_with('|') {
                if !in_table {
                    profile.tables += 1;
                    in_table = true;
                }
            } else {
                in_table = false;
            }
            profile.links += count_links(trimmed);

            for span in delimited_spans(trimmed, "**") {
                add_phrase(&mut phrases, span);
            }
            for span in delimited_spans(trimmed, "`") {
                add_phrase(&mut phrases, span);
            }
        }

        let terms = significant_terms(line);
        for pair in terms.windows(2) {
            phrases.insert(format!("{} {}", pair[0], pair[1]));
        }
    }

    profile.complexity = profile.headings as f64
        + 2.0 * profile.code_blocks as f64
        + 0.5 * profile.list_items as f64
        + 2.0 * profile.tables as f64
        + 0.5 * profile.links as f64;
    (profile, phrases)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(body: &str) -> ContentSignature {
        ContentSignature::compute(body, 20, 1 << 20).unwrap()
    }

    #[test]
    fn test_structure_counts() {
        let body = "# Title\n\
                    Intro with a [link](https://example.com) and https://bare.example.\n\
                    ## Steps\n\
                    - first\n\
                    - second\n\
                    1. numbered\n\
                    ```rust\n\
                    # not a heading\n\
                    ```\n\
                    | a | b |\n\
                    | - | - |\n\
                    text\n\
                    | c |\n";
        let s = sig(body);
        assert_eq!(s.structure.headings, 2);
        assert_eq!(s.structure.code_blocks, 1);
        assert_eq!(s.structure.list_items, 3);
        assert_eq!(s.structure.tables, 2);
        assert_eq!(s.structure.links, 2);
        // 2 + 2 + 1.5 + 4 + 1
        assert_eq!(s.structure.complexity, 10.5);
    }

    #[test]
    fn test_key_phrases() {
        let s = sig("## Cache Eviction\nUse **least recently used** order via `evict_lru` calls.");
        assert!(s.key_phrases.contains("cache eviction"));
        assert!(s.key_phrases.contains("least recently used"));
        assert!(s.key_phrases.contains("evict_lru"));
        // Significant-term bigram within a line
        assert!(s.key_phrases.contains("recently used"));
        assert!(!s.key_phrases.iter().any(|p| p.contains("via")));
    }

    #[test]
    fn test_fingerprint_ranking() {
        let body = "delta delta delta alpha alpha charlie bravo the the the the";
        let s = ContentSignature::compute(body, 3, 1024).unwrap();
        let expected: BTreeSet<String> = ["delta", "alpha", "bravo"].iter().map(|s| s.to_string()).collect();
        assert_eq!(s.fingerprint, expected);
        assert!(s.words.contains("the"));
    }

    #[test]
    fn test_signature_is_pure() {
        let body = "Retry transient failures with backoff.";
        assert_eq!(sig(body), sig(body));
        assert_eq!(sig(body).content_hash, content_hash(body));
    }

    #[test]
    fn test_oversized_body_rejected() {
        let err = ContentSignature::compute(&"x".repeat(100), 20, 50).unwrap_err();
        assert!(err.to_string().contains("signature"));
    }
}
