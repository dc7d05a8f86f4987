//! Similarity measures over content signatures.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::signature::{ContentSignature, StructuralProfile};

/// Jaccard overlap. Two empty sets score 0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Mean proportional similarity over the six profile fields
pub fn structural_similarity(a: &StructuralProfile, b: &StructuralProfile) -> f64 {
    let fa = a.fields();
    let fb = b.fields();
    let total: f64 = fa
        .iter()
        .zip(fb.iter())
        .map(|(x, y)| {
            let max = x.max(*y);
            if max == 0.0 { 1.0 } else { x.min(*y) / max }
        })
        .sum();
    total / fa.len() as f64
}

/// Coarse score used to pick candidates
pub fn signature_similarity(a: &ContentSignature, b: &ContentSignature) -> f64 {
    0.4 * jaccard(&a.key_phrases, &b.key_phrases)
        + 0.4 * jaccard(&a.fingerprint, &b.fingerprint)
        + 0.2 * structural_similarity(&a.structure, &b.structure)
}

/// Component scores of the finer comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    pub lexical: f64,
    pub structural: f64,
    pub semantic: f64,
    /// Weighted total
    pub score: f64,
    pub confidence: f64,
}

/// Finer score used to choose a merge strategy
pub fn content_similarity(a: &ContentSignature, b: &ContentSignature) -> SimilarityScore {
    let lexical = jaccard(&a.words, &b.words);
    let structural = structural_similarity(&a.structure, &b.structure);
    let semantic = jaccard(&a.fingerprint, &b.fingerprint);
    SimilarityScore {
        lexical,
        structural,
        semantic,
        score: 0.4 * lexical + 0.3 * structural + 0.3 * semantic,
        confidence: agreement_confidence(&[lexical, structural, semantic]),
    }
}

/// Mean of the components discounted by their (population) variance
pub fn agreement_confidence(components: &[f64]) -> f64 {
    if components.is_empty() {
        return 0.0;
    }
    let n = components.len() as f64;
    let mean = components.iter().sum::<f64>() / n;
    let variance = components.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    (mean * (1.0 - variance)).clamp(0.0, 1.0)
}
