//! Content Deduplication
//!
//! Detects exact and near duplicates before content is persisted:
//!
//! 1. An exact content hash hit is a duplicate with similarity 1.0.
//! 2. Indexed signatures scoring above the candidate threshold are ranked.
//! 3. The best candidate gets a finer score that selects the strategy:
//!
//! ```text
//! score   > 0.9  replace (newer wins)
//! score   > 0.7  merge
//! score   > 0.5  append (related, not a duplicate)
//! otherwise      unique, indexed for future checks
//! ```

mod engine;
mod signature;
mod similarity;

pub use engine::{DedupEngine, DedupOutcome, MergeKind, MergeStep, MergeStrategy, merge_contents};
pub use signature::{ContentSignature, StructuralProfile};
pub use similarity::{
    SimilarityScore, agreement_confidence, content_similarity, jaccard, signature_similarity,
    structural_similarity,
};
