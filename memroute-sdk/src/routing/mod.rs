//! Routing Engine
//!
//! Decides which backend store serves an operation. Decisions combine:
//! - A priority-ordered rule table keyed by content kind
//! - Learned access-pattern frequencies per (operation, content kind)
//! - Recent per-backend latency
//! - A pluggable classifier that detects meaning-based and complex queries
//!
//! # Decision order
//!
//! ```text
//! explicit hint ─▶ semantic override ─▶ access pattern ─▶ rule table
//!     (1.0)            (0.85)              (0.8)        match 0.9 / fallback 0.7 / default 0.6
//! ```

mod classifier;
mod engine;
mod rules;

pub use classifier::{KeywordClassifier, QueryClassifier};
pub use engine::{
    AccessPattern, RoutingBranch, RoutingDecision, RoutingEngine, CONFIDENCE_DEFAULT,
    CONFIDENCE_EXPLICIT, CONFIDENCE_FALLBACK, CONFIDENCE_PATTERN, CONFIDENCE_RULE,
    CONFIDENCE_SEMANTIC,
};
pub use rules::{RoutingPayload, RoutingRule, RuleCondition, RuleTable};
