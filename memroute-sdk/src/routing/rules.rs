//! Routing rule table.

use memroute_core::{BackendKind, ContentKind, OperationKind};
use serde::{Deserialize, Serialize};

/// Condition a rule needs to hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    /// Payload text is at least this many bytes
    MinContentBytes(usize),
    /// Context text contains this substring (case-insensitive)
    ContextContains(String),
}

impl RuleCondition {
    fn holds(&self, payload: &RoutingPayload<'_>) -> bool {
        match self {
            Self::MinContentBytes(min) => payload.size_bytes >= *min,
            Self::ContextContains(needle) => payload
                .context
                .to_lowercase()
                .contains(&needle.to_lowercase()),
        }
    }
}

/// One routing rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub name: String,
    /// Kind the rule applies to; `None` applies to everything
    pub kind: Option<ContentKind>,
    pub primary: BackendKind,
    pub fallback: Option<BackendKind>,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    /// Lower rank wins
    pub rank: u32,
}

impl RoutingRule {
    pub fn new(name: impl Into<String>, kind: Option<ContentKind>, primary: BackendKind, rank: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            primary,
            fallback: None,
            conditions: Vec::new(),
            rank,
        }
    }

    pub fn with_fallback(mut self, fallback: BackendKind) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_condition(mut self, condition: RuleCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Whether this is a catch-all rule
    pub fn is_catch_all(&self) -> bool {
        self.kind.is_none()
    }

    fn matches(&self, payload: &RoutingPayload<'_>) -> bool {
        let kind_ok = match self.kind {
            None => true,
            Some(kind) => payload.kind == Some(kind),
        };
        kind_ok && self.conditions.iter().all(|c| c.holds(payload))
    }
}

/// What the rule table sees of an operation
#[derive(Debug, Clone)]
pub struct RoutingPayload<'a> {
    pub operation: OperationKind,
    pub kind: Option<ContentKind>,
    pub size_bytes: usize,
    pub context: String,
    /// Text the semantic classifier looks at
    pub text: Option<&'a str>,
}

/// Priority-ordered rule table with a guaranteed catch-all
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<RoutingRule>,
}

impl RuleTable {
    /// Build a table; a hybrid catch-all is appended when none is present
    pub fn new(mut rules: Vec<RoutingRule>) -> Self {
        if !rules.iter().any(RoutingRule::is_catch_all) {
            rules.push(Self::catch_all());
        }
        // Stable: equal ranks keep insertion order
        rules.sort_by_key(|r| r.rank);
        Self { rules }
    }

    fn catch_all() -> RoutingRule {
        RoutingRule::new("default-hybrid", None, BackendKind::Hybrid, 99)
    }

    /// The default rule table
    pub fn default_rules() -> Vec<RoutingRule> {
        vec![
            RoutingRule::new(
                "large-architectural",
                Some(ContentKind::Architectural),
                BackendKind::Semantic,
                1,
            )
            .with_fallback(BackendKind::Structured)
            .with_condition(RuleCondition::MinContentBytes(50_000)),
            RoutingRule::new("session", Some(ContentKind::Session), BackendKind::Structured, 1),
            RoutingRule::new("pattern", Some(ContentKind::Pattern), BackendKind::Semantic, 1)
                .with_fallback(BackendKind::Structured),
            RoutingRule::new("semantic", Some(ContentKind::Semantic), BackendKind::Semantic, 1)
                .with_fallback(BackendKind::Structured),
            RoutingRule::new("project", Some(ContentKind::Project), BackendKind::Structured, 2)
                .with_fallback(BackendKind::Semantic),
            RoutingRule::new(
                "architectural",
                Some(ContentKind::Architectural),
                BackendKind::Structured,
                2,
            )
            .with_fallback(BackendKind::Semantic),
            Self::catch_all(),
        ]
    }

    /// Lowest-rank rule matching the payload
    pub fn select(&self, payload: &RoutingPayload<'_>) -> &RoutingRule {
        self.rules
            .iter()
            .find(|r| r.matches(payload))
            .or_else(|| self.rules.iter().find(|r| r.is_catch_all()))
            .unwrap_or(&self.rules[self.rules.len() - 1])
    }

    /// Add a rule and keep the table ordered
    pub fn add(&mut self, rule: RoutingRule) {
        self.rules.push(rule);
        self.rules.sort_by_key(|r| r.rank);
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::new(Self::default_rules())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(kind: Option<ContentKind>, size_bytes: usize) -> RoutingPayload<'static> {
        RoutingPayload {
            operation: OperationKind::Write,
            kind,
            size_bytes,
            context: String::new(),
            text: None,
        }
    }

    #[test]
    fn test_default_table_selects_by_kind() {
        let table = RuleTable::default();
        assert_eq!(table.select(&payload(Some(ContentKind::Session), 10)).primary, BackendKind::Structured);
        assert_eq!(table.select(&payload(Some(ContentKind::Pattern), 10)).primary, BackendKind::Semantic);
        assert_eq!(table.select(&payload(Some(ContentKind::Project), 10)).name, "project");
        assert!(table.select(&payload(None, 10)).is_catch_all());
    }

    #[test]
    fn test_size_condition() {
        let table = RuleTable::default();
        let small = table.select(&payload(Some(ContentKind::Architectural), 1_000));
        assert_eq!(small.name, "architectural");
        let large = table.select(&payload(Some(ContentKind::Architectural), 60_000));
        assert_eq!(large.name, "large-architectural");
        assert_eq!(large.primary, BackendKind::Semantic);
    }

    #[test]
    fn test_context_condition_and_catch_all_is_added() {
        let table = RuleTable::new(vec![
            RoutingRule::new("ci", Some(ContentKind::Project), BackendKind::Semantic, 1)
                .with_condition(RuleCondition::ContextContains("CI".into())),
        ]);
        assert_eq!(table.rules().len(), 2);

        let mut p = payload(Some(ContentKind::Project), 10);
        assert!(table.select(&p).is_catch_all());

        p.context = "fix the ci pipeline".into();
        assert_eq!(table.select(&p).name, "ci");
    }
}
