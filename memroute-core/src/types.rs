//! Core types for memroute.
//!
//! These types cross every boundary in the system: callers build queries and
//! content payloads, the SDK routes and caches them, and backend executors
//! persist them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Backend store selector.
///
/// `Structured` and `Semantic` are the two concrete stores. `Unified` lets the
/// router decide, `Hybrid` addresses both stores at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Structured,
    Semantic,
    Unified,
    Hybrid,
}

impl BackendKind {
    /// The two concrete backend stores, in canonical order.
    pub const CONCRETE: [BackendKind; 2] = [BackendKind::Structured, BackendKind::Semantic];

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Semantic => "semantic",
            Self::Unified => "unified",
            Self::Hybrid => "hybrid",
        }
    }

    /// Whether this names a single real store.
    pub fn is_concrete(&self) -> bool {
        matches!(self, Self::Structured | Self::Semantic)
    }

    /// The opposite concrete store, if this is a concrete store.
    pub fn counterpart(&self) -> Option<Self> {
        match self {
            Self::Structured => Some(Self::Semantic),
            Self::Semantic => Some(Self::Structured),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structured" => Ok(Self::Structured),
            "semantic" => Ok(Self::Semantic),
            "unified" => Ok(Self::Unified),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(format!("Invalid backend: {}", s)),
        }
    }
}

/// Content kind tag carried by every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Session,
    Project,
    Architectural,
    Pattern,
    Semantic,
}

impl ContentKind {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Project => "project",
            Self::Architectural => "architectural",
            Self::Pattern => "pattern",
            Self::Semantic => "semantic",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "project" => Ok(Self::Project),
            "architectural" => Ok(Self::Architectural),
            "pattern" => Ok(Self::Pattern),
            "semantic" => Ok(Self::Semantic),
            _ => Err(format!("Invalid content kind: {}", s)),
        }
    }
}

/// Content priority. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Operation kind, used as a routing and metrics key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Write,
    List,
    Search,
    Delete,
    /// A whole benchmark run. Never routed.
    Benchmark,
}

impl OperationKind {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::List => "list",
            Self::Search => "search",
            Self::Delete => "delete",
            Self::Benchmark => "benchmark",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

/// Caller context attached to a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    /// Free text describing the task the caller is working on
    pub current_task: Option<String>,
    /// Free text of recent operations, most recent last
    #[serde(default)]
    pub recent_operations: Vec<String>,
    pub session_id: Option<String>,
}

impl QueryContext {
    /// Create a context for a task description
    pub fn for_task(task: impl Into<String>) -> Self {
        Self {
            current_task: Some(task.into()),
            ..Default::default()
        }
    }

    /// Add a recent operation
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.recent_operations.push(operation.into());
        self
    }

    /// All context text joined by newlines (task first)
    pub fn text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(task) = &self.current_task {
            parts.push(task);
        }
        parts.extend(self.recent_operations.iter().map(String::as_str));
        parts.join("\n")
    }
}

/// Inclusive creation-time window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Check if a timestamp falls inside the window
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        if let Some(from) = &self.from {
            if ts < from {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if ts > to {
                return false;
            }
        }
        true
    }
}

/// Filter set used by list and search operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFilters {
    pub kind: Option<ContentKind>,
    pub content_type: Option<String>,
    /// All tags must be present on a matching item
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub priority: Option<Priority>,
    pub origin: Option<BackendKind>,
    pub date_range: Option<DateRange>,
    /// Case-insensitive substring of the body
    pub text: Option<String>,
    /// Adapter-specific filters, forwarded untouched
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
    /// Maximum number of results (not a filter key)
    pub limit: Option<usize>,
}

impl MemoryFilters {
    /// Filters selecting a single content kind
    pub fn for_kind(kind: ContentKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// Number of filter keys that are set.
    ///
    /// A non-empty tag set counts once, every custom entry counts once and
    /// `limit` never counts.
    pub fn key_count(&self) -> usize {
        let mut count = 0;
        if self.kind.is_some() {
            count += 1;
        }
        if self.content_type.is_some() {
            count += 1;
        }
        if !self.tags.is_empty() {
            count += 1;
        }
        if self.priority.is_some() {
            count += 1;
        }
        if self.origin.is_some() {
            count += 1;
        }
        if self.date_range.is_some() {
            count += 1;
        }
        if self.text.is_some() {
            count += 1;
        }
        count + self.custom.len()
    }

    /// Whether no filter key is set
    pub fn is_empty(&self) -> bool {
        self.key_count() == 0
    }

    /// Evaluate every set predicate against a content item.
    ///
    /// Custom filters are adapter-specific and ignored here.
    pub fn matches(&self, content: &MemoryContent) -> bool {
        if let Some(kind) = self.kind {
            if content.kind != kind {
                return false;
            }
        }
        if let Some(content_type) = &self.content_type {
            if &content.metadata.content_type != content_type {
                return false;
            }
        }
        if !self.tags.iter().all(|t| content.metadata.tags.contains(t)) {
            return false;
        }
        if let Some(priority) = self.priority {
            if content.metadata.priority != priority {
                return false;
            }
        }
        if let Some(origin) = self.origin {
            if content.metadata.origin != origin {
                return false;
            }
        }
        if let Some(range) = &self.date_range {
            if !range.contains(&content.created_at) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            if !content.body.to_lowercase().contains(&text.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// A read or search request. Immutable once issued.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// Backend hint
    pub backend: Option<BackendKind>,
    pub identifier: Option<String>,
    /// Free-text content to match
    pub content: Option<String>,
    pub filters: Option<MemoryFilters>,
    pub context: Option<QueryContext>,
}

impl MemoryQuery {
    /// Query addressing one identifier
    pub fn for_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            ..Default::default()
        }
    }

    /// Query carrying only a filter set
    pub fn for_filters(filters: MemoryFilters) -> Self {
        Self {
            filters: Some(filters),
            ..Default::default()
        }
    }

    /// Free-text search query
    pub fn search(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    /// Set the backend hint
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the filters
    pub fn with_filters(mut self, filters: MemoryFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Set the caller context
    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Content kind the query targets, taken from its filters
    pub fn content_kind(&self) -> Option<ContentKind> {
        self.filters.as_ref().and_then(|f| f.kind)
    }

    /// Backend hint, treating a missing hint as `Unified`
    pub fn backend_hint(&self) -> BackendKind {
        self.backend.unwrap_or(BackendKind::Unified)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Content
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata record attached to a content payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    /// Backend the content originated from
    pub origin: BackendKind,
    pub content_type: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Identifiers of content this item depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Default for ContentMetadata {
    fn default() -> Self {
        Self {
            origin: BackendKind::Unified,
            content_type: String::new(),
            tags: BTreeSet::new(),
            priority: Priority::Medium,
            dependencies: Vec::new(),
        }
    }
}

/// A write payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryContent {
    pub id: String,
    pub kind: ContentKind,
    pub body: String,
    pub metadata: ContentMetadata,
    pub created_at: DateTime<Utc>,
}

impl MemoryContent {
    /// Create content with a fresh identifier and the current time.
    ///
    /// The content type defaults to the kind name.
    pub fn new(kind: ContentKind, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            body: body.into(),
            metadata: ContentMetadata {
                content_type: kind.as_str().to_string(),
                ..Default::default()
            },
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_origin(mut self, origin: BackendKind) -> Self {
        self.metadata.origin = origin;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.metadata.content_type = content_type.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.metadata.priority = priority;
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.metadata.dependencies.push(id.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Body size in bytes
    pub fn size_bytes(&self) -> usize {
        self.body.len()
    }
}

/// Search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredContent {
    pub content: MemoryContent,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_kind_string_roundtrip() {
        for kind in [
            ContentKind::Session,
            ContentKind::Project,
            ContentKind::Architectural,
            ContentKind::Pattern,
            ContentKind::Semantic,
        ] {
            assert_eq!(kind.as_str().parse::<ContentKind>(), Ok(kind));
        }
        assert_eq!("hybrid".parse::<BackendKind>(), Ok(BackendKind::Hybrid));
        assert!("nope".parse::<BackendKind>().is_err());
        assert_eq!("high".parse::<Priority>(), Ok(Priority::High));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_counterpart() {
        assert_eq!(BackendKind::Structured.counterpart(), Some(BackendKind::Semantic));
        assert_eq!(BackendKind::Hybrid.counterpart(), None);
        assert!(!BackendKind::Unified.is_concrete());
    }

    #[test]
    fn test_filter_key_count() {
        let mut filters = MemoryFilters::for_kind(ContentKind::Pattern);
        filters.limit = Some(10);
        assert_eq!(filters.key_count(), 1);

        filters.tags.insert("rust".into());
        filters.tags.insert("async".into());
        filters.custom.insert("project".into(), "memroute".into());
        assert_eq!(filters.key_count(), 3);
        assert!(!filters.is_empty());
        assert!(MemoryFilters::default().is_empty());
    }

    #[test]
    fn test_filter_matches() {
        let content = MemoryContent::new(ContentKind::Pattern, "Use the Builder pattern")
            .with_tags(["rust", "design"])
            .with_origin(BackendKind::Semantic);

        let mut filters = MemoryFilters::for_kind(ContentKind::Pattern);
        filters.tags.insert("rust".into());
        filters.text = Some("builder".into());
        assert!(filters.matches(&content));

        filters.origin = Some(BackendKind::Structured);
        assert!(!filters.matches(&content));

        let range = DateRange {
            from: Some(content.created_at - Duration::minutes(1)),
            to: Some(content.created_at + Duration::minutes(1)),
        };
        let filters = MemoryFilters {
            date_range: Some(range),
            ..Default::default()
        };
        assert!(filters.matches(&content));
    }

    #[test]
    fn test_context_text() {
        let context = QueryContext::for_task("refactor session handling")
            .with_operation("read config");
        assert_eq!(context.text(), "refactor session handling\nread config");
    }

    #[test]
    fn test_content_defaults() {
        let content = MemoryContent::new(ContentKind::Session, "hello");
        assert_eq!(content.metadata.content_type, "session");
        assert_eq!(content.metadata.priority, Priority::Medium);
        assert_eq!(content.size_bytes(), 5);
        assert!(!content.id.is_empty());
    }
}
