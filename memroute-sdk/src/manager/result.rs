//! Operation result envelope.

use serde::{Deserialize, Serialize};

use super::metrics::PerformanceMetrics;
use crate::dedup::DedupOutcome;
use crate::routing::RoutingDecision;

/// Result of every manager operation.
///
/// Backend failures are reported here instead of as `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub metrics: PerformanceMetrics,
    pub routing: Option<RoutingDecision>,
    pub dedup: Option<DedupOutcome>,
}

impl<T> MemoryResult<T> {
    pub fn ok(data: Option<T>, metrics: PerformanceMetrics) -> Self {
        Self {
            success: true,
            data,
            error: None,
            metrics,
            routing: None,
            dedup: None,
        }
    }

    pub fn failure(error: impl Into<String>, metrics: PerformanceMetrics) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metrics,
            routing: None,
            dedup: None,
        }
    }

    pub fn with_routing(mut self, routing: Option<RoutingDecision>) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_dedup(mut self, dedup: Option<DedupOutcome>) -> Self {
        self.dedup = dedup;
        self
    }
}
