//! Hashing Utilities

use memroute_core::{MemoryFilters, MemoryQuery};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of content and return as hex string
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Serialize)]
struct FingerprintKey<'a> {
    identifier: Option<&'a str>,
    content: Option<&'a str>,
    filters: Option<&'a MemoryFilters>,
}

/// Short deterministic cache key for a query.
///
/// Only the fields that select data take part, so the same lookup issued with a
/// different backend hint or caller context maps to the same key.
pub fn query_fingerprint(query: &MemoryQuery) -> String {
    let key = FingerprintKey {
        identifier: query.identifier.as_deref(),
        content: query.content.as_deref(),
        filters: query.filters.as_ref(),
    };
    let canonical = serde_json::to_string(&key).unwrap_or_else(|_| format!("{:?}", key));
    format!("{:x}", md5::compute(canonical.as_bytes()))
}
