//! SDK Utilities
//!
//! Common utilities for the SDK.

mod hashing;
mod time;

pub use hashing::{content_hash, query_fingerprint};
pub use time::{Clock, ManualClock, SharedClock, SystemClock, age_secs};
