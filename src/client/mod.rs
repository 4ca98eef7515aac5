//! Resilient upstream client
//!
//! This module provides:
//! - Token bucket rate limiting of outbound calls
//! - Bounded retry with exponential backoff and jitter
//! - An HTTP client that classifies every response and combines both

pub mod http_client;
pub mod ratelimit;
pub mod retry;

use serde::{Deserialize, Serialize};

pub use http_client::{HttpResponse, RequestOptions, ResilientClient};
pub use ratelimit::{Clock, ManualClock, RateLimiter, RateLimiterState, SystemClock};
pub use retry::{RetryManager, RetryPolicy};

/// Per-attempt timeout class of a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutClass {
    /// Cheap lookups
    Short,
    /// Regular entity fetches
    #[default]
    Default,
    /// Large bootstrap payloads
    Long,
}
