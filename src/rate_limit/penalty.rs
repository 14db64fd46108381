//! Session-wide circuit breaker for rate limit rejections.
//!
//! Every HTTP 429 counts as one penalty. Once the count passes the
//! configured maximum the breaker stays tripped for the lifetime of the
//! tracker and no further requests are sent.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{error, warn};

use crate::error::ClientError;

/// Counts rate limit rejections observed by one client session.
#[derive(Debug)]
pub struct PenaltyTracker {
    count: AtomicU32,
    max_penalty_count: u32,
}

impl PenaltyTracker {
    /// Create a tracker that trips after more than `max_penalty_count` rejections.
    pub fn new(max_penalty_count: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            max_penalty_count,
        }
    }

    /// Record one rejection and return the new total.
    pub fn record_rejection(&self) -> u32 {
        let count = self.count.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        if count > self.max_penalty_count {
            error!(penalties = count, max = self.max_penalty_count, "Rate limit penalties exhausted");
        } else {
            warn!(penalties = count, max = self.max_penalty_count, "Too many requests to the API");
        }
        count
    }

    /// Fail with [`ClientError::ExhaustedRetries`] once the threshold is exceeded.
    pub fn check_threshold(&self) -> Result<(), ClientError> {
        let penalties = self.count();
        if penalties > self.max_penalty_count {
            Err(ClientError::ExhaustedRetries { penalties })
        } else {
            Ok(())
        }
    }

    /// Rejections recorded so far.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// The configured maximum.
    pub fn max_penalty_count(&self) -> u32 {
        self.max_penalty_count
    }

    /// Whether the breaker has tripped.
    pub fn is_tripped(&self) -> bool {
        self.count() > self.max_penalty_count
    }
}
