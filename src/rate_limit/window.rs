//! Sliding window over recent acquisitions for a single [`RateLimit`].
//!
//! # Example
//!
//! ```rust
//! use kite_api_client::rate_limit::{RateLimit, RateWindow};
//! use tokio::time::Instant;
//!
//! let mut window = RateWindow::new(RateLimit::per_second(2));
//! let now = Instant::now();
//!
//! assert!(window.try_acquire(now).allowed);
//! assert!(window.try_acquire(now).allowed);
//! assert!(!window.try_acquire(now).allowed);
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::rate_limit::RateLimit;

/// Result of a single [`RateWindow::try_acquire`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Whether the acquisition was committed.
    pub allowed: bool,
    /// How long to wait before the window frees a slot. Zero when allowed.
    pub wait: Duration,
}

impl Outcome {
    fn allowed() -> Self {
        Self {
            allowed: true,
            wait: Duration::ZERO,
        }
    }

    fn denied(wait: Duration) -> Self {
        Self {
            allowed: false,
            wait,
        }
    }
}

/// A sliding window rate limiter.
///
/// Keeps the timestamps of recent acquisitions, oldest first. The log never
/// holds more than `limit.count` entries and entries older than the window
/// are dropped on every acquisition attempt.
#[derive(Debug, Clone)]
pub struct RateWindow {
    limit: RateLimit,
    log: VecDeque<Instant>,
}

impl RateWindow {
    /// Create an empty window for the given limit.
    pub fn new(limit: RateLimit) -> Self {
        Self {
            log: VecDeque::with_capacity(limit.count as usize),
            limit,
        }
    }

    /// The limit this window enforces.
    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Try to record an acquisition at `now`.
    ///
    /// A denied attempt leaves the log untouched.
    pub fn try_acquire(&mut self, now: Instant) -> Outcome {
        self.prune(now);

        if self.log.len() < self.limit.count as usize {
            self.log.push_back(now);
            return Outcome::allowed();
        }

        let wait = self
            .log
            .front()
            .map(|oldest| {
                self.limit
                    .window
                    .saturating_sub(now.saturating_duration_since(*oldest))
            })
            .unwrap_or_default();
        Outcome::denied(wait)
    }

    /// Undo the acquisition committed at `now` by the preceding `try_acquire`.
    ///
    /// Returns `false` if the newest entry is not `now`.
    pub fn rollback(&mut self, now: Instant) -> bool {
        if self.log.back() == Some(&now) {
            self.log.pop_back();
            true
        } else {
            false
        }
    }

    /// Number of acquisitions currently retained.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Check if the window has no retained acquisitions.
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Slots still available at `now`, without pruning.
    pub fn remaining(&self, now: Instant) -> u32 {
        let live = self
            .log
            .iter()
            .filter(|ts| now.saturating_duration_since(**ts) < self.limit.window)
            .count() as u32;
        self.limit.count.saturating_sub(live)
    }

    /// Drop entries that have aged out of the window.
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.log.front() {
            if now.saturating_duration_since(*oldest) >= self.limit.window {
                self.log.pop_front();
            } else {
                break;
            }
        }
    }
}
