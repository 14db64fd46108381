//! Rate limiting for the Kite API.
//!
//! Kite enforces separate request ceilings per endpoint family, and some
//! families carry both a per-second and a per-minute ceiling. Exceeding them
//! earns an HTTP 429, and repeated 429s can get an API key blocked.
//!
//! ## Components
//!
//! - [`RateWindow`]: sliding log of acquisitions for one limit
//! - [`EndpointThrottle`]: all-or-nothing acquisition across every limit of a category
//! - [`PenaltyTracker`]: circuit breaker counting 429 rejections for the session
//!
//! ## Default Limits
//!
//! | Category     | Limits              |
//! |--------------|---------------------|
//! | `quote`      | 1/s                 |
//! | `historical` | 3/s                 |
//! | `order`      | 8/s and 180/min     |
//! | `default`    | 8/s                 |
//!
//! ## Loading From JSON
//!
//! ```rust
//! use kite_api_client::rate_limit::ThrottleConfig;
//!
//! let config: ThrottleConfig = serde_json::from_str(r#"{
//!     "categories": {
//!         "default": [{ "count": 8, "window_ms": 1000 }],
//!         "order": [{ "count": 8, "window_ms": 1000 }, { "count": 180, "window_ms": 60000 }]
//!     },
//!     "max_penalty_count": 15
//! }"#).unwrap();
//!
//! assert!(config.validate().is_ok());
//! ```

mod penalty;
mod throttle;
mod window;

pub use penalty::PenaltyTracker;
pub use throttle::EndpointThrottle;
pub use window::{Outcome, RateWindow};

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::error::ClientError;

/// Name of the fallback category used for unmapped endpoints.
pub const DEFAULT_CATEGORY: &str = "default";

/// A single ceiling: at most `count` acquisitions in any rolling `window`.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum acquisitions per window.
    pub count: u32,
    /// Window length.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "window_ms")]
    pub window: Duration,
}

impl RateLimit {
    /// Create a limit of `count` acquisitions per `window`.
    pub const fn new(count: u32, window: Duration) -> Self {
        Self { count, window }
    }

    /// Requests-per-second ceiling.
    pub const fn per_second(count: u32) -> Self {
        Self::new(count, Duration::from_secs(1))
    }

    /// Requests-per-minute ceiling.
    pub const fn per_minute(count: u32) -> Self {
        Self::new(count, Duration::from_secs(60))
    }
}

/// Throttle configuration, supplied once and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Limits per category name. Must contain [`DEFAULT_CATEGORY`].
    pub categories: HashMap<String, Vec<RateLimit>>,
    /// Number of 429 rejections tolerated before the client gives up.
    pub max_penalty_count: u32,
}

impl ThrottleConfig {
    /// Create an empty configuration. Add at least the default category.
    pub fn new(max_penalty_count: u32) -> Self {
        Self {
            categories: HashMap::new(),
            max_penalty_count,
        }
    }

    /// Set the limits for a category, replacing any previous entry.
    pub fn category(mut self, name: impl Into<String>, limits: Vec<RateLimit>) -> Self {
        self.categories.insert(name.into(), limits);
        self
    }

    /// Check that a default category exists and every limit is non-zero.
    pub fn validate(&self) -> Result<(), ClientError> {
        match self.categories.get(DEFAULT_CATEGORY) {
            Some(limits) if !limits.is_empty() => {}
            _ => {
                return Err(ClientError::Config(format!(
                    "missing limits for the `{DEFAULT_CATEGORY}` category"
                )));
            }
        }

        for (name, limits) in &self.categories {
            if limits.is_empty() {
                return Err(ClientError::Config(format!("category `{name}` has no limits")));
            }
            if let Some(limit) = limits.iter().find(|l| l.count == 0 || l.window.is_zero()) {
                return Err(ClientError::Config(format!(
                    "category `{name}` has an empty limit: {limit:?}"
                )));
            }
        }

        Ok(())
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::new(limits::MAX_PENALTY_COUNT)
            .category(limits::QUOTE, vec![RateLimit::per_second(limits::QUOTE_RPS)])
            .category(
                limits::HISTORICAL,
                vec![RateLimit::per_second(limits::HISTORICAL_RPS)],
            )
            .category(
                limits::ORDER,
                vec![
                    RateLimit::per_second(limits::ORDER_RPS),
                    RateLimit::per_minute(limits::ORDER_RPM),
                ],
            )
            .category(
                DEFAULT_CATEGORY,
                vec![RateLimit::per_second(limits::DEFAULT_RPS)],
            )
    }
}

/// Kite rate limit constants.
pub mod limits {
    /// Quote, OHLC and LTP endpoints.
    pub const QUOTE: &str = "quote";
    /// Historical candle endpoint.
    pub const HISTORICAL: &str = "historical";
    /// Order placement, modification, cancellation and order book.
    pub const ORDER: &str = "order";

    /// Quote requests per second.
    pub const QUOTE_RPS: u32 = 1;
    /// Historical requests per second.
    pub const HISTORICAL_RPS: u32 = 3;
    /// Order requests per second.
    pub const ORDER_RPS: u32 = 8;
    /// Order requests per minute.
    pub const ORDER_RPM: u32 = 180;
    /// Requests per second for every other endpoint.
    pub const DEFAULT_RPS: u32 = 8;
    /// 429 rejections tolerated per session.
    pub const MAX_PENALTY_COUNT: u32 = 15;
}
