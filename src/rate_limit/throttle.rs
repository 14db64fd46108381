//! Per-category request throttling.
//!
//! Each endpoint category owns one [`RateWindow`] per configured limit. An
//! acquisition succeeds only when every window of the category has room at
//! the same instant; otherwise the slots reserved in that pass are given
//! back and the caller sleeps for the longest reported wait.
//!
//! # Example
//!
//! ```rust,no_run
//! use kite_api_client::rate_limit::{EndpointThrottle, ThrottleConfig};
//!
//! # async fn run() -> kite_api_client::Result<()> {
//! let throttle = EndpointThrottle::new(&ThrottleConfig::default())?;
//!
//! // Blocks until both the 8/s and 180/min order limits have room.
//! throttle.acquire("order").await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ClientError;
use crate::rate_limit::{DEFAULT_CATEGORY, RateLimit, RateWindow, ThrottleConfig};

/// Blocking, all-or-nothing throttle over named endpoint categories.
///
/// Safe to share between tasks. All window state sits behind one lock that
/// is never held across a sleep.
#[derive(Debug)]
pub struct EndpointThrottle {
    limits: HashMap<String, Vec<RateLimit>>,
    windows: Mutex<HashMap<String, Vec<RateWindow>>>,
    waits: AtomicU64,
}

impl EndpointThrottle {
    /// Create a throttle from a validated configuration.
    pub fn new(config: &ThrottleConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let windows = config
            .categories
            .iter()
            .map(|(name, limits)| {
                let set = limits.iter().copied().map(RateWindow::new).collect();
                (name.clone(), set)
            })
            .collect();

        Ok(Self {
            limits: config.categories.clone(),
            windows: Mutex::new(windows),
            waits: AtomicU64::new(0),
        })
    }

    /// Wait until a slot is available in every window of `category`.
    ///
    /// Unmapped categories use the `default` limits.
    pub async fn acquire(&self, category: &str) -> Result<(), ClientError> {
        self.acquire_or_cancel(category, std::future::pending()).await
    }

    /// Like [`acquire`](Self::acquire), giving up with [`ClientError::Cancelled`]
    /// once `deadline` passes.
    pub async fn acquire_until(&self, category: &str, deadline: Instant) -> Result<(), ClientError> {
        self.acquire_or_cancel(category, tokio::time::sleep_until(deadline))
            .await
    }

    /// Like [`acquire`](Self::acquire), giving up with [`ClientError::Cancelled`]
    /// as soon as `cancel` completes. No slot is consumed by a cancelled call.
    pub async fn acquire_or_cancel<F>(&self, category: &str, cancel: F) -> Result<(), ClientError>
    where
        F: Future<Output = ()>,
    {
        let key = self.resolve(category);
        tokio::pin!(cancel);

        loop {
            let wait = match self.try_reserve(key).await {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            self.waits.fetch_add(1, Ordering::Relaxed);
            debug!(
                category = key,
                wait_ms = wait.as_millis() as u64,
                "Throttling request"
            );

            tokio::select! {
                biased;
                _ = &mut cancel => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// The limits enforced for `category` after the default fallback.
    pub fn limits_for(&self, category: &str) -> &[RateLimit] {
        self.limits
            .get(self.resolve(category))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// How many times a caller has been put to sleep by this throttle.
    pub fn wait_count(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    fn resolve<'a>(&'a self, category: &'a str) -> &'a str {
        if self.limits.contains_key(category) {
            category
        } else {
            debug!(category, "Unmapped category, using default limits");
            DEFAULT_CATEGORY
        }
    }

    /// Evaluate every window of the category at a single instant.
    ///
    /// Commits all of them or none; on refusal returns the longest wait.
    async fn try_reserve(&self, key: &str) -> Result<(), Duration> {
        let mut windows = self.windows.lock().await;
        let Some(set) = windows.get_mut(key) else {
            return Ok(());
        };

        let now = Instant::now();
        let mut wait = Duration::ZERO;
        let mut committed = Vec::with_capacity(set.len());

        for (index, window) in set.iter_mut().enumerate() {
            let outcome = window.try_acquire(now);
            if outcome.allowed {
                committed.push(index);
            } else {
                wait = wait.max(outcome.wait);
            }
        }

        if committed.len() == set.len() {
            return Ok(());
        }

        for index in committed {
            set[index].rollback(now);
        }
        Err(wait.max(Duration::from_millis(1)))
    }
}
