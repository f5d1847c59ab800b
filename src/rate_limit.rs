//! Sliding-window rate limiting for uploads.
//!
//! Each user has a list of timestamps of admitted requests. On every check
//! the timestamps older than the window are discarded and the remainder is
//! compared against the limit, so the count is exact at window boundaries.
//!
//! Callers without a resolved identity are filtered out before reaching the
//! limiter; it always operates on a known username.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::UploadConfig;

/// Configuration for rate limiting.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum actions allowed in the time window.
    pub max_actions: u32,
    /// Time window for counting actions.
    pub window: Duration,
}

impl RateLimitConfig {
    /// Create a new rate limit configuration.
    pub fn new(max_actions: u32, window_secs: u64) -> Self {
        Self {
            max_actions,
            window: Duration::from_secs(window_secs),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(10, 60)
    }
}

impl From<&UploadConfig> for RateLimitConfig {
    fn from(config: &UploadConfig) -> Self {
        Self::new(config.max_uploads, config.window_secs)
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Action is allowed.
    Allowed,
    /// Action is denied due to rate limit.
    Denied {
        /// Time until the oldest recorded action leaves the window.
        retry_after: Duration,
    },
}

impl RateLimitResult {
    /// Check if the action is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed)
    }
}

/// Timestamps of a single user's admitted actions, oldest first.
#[derive(Debug, Default)]
struct RateWindow {
    timestamps: Vec<Instant>,
}

impl RateWindow {
    /// Drop timestamps at or before `now - window`.
    fn prune(&mut self, now: Instant, window: Duration) {
        // No cutoff when the clock has not run for a whole window yet.
        if let Some(cutoff) = now.checked_sub(window) {
            self.timestamps.retain(|&t| t > cutoff);
        }
    }

    fn count_in_window(&self, now: Instant, window: Duration) -> usize {
        match now.checked_sub(window) {
            Some(cutoff) => self.timestamps.iter().filter(|&&t| t > cutoff).count(),
            None => self.timestamps.len(),
        }
    }

    fn retry_after(&self, now: Instant, window: Duration) -> Duration {
        self.timestamps
            .first()
            .map(|&oldest| window.saturating_sub(now.saturating_duration_since(oldest)))
            .unwrap_or(Duration::ZERO)
    }
}

/// Per-user sliding-window rate limiter.
///
/// # Example
///
/// ```
/// use stowage::rate_limit::{ActionRateLimiter, RateLimitConfig};
///
/// let limiter = ActionRateLimiter::new(RateLimitConfig::new(2, 60));
///
/// assert!(limiter.allow("alice"));
/// assert!(limiter.allow("alice"));
/// assert!(!limiter.allow("alice"));
/// assert!(limiter.allow("bob"));
/// ```
#[derive(Debug)]
pub struct ActionRateLimiter {
    config: RateLimitConfig,
    users: RwLock<HashMap<String, RateWindow>>,
}

impl ActionRateLimiter {
    /// Create a new rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// The limiter's configuration.
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Admit and record an action if the user is under the limit.
    ///
    /// Returns `Denied` without recording anything when the limit is reached.
    pub fn check_and_record(&self, username: &str) -> RateLimitResult {
        let now = Instant::now();
        let window = self.config.window;

        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        let actions = users.entry(username.to_string()).or_default();
        actions.prune(now, window);

        if actions.timestamps.len() >= self.config.max_actions as usize {
            return RateLimitResult::Denied {
                retry_after: actions.retry_after(now, window),
            };
        }

        actions.timestamps.push(now);
        RateLimitResult::Allowed
    }

    /// Boolean view of [`check_and_record`](Self::check_and_record).
    pub fn allow(&self, username: &str) -> bool {
        self.check_and_record(username).is_allowed()
    }

    /// Number of actions the user may still perform in the current window.
    pub fn remaining(&self, username: &str) -> u32 {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());

        match users.get(username) {
            Some(actions) => {
                let used = actions.count_in_window(Instant::now(), self.config.window);
                self.config.max_actions.saturating_sub(used as u32)
            }
            None => self.config.max_actions,
        }
    }

    /// Prune every user's window and forget users with no recent actions.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());

        for actions in users.values_mut() {
            actions.prune(now, self.config.window);
        }
        users.retain(|_, actions| !actions.timestamps.is_empty());
    }

    /// Number of users currently tracked.
    pub fn tracked_users(&self) -> usize {
        self.users.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for ActionRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
