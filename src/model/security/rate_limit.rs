//! Request-rate guarding for the mutating endpoints.
//!
//! The engine depends only on the [`RateLimiter`] capability, not on any
//! particular backing store; [`WindowRateLimiter`] is the in-process
//! fixed-window implementation injected at startup. Unlike every other
//! gateway stage, the limiter fails OPEN on its own internal errors: a broken
//! limiter must never become the outage itself.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Requests allowed per window for one endpoint category.
#[derive(Debug, Copy, Clone)]
pub struct RateQuota {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateQuota {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }
}

/// Outcome of a rate-limit check. A denial carries the seconds to wait
/// before retrying, and nothing more.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: u64 },
}

/// The rate-limiting capability the engine is written against.
pub trait RateLimiter: Send + Sync {
    /// Check and record one request under the given key.
    fn check(&self, key: &str) -> RateLimitDecision;
}

/// Per-key request count within the current window.
#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: Instant,
}

/// Fixed-window counters behind a mutex. Stale keys are pruned inline once
/// the map grows past a threshold; there is no background cleanup task.
pub struct WindowRateLimiter {
    quota: RateQuota,
    states: Mutex<HashMap<String, WindowState>>,
}

const PRUNE_THRESHOLD: usize = 4096;

impl WindowRateLimiter {
    pub fn new(quota: RateQuota) -> Self {
        Self {
            quota,
            states: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for WindowRateLimiter {
    fn check(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let window = Duration::from_secs(self.quota.window_secs);

        let mut states = match self.states.lock() {
            Ok(states) => states,
            Err(poisoned) => {
                // Fail open: a panicked holder must not lock everyone out.
                error!("Rate limiter state poisoned, failing open");
                self.states.clear_poison();
                poisoned.into_inner()
            }
        };

        if states.len() > PRUNE_THRESHOLD {
            states.retain(|_, state| now.duration_since(state.window_start) < window);
        }

        let state = states.entry(key.to_string()).or_insert(WindowState {
            count: 0,
            window_start: now,
        });

        if now.duration_since(state.window_start) >= window {
            state.count = 0;
            state.window_start = now;
        }

        if state.count >= self.quota.max_requests {
            let retry_after = window
                .saturating_sub(now.duration_since(state.window_start))
                .as_secs()
                .max(1);
            return RateLimitDecision::Limited { retry_after };
        }

        state.count += 1;
        RateLimitDecision::Allowed
    }
}

/// The injected limiters, one per endpoint category, held in managed state.
pub struct Limiters {
    pub vote: Box<dyn RateLimiter>,
    pub auth: Box<dyn RateLimiter>,
}
