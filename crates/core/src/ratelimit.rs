// crates/core/src/ratelimit.rs
//! Sliding-window rate limiter for outbound fetches.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_MAX_REQUESTS: usize = 60;
const DEFAULT_WINDOW_SECS: u64 = 60;

/// Admits at most `max_requests` calls per sliding window of `window`.
///
/// Thread-safe; the lock is held only for the prune-and-record step.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Zero values fall back to the defaults (60 requests / 60 seconds).
    pub fn new(max_requests: usize, window_seconds: u64) -> Self {
        let max_requests = if max_requests == 0 {
            DEFAULT_MAX_REQUESTS
        } else {
            max_requests
        };
        let window_seconds = if window_seconds == 0 {
            DEFAULT_WINDOW_SECS
        } else {
            window_seconds
        };
        Self {
            max_requests,
            window: Duration::from_secs(window_seconds),
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    /// Drop expired stamps, then admit and record `now` if under the limit.
    /// Returns false without recording when the window is full.
    pub fn is_allowed(&self) -> bool {
        let now = Instant::now();
        let mut admitted = self.admitted.lock().unwrap();

        while let Some(oldest) = admitted.front() {
            if now.duration_since(*oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }

        if admitted.len() < self.max_requests {
            admitted.push_back(now);
            true
        } else {
            false
        }
    }

    /// Time until the oldest in-window admit expires; zero when the window
    /// has room (or nothing has been admitted yet).
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let admitted = self.admitted.lock().unwrap();

        if admitted.len() < self.max_requests {
            return Duration::ZERO;
        }

        match admitted.front() {
            Some(oldest) => {
                let elapsed = now.duration_since(*oldest);
                self.window.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS)
    }
}

impl From<&crate::config::RateLimitConfig> for RateLimiter {
    fn from(config: &crate::config::RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window_seconds)
    }
}
