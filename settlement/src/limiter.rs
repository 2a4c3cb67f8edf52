//! Sliding-window submission budget.
//!
//! At most `capacity` submissions are admitted in any `window_ms` span.
//! The window is shared by every caller of one [`RateLimiter`]: it models
//! how hard this process may hit the ledger, not how much a single payer
//! may spend. One busy payer can therefore consume the whole budget.
//!
//! Timestamps older than the window are evicted lazily, on each check.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::config::RateLimitConfig;

/// Outcome of [`RateLimiter::check_limit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Zero when admitted. Otherwise, how long until a slot frees up.
    pub wait_time_ms: u64,
}

pub struct RateLimiter {
    window_ms: u64,
    capacity: usize,
    /// Admission timestamps, oldest at the front.
    window: Mutex<VecDeque<u64>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window_ms", &self.window_ms)
            .field("capacity", &self.capacity)
            .field("in_window", &self.window.lock().len())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(window_ms: u64, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            window_ms,
            capacity,
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            clock,
        }
    }

    pub fn from_config(cfg: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(cfg.window_ms, cfg.capacity, clock)
    }

    /// Admits and records the call if the window has room.
    ///
    /// When full, `wait_time_ms = window - (now - oldest)`: sleeping that
    /// long guarantees the next check is admitted (absent other callers).
    pub fn check_limit(&self) -> RateDecision {
        let now = self.clock.now_ms();
        let mut window = self.window.lock();

        while let Some(&oldest) = window.front() {
            if now.saturating_sub(oldest) >= self.window_ms {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < self.capacity {
            window.push_back(now);
            return RateDecision {
                allowed: true,
                wait_time_ms: 0,
            };
        }

        // Full window is never empty (capacity > 0 is validated upstream).
        let oldest = window.front().copied().unwrap_or(now);
        let wait_time_ms = self
            .window_ms
            .saturating_sub(now.saturating_sub(oldest))
            .max(1);

        debug!(
            in_window = window.len(),
            capacity = self.capacity,
            wait_time_ms,
            "submission rate limited"
        );

        RateDecision {
            allowed: false,
            wait_time_ms,
        }
    }

    /// Admissions currently counted against the window (without evicting).
    pub fn in_window(&self) -> usize {
        self.window.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(window_ms: u64, capacity: usize) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (RateLimiter::new(window_ms, capacity, clock.clone()), clock)
    }

    #[test]
    fn admits_up_to_capacity_then_rejects() {
        let (rl, clock) = limiter(10_000, 5);
        for _ in 0..5 {
            assert!(rl.check_limit().allowed);
            clock.advance(100);
        }
        let sixth = rl.check_limit();
        assert!(!sixth.allowed);
        assert!(sixth.wait_time_ms > 0);
        // Oldest at t=0, now t=500.
        assert_eq!(sixth.wait_time_ms, 9_500);
    }

    #[test]
    fn waiting_the_reported_time_admits() {
        let (rl, clock) = limiter(10_000, 5);
        for _ in 0..5 {
            assert!(rl.check_limit().allowed);
        }
        let rejected = rl.check_limit();
        assert!(!rejected.allowed);

        clock.advance(rejected.wait_time_ms);
        assert!(rl.check_limit().allowed);
    }

    #[test]
    fn rejected_calls_are_not_recorded() {
        let (rl, clock) = limiter(1_000, 1);
        assert!(rl.check_limit().allowed);
        for _ in 0..10 {
            assert!(!rl.check_limit().allowed);
        }
        assert_eq!(rl.in_window(), 1);
        clock.advance(1_000);
        assert!(rl.check_limit().allowed);
    }

    #[test]
    fn window_slides_one_entry_at_a_time() {
        let (rl, clock) = limiter(1_000, 2);
        assert!(rl.check_limit().allowed); // t=0
        clock.advance(600);
        assert!(rl.check_limit().allowed); // t=600
        clock.advance(400);
        // t=1000: the t=0 entry has aged out, t=600 remains.
        assert!(rl.check_limit().allowed);
        let d = rl.check_limit();
        assert!(!d.allowed);
        // Oldest remaining is t=600, so 600ms until it leaves.
        assert_eq!(d.wait_time_ms, 600);
    }

    #[test]
    fn wait_time_is_never_zero_when_rejected() {
        let (rl, clock) = limiter(100, 1);
        assert!(rl.check_limit().allowed);
        clock.advance(99);
        let d = rl.check_limit();
        assert!(!d.allowed);
        assert_eq!(d.wait_time_ms, 1);
    }
}
