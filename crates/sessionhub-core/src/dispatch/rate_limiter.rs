//! Per-session sliding-window rate limiter.
//!
//! The limiter remembers the instant of every send inside the trailing
//! window.  Its memory is bounded by time, not by count: stamps older than
//! the window are evicted on every call.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimiter {
    max: usize,
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            stamps: VecDeque::with_capacity(max),
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(oldest) = self.stamps.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Reserves a slot at `now` if the window has room.
    ///
    /// Returns `false` (and records nothing) when the window is exhausted.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.evict(now);
        if self.stamps.len() >= self.max {
            return false;
        }
        self.stamps.push_back(now);
        true
    }

    /// How long until the next slot frees up.  Zero when one is free now.
    pub fn next_available_in(&mut self, now: Instant) -> Duration {
        self.evict(now);
        if self.stamps.len() < self.max {
            return Duration::ZERO;
        }
        match self.stamps.front() {
            Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
