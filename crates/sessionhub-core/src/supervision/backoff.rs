//! Reconnect backoff.
//!
//! `delay(attempt) = min(base * 2^attempt, max_delay)`, with `attempt`
//! starting at 0.  Each successful [`BackoffScheduler::schedule`] call
//! consumes one attempt; once `max_attempts` have been consumed the scheduler
//! refuses with [`BackoffExhausted`] and the session must move to `Failed`.
//!
//! # Single pending timer
//!
//! The scheduler stores at most one deadline.  Scheduling again overwrites
//! it, which is how a newer reconnect request cancels an older one: the
//! supervisor only ever sleeps on [`BackoffScheduler::deadline`].
//!
//! ```text
//! attempt:  0    1     2     3     4     5      6      7 ..
//! delay:    5s   10s   20s   40s   80s   160s   300s   300s ..
//! ```

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::domain::config::SessionPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("reconnect attempts exhausted after {attempts} tries")]
pub struct BackoffExhausted {
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    attempts: u32,
    deadline: Option<Instant>,
}

impl BackoffScheduler {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            attempts: 0,
            deadline: None,
        }
    }

    pub fn from_policy(policy: &SessionPolicy) -> Self {
        Self::new(
            policy.reconnect_base_delay,
            policy.reconnect_max_delay,
            policy.max_reconnect_attempts,
        )
    }

    /// The delay that precedes reconnect number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Consumes one attempt and arms the deadline at `now + delay`.
    ///
    /// Any previously armed deadline is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`BackoffExhausted`] (and disarms the deadline) once
    /// `max_attempts` have been used.
    pub fn schedule(&mut self, now: Instant) -> Result<Duration, BackoffExhausted> {
        if self.is_exhausted() {
            self.deadline = None;
            return Err(BackoffExhausted {
                attempts: self.attempts,
            });
        }
        let delay = self.delay_for(self.attempts);
        self.attempts += 1;
        self.deadline = Some(now + delay);
        Ok(delay)
    }

    /// Clears the deadline if it has passed, reporting whether it had.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(at) if at <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Called on every successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.deadline = None;
    }

    /// Seeds the attempt counter from a persisted snapshot.
    pub fn restore_attempts(&mut self, attempts: u32) {
        self.attempts = attempts.min(self.max_attempts);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
