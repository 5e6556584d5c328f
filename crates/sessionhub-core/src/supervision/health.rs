//! Liveness bookkeeping for connected sessions.
//!
//! The health monitor in the manager crate runs the actual probes; this type
//! only turns their results into a [`HealthVerdict`].

use chrono::{DateTime, Utc};

use crate::domain::session::HealthCheck;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// Failing, but below the threshold.
    Degraded { consecutive_failures: u32 },
    /// Threshold reached: treat as a recoverable disconnect.
    Unhealthy { consecutive_failures: u32 },
}

#[derive(Debug, Clone)]
pub struct HealthTracker {
    threshold: u32,
    record: HealthCheck,
}

impl HealthTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            record: HealthCheck::default(),
        }
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) -> HealthVerdict {
        self.record.last_check_at = Some(at);
        self.record.is_healthy = true;
        self.record.consecutive_failures = 0;
        HealthVerdict::Healthy
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>) -> HealthVerdict {
        self.record.last_check_at = Some(at);
        self.record.is_healthy = false;
        self.record.consecutive_failures = self.record.consecutive_failures.saturating_add(1);
        let consecutive_failures = self.record.consecutive_failures;
        if consecutive_failures >= self.threshold {
            HealthVerdict::Unhealthy {
                consecutive_failures,
            }
        } else {
            HealthVerdict::Degraded {
                consecutive_failures,
            }
        }
    }

    /// Marks the session healthy on a fresh connect.
    pub fn mark_connected(&mut self, at: DateTime<Utc>) {
        self.record_success(at);
    }

    /// Marks the session unhealthy without counting a probe failure.
    pub fn mark_disconnected(&mut self) {
        self.record.is_healthy = false;
    }

    pub fn snapshot(&self) -> HealthCheck {
        self.record.clone()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_consecutive_failures_are_unhealthy() {
        // Arrange
        let mut t = HealthTracker::new(3);
        let now = Utc::now();

        // Act
        let v1 = t.record_failure(now);
        let v2 = t.record_failure(now);
        let v3 = t.record_failure(now);

        // Assert
        assert_eq!(v1, HealthVerdict::Degraded { consecutive_failures: 1 });
        assert_eq!(v2, HealthVerdict::Degraded { consecutive_failures: 2 });
        assert_eq!(v3, HealthVerdict::Unhealthy { consecutive_failures: 3 });
        assert!(!t.snapshot().is_healthy);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut t = HealthTracker::new(3);
        let now = Utc::now();
        t.record_failure(now);
        t.record_failure(now);

        assert_eq!(t.record_success(now), HealthVerdict::Healthy);
        assert_eq!(t.snapshot().consecutive_failures, 0);
        assert_eq!(
            t.record_failure(now),
            HealthVerdict::Degraded { consecutive_failures: 1 }
        );
    }

    #[test]
    fn test_mark_disconnected_keeps_failure_count() {
        let mut t = HealthTracker::new(3);
        let now = Utc::now();
        t.mark_connected(now);
        t.record_failure(now);

        t.mark_disconnected();

        let snap = t.snapshot();
        assert!(!snap.is_healthy);
        assert_eq!(snap.consecutive_failures, 1);
        assert_eq!(snap.last_check_at, Some(now));
    }
}
