//! HealthMonitor: periodic liveness probes for one live link.
//!
//! The monitor runs as its own task so a slow probe never delays message
//! dispatch.  It does not change session state itself; it reports each probe
//! outcome to the owning supervisor, which counts failures with its
//! `HealthTracker` and decides when to reconnect.
//!
//! Each monitor carries the `generation` it was started for.  When the
//! supervisor replaces a link it bumps its generation, so late reports from
//! an old monitor are recognised and ignored.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::debug;

use super::ports::TransportLink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Alive,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub generation: u64,
    pub outcome: ProbeOutcome,
}

/// Running probe task.  Dropping the monitor stops it.
pub struct HealthMonitor {
    task: JoinHandle<()>,
}

impl HealthMonitor {
    /// Starts probing `link` every `interval`, first probe one interval
    /// from now.
    pub fn spawn(
        link: Arc<dyn TransportLink>,
        interval: Duration,
        probe_timeout: Duration,
        generation: u64,
        reports: mpsc::Sender<HealthReport>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = match timeout(probe_timeout, link.probe()).await {
                    Ok(Ok(())) => ProbeOutcome::Alive,
                    Ok(Err(e)) => ProbeOutcome::Failed(e.to_string()),
                    Err(_) => ProbeOutcome::Failed("probe timed out".to_string()),
                };
                if reports.send(HealthReport { generation, outcome }).await.is_err() {
                    debug!(generation, "supervisor gone; health monitor exiting");
                    break;
                }
            }
        });
        Self { task }
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::TransportError;
    use async_trait::async_trait;
    use sessionhub_core::{Destination, Payload};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyLink {
        healthy: AtomicBool,
        hang: bool,
    }

    #[async_trait]
    impl TransportLink for FlakyLink {
        async fn send(&self, _d: &Destination, _p: &Payload) -> Result<(), TransportError> {
            Ok(())
        }
        async fn probe(&self) -> Result<(), TransportError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(TransportError::Io("no pong".to_string()))
            }
        }
        async fn logout(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn close(&self) {}
    }

    fn link(healthy: bool, hang: bool) -> Arc<FlakyLink> {
        Arc::new(FlakyLink {
            healthy: AtomicBool::new(healthy),
            hang,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_probe_runs_after_one_interval() {
        // Arrange
        let (tx, mut rx) = mpsc::channel(8);
        let started = Instant::now();

        // Act
        let _monitor = HealthMonitor::spawn(link(true, false), Duration::from_secs(60), Duration::from_secs(10), 7, tx);
        let report = rx.recv().await.unwrap();

        // Assert
        assert_eq!(report, HealthReport { generation: 7, outcome: ProbeOutcome::Alive });
        assert!(Instant::now() - started >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_is_reported() {
        let (tx, mut rx) = mpsc::channel(8);
        let _monitor = HealthMonitor::spawn(link(false, false), Duration::from_secs(60), Duration::from_secs(10), 1, tx);

        let report = rx.recv().await.unwrap();

        assert_eq!(report.outcome, ProbeOutcome::Failed("transport I/O error: no pong".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_times_out() {
        let (tx, mut rx) = mpsc::channel(8);
        let _monitor = HealthMonitor::spawn(link(true, true), Duration::from_secs(60), Duration::from_secs(10), 1, tx);

        let report = rx.recv().await.unwrap();

        assert_eq!(report.outcome, ProbeOutcome::Failed("probe timed out".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_reporting() {
        // Arrange
        let (tx, mut rx) = mpsc::channel(8);
        let monitor = HealthMonitor::spawn(link(true, false), Duration::from_secs(60), Duration::from_secs(10), 1, tx);

        // Act
        monitor.stop();

        // Assert – the aborted task drops its sender, closing the channel
        assert_eq!(rx.recv().await, None);
    }
}
