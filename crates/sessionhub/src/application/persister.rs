//! StatePersister: periodic snapshots of non-secret session counters.
//!
//! Every `state_persist_interval` the persister asks the registry for one
//! [`SessionSnapshot`] per live session, plus any restored snapshot whose
//! session has not been initialised yet, and writes them as a single
//! timestamped [`SnapshotDocument`].  On start-up, [`StatePersister::restore`]
//! reads the last document back and stages it in the registry so each
//! session picks up its counters when first initialised.
//!
//! Persistence failures are logged and otherwise ignored; in-memory state
//! stays authoritative.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::ports::{SnapshotDocument, SnapshotStore, SnapshotStoreError};
use super::registry::SessionRegistry;

#[derive(Clone)]
pub struct StatePersister {
    registry: SessionRegistry,
    store: Arc<dyn SnapshotStore>,
    interval: Duration,
}

impl StatePersister {
    pub fn new(registry: SessionRegistry, store: Arc<dyn SnapshotStore>) -> Self {
        let interval = registry.policy().state_persist_interval;
        Self {
            registry,
            store,
            interval,
        }
    }

    /// Seeds the registry from the last snapshot.  Returns how many sessions
    /// were staged; a missing or unreadable snapshot stages none.
    pub async fn restore(&self) -> usize {
        match self.store.read().await {
            Ok(Some(document)) => {
                let count = document.sessions.len();
                info!(sessions = count, written_at = %document.written_at, "restored state snapshot");
                self.registry.seed(document.sessions).await;
                count
            }
            Ok(None) => {
                debug!("no state snapshot found");
                0
            }
            Err(e) => {
                warn!(error = %e, "could not read state snapshot; starting fresh");
                0
            }
        }
    }

    /// Writes one snapshot of every live or still-staged session.
    pub async fn persist_once(&self) -> Result<usize, SnapshotStoreError> {
        let sessions = self.registry.snapshot_all().await;
        let count = sessions.len();
        let document = SnapshotDocument {
            written_at: Utc::now(),
            sessions,
        };
        self.store.write(&document).await?;
        debug!(sessions = count, "state snapshot written");
        Ok(count)
    }

    /// Runs the periodic persist loop until `shutdown` turns `true`, then
    /// writes one final snapshot.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.persist_once().await {
                            warn!(error = %e, "periodic state snapshot failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        let stopping = changed.is_err() || *shutdown.borrow();
                        if stopping {
                            break;
                        }
                    }
                }
            }
            if let Err(e) = self.persist_once().await {
                warn!(error = %e, "final state snapshot failed");
            }
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
