//! SessionRegistry: the public face of the manager.
//!
//! # Ownership
//!
//! The registry maps session ids to supervisor handles.  It never touches
//! session state itself; every per-session operation is a command to the
//! owning supervisor.  The map lock is held only to look up, insert, or
//! remove an entry, never while waiting on a supervisor, so a slow session
//! cannot stall operations on the others.
//!
//! # Creation is linearizable
//!
//! `initialize` checks and inserts under the same lock, so concurrent callers
//! for one id always end up talking to the same supervisor.
//!
//! # Logged-out sessions
//!
//! A supervisor whose session logs out ends on its own.  Its entry is evicted
//! lazily: the next lookup that finds a closed handle removes it and reports
//! the session as unknown.

use std::collections::HashMap;
use std::sync::Arc;

use sessionhub_core::{
    normalize_destination, LogEntry, LogLevel, PairingChallenge, Payload, RejectReason, SendOutcome, SessionId,
    SessionPolicy, SessionSnapshot, SessionStatus,
};
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{info, warn};

use super::events::{EventBus, SessionEvent};
use super::ports::{CredentialStore, CredentialStoreError, TransportDriver};
use super::session::{PairingError, SessionSupervisor, SupervisorConfig, SupervisorHandle};

/// Default number of entries returned by [`SessionRegistry::get_logs`].
pub const DEFAULT_LOG_LIMIT: usize = 100;

/// Body used by [`SessionRegistry::send_test_message`].
pub const TEST_MESSAGE_BODY: &str = "SessionHub test message: this session can deliver outbound notifications.";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("credential store error: {0}")]
    Credentials(#[source] CredentialStoreError),

    #[error("registry is shutting down")]
    ShuttingDown,
}

struct Entry {
    handle: SupervisorHandle,
    task: JoinHandle<()>,
}

struct Inner {
    policy: Arc<SessionPolicy>,
    driver: Arc<dyn TransportDriver>,
    credentials: Arc<dyn CredentialStore>,
    bus: EventBus,
    sessions: Mutex<HashMap<SessionId, Entry>>,
    /// Persisted counters waiting for their session's first `initialize`.
    seeds: Mutex<HashMap<SessionId, SessionSnapshot>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    pub fn new(
        policy: SessionPolicy,
        driver: Arc<dyn TransportDriver>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let bus = EventBus::new(policy.log_capacity);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                policy: Arc::new(policy),
                driver,
                credentials,
                bus,
                sessions: Mutex::new(HashMap::new()),
                seeds: Mutex::new(HashMap::new()),
                shutdown_tx,
            }),
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.inner.policy
    }

    /// Stages persisted counters.  Each snapshot is applied when its session
    /// is first initialised; `reset` and `delete` discard it.
    pub async fn seed(&self, snapshots: Vec<SessionSnapshot>) {
        let mut seeds = self.inner.seeds.lock().await;
        for snapshot in snapshots {
            seeds.insert(snapshot.session_id.clone(), snapshot);
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Returns the live supervisor for `id`, spawning one if needed.
    async fn ensure(&self, id: &SessionId) -> Result<SupervisorHandle, RegistryError> {
        if self.is_shutting_down() {
            return Err(RegistryError::ShuttingDown);
        }

        let mut sessions = self.inner.sessions.lock().await;
        if let Some(entry) = sessions.get(id) {
            if !entry.handle.is_closed() {
                return Ok(entry.handle.clone());
            }
        }

        let seed = self.inner.seeds.lock().await.remove(id);
        let config = SupervisorConfig {
            id: id.clone(),
            policy: Arc::clone(&self.inner.policy),
            driver: Arc::clone(&self.inner.driver),
            credentials: Arc::clone(&self.inner.credentials),
            bus: self.inner.bus.clone(),
            seed,
        };
        let (handle, task) = SessionSupervisor::spawn(config, self.inner.shutdown_tx.subscribe());
        sessions.insert(
            id.clone(),
            Entry {
                handle: handle.clone(),
                task,
            },
        );
        info!(session_id = %id, "session created");
        Ok(handle)
    }

    /// Looks up a live supervisor, evicting a logged-out one.
    async fn lookup(&self, id: &SessionId) -> Option<SupervisorHandle> {
        let mut sessions = self.inner.sessions.lock().await;
        match sessions.get(id) {
            Some(entry) if !entry.handle.is_closed() => Some(entry.handle.clone()),
            Some(_) => {
                sessions.remove(id);
                None
            }
            None => None,
        }
    }

    /// Removes a live entry, for `reset` and `delete`.
    async fn take(&self, id: &SessionId) -> Result<Entry, RegistryError> {
        let entry = self
            .inner
            .sessions
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        if entry.handle.is_closed() {
            return Err(RegistryError::NotFound(id.clone()));
        }
        Ok(entry)
    }

    /// Stops a removed supervisor and waits for its task, bounded by the
    /// shutdown timeout.
    async fn retire(&self, id: &SessionId, entry: Entry, logout: bool) {
        let limit = self.inner.policy.shutdown_timeout;
        if timeout(limit, entry.handle.shutdown(logout)).await.is_err() {
            warn!(session_id = %id, "supervisor did not stop in time; aborting");
        }
        let mut task = entry.task;
        if timeout(limit, &mut task).await.is_err() {
            task.abort();
        }
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Creates the session if needed and returns its status.  Idempotent.
    pub async fn initialize(&self, id: &SessionId) -> Result<SessionStatus, RegistryError> {
        let handle = self.ensure(id).await?;
        handle
            .status()
            .await
            .map_err(|_| RegistryError::NotFound(id.clone()))
    }

    /// Waits for a pairing challenge, creating the session first if needed.
    pub async fn request_pairing(&self, id: &SessionId) -> Result<PairingChallenge, PairingError> {
        let handle = self.ensure(id).await.map_err(|_| PairingError::ShuttingDown)?;
        let limit = self.inner.policy.pairing_timeout;
        match timeout(limit, handle.request_pairing()).await {
            Ok(result) => result,
            Err(_) => Err(PairingError::Timeout(limit)),
        }
    }

    pub async fn get_status(&self, id: &SessionId) -> Result<SessionStatus, RegistryError> {
        let handle = self
            .lookup(id)
            .await
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        handle
            .status()
            .await
            .map_err(|_| RegistryError::NotFound(id.clone()))
    }

    /// Status of every live session, ordered by id.
    pub async fn list_all(&self) -> Vec<SessionStatus> {
        let handles: Vec<SupervisorHandle> = {
            let mut sessions = self.inner.sessions.lock().await;
            sessions.retain(|_, entry| !entry.handle.is_closed());
            sessions.values().map(|entry| entry.handle.clone()).collect()
        };

        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(status) = handle.status().await {
                statuses.push(status);
            }
        }
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Normalises `destination` and hands the message to the session.
    ///
    /// Never fails: problems come back as [`SendOutcome::Rejected`].
    pub async fn send_message(&self, id: &SessionId, destination: &str, payload: Payload) -> SendOutcome {
        let Some(handle) = self.lookup(id).await else {
            return SendOutcome::rejected(RejectReason::NotInitialized);
        };
        let destination =
            match normalize_destination(destination, self.inner.policy.default_country_code.as_deref()) {
                Ok(destination) => destination,
                Err(e) => return SendOutcome::rejected(RejectReason::InvalidDestination(e.to_string())),
            };
        handle
            .send(destination, payload)
            .await
            .unwrap_or_else(|_| SendOutcome::rejected(RejectReason::NotInitialized))
    }

    /// Sends a fixed diagnostic text through the normal send path.
    pub async fn send_test_message(&self, id: &SessionId, destination: &str) -> SendOutcome {
        self.send_message(id, destination, Payload::text(TEST_MESSAGE_BODY))
            .await
    }

    /// Replaces the session's supervisor with a fresh one.
    ///
    /// Credentials are kept; stats, queue, and persisted counters are not.
    pub async fn reset(&self, id: &SessionId) -> Result<SessionStatus, RegistryError> {
        let entry = self.take(id).await?;
        self.retire(id, entry, false).await;
        self.inner.seeds.lock().await.remove(id);
        self.inner
            .bus
            .record(LogLevel::Info, Some(id.clone()), "session reset")
            .await;
        self.initialize(id).await
    }

    /// Logs out, stops the supervisor, and forgets the session entirely.
    pub async fn delete(&self, id: &SessionId) -> Result<(), RegistryError> {
        let entry = self.take(id).await?;
        self.retire(id, entry, true).await;
        self.inner.seeds.lock().await.remove(id);
        self.inner.bus.forget(id).await;
        self.inner
            .credentials
            .delete(id)
            .await
            .map_err(RegistryError::Credentials)?;
        self.inner
            .bus
            .publish(SessionEvent::Removed {
                session_id: id.clone(),
            })
            .await;
        Ok(())
    }

    /// Most recent log entries, oldest first.
    pub async fn get_logs(&self, id: Option<&SessionId>, limit: Option<usize>) -> Vec<LogEntry> {
        self.inner
            .bus
            .logs(id, limit.unwrap_or(DEFAULT_LOG_LIMIT))
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.bus.subscribe()
    }

    /// Snapshots of every live session plus the staged seeds of sessions not
    /// yet initialised, for the state persister.
    pub async fn snapshot_all(&self) -> Vec<SessionSnapshot> {
        // Same lock order as `ensure`: sessions, then seeds.
        let (handles, pending): (Vec<SupervisorHandle>, Vec<SessionSnapshot>) = {
            let sessions = self.inner.sessions.lock().await;
            let seeds = self.inner.seeds.lock().await;
            let handles = sessions.values().map(|entry| entry.handle.clone()).collect();
            let pending = seeds
                .values()
                .filter(|seed| !sessions.contains_key(&seed.session_id))
                .cloned()
                .collect();
            (handles, pending)
        };

        let mut snapshots = Vec::with_capacity(handles.len() + pending.len());
        for handle in handles {
            if let Ok(snapshot) = handle.snapshot().await {
                snapshots.push(snapshot);
            }
        }
        snapshots.extend(pending);
        snapshots.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        snapshots
    }

    /// Stops every supervisor.  Supervisors that do not finish within the
    /// shutdown timeout are aborted.
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        let entries: Vec<(SessionId, Entry)> = self.inner.sessions.lock().await.drain().collect();
        info!(sessions = entries.len(), "stopping all sessions");

        let deadline = Instant::now() + self.inner.policy.shutdown_timeout;
        for (id, entry) in entries {
            let mut task = entry.task;
            if timeout_at(deadline, &mut task).await.is_err() {
                warn!(session_id = %id, "supervisor did not stop in time; aborting");
                task.abort();
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
