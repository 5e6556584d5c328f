//! Lifecycle events and the session log.
//!
//! Every supervisor publishes typed [`SessionEvent`]s through a shared
//! [`EventBus`].  Publishing does three things in order:
//!
//! 1. Appends a [`LogEntry`] to the bounded [`LogBuffer`] served by `GetLogs`.
//! 2. Emits a `tracing` record at the matching level.
//! 3. Broadcasts the event to any subscribers (a lagging subscriber loses
//!    the oldest events; publishing never blocks on it).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sessionhub_core::{LogBuffer, LogEntry, LogLevel, PairingChallenge, SessionId, SessionState};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Capacity of the broadcast channel behind [`EventBus::subscribe`].
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StatusChanged {
        session_id: SessionId,
        from: SessionState,
        to: SessionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        at: DateTime<Utc>,
    },
    PairingChallengeIssued {
        session_id: SessionId,
        challenge: PairingChallenge,
    },
    MessageDispatched {
        session_id: SessionId,
        message_id: Uuid,
    },
    MessageRequeued {
        session_id: SessionId,
        message_id: Uuid,
        retry_count: u32,
        error: String,
    },
    MessageFailed {
        session_id: SessionId,
        message_id: Uuid,
        error: String,
    },
    MessageDropped {
        session_id: SessionId,
        message_id: Uuid,
        exhausted: bool,
    },
    HealthCheckFailed {
        session_id: SessionId,
        consecutive_failures: u32,
    },
    Removed {
        session_id: SessionId,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionEvent::StatusChanged { session_id, .. }
            | SessionEvent::PairingChallengeIssued { session_id, .. }
            | SessionEvent::MessageDispatched { session_id, .. }
            | SessionEvent::MessageRequeued { session_id, .. }
            | SessionEvent::MessageFailed { session_id, .. }
            | SessionEvent::MessageDropped { session_id, .. }
            | SessionEvent::HealthCheckFailed { session_id, .. }
            | SessionEvent::Removed { session_id } => session_id,
        }
    }

    /// Log level and human-readable line for the session log.
    fn describe(&self) -> (LogLevel, String) {
        match self {
            SessionEvent::StatusChanged { from, to, detail, .. } => {
                let level = match to {
                    SessionState::Connected => LogLevel::Success,
                    SessionState::Failed => LogLevel::Error,
                    SessionState::Disconnected
                    | SessionState::Reconnecting
                    | SessionState::LoggedOut => LogLevel::Warning,
                    _ => LogLevel::Info,
                };
                let line = match detail {
                    Some(d) => format!("status {from} -> {to}: {d}"),
                    None => format!("status {from} -> {to}"),
                };
                (level, line)
            }
            SessionEvent::PairingChallengeIssued { .. } => {
                (LogLevel::Info, "pairing challenge issued".to_string())
            }
            SessionEvent::MessageDispatched { message_id, .. } => {
                (LogLevel::Debug, format!("message {message_id} sent"))
            }
            SessionEvent::MessageRequeued {
                message_id,
                retry_count,
                error,
                ..
            } => (
                LogLevel::Warning,
                format!("message {message_id} requeued (retry {retry_count}): {error}"),
            ),
            SessionEvent::MessageFailed {
                message_id, error, ..
            } => (
                LogLevel::Error,
                format!("message {message_id} failed permanently: {error}"),
            ),
            SessionEvent::MessageDropped {
                message_id,
                exhausted,
                ..
            } => {
                let level = if *exhausted {
                    LogLevel::Error
                } else {
                    LogLevel::Warning
                };
                (level, format!("queue full; dropped oldest message {message_id}"))
            }
            SessionEvent::HealthCheckFailed {
                consecutive_failures,
                ..
            } => (
                LogLevel::Warning,
                format!("health check failed ({consecutive_failures} consecutive)"),
            ),
            SessionEvent::Removed { .. } => (LogLevel::Info, "session removed".to_string()),
        }
    }
}

/// Shared fan-out point for lifecycle events.  Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    log: Arc<RwLock<LogBuffer>>,
}

impl EventBus {
    pub fn new(log_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx,
            log: Arc::new(RwLock::new(LogBuffer::new(log_capacity))),
        }
    }

    pub async fn publish(&self, event: SessionEvent) {
        let (level, line) = event.describe();
        self.record(level, Some(event.session_id().clone()), line).await;
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Appends a free-form entry to the session log and mirrors it to tracing.
    pub async fn record(&self, level: LogLevel, session_id: Option<SessionId>, message: impl Into<String>) {
        let entry = LogEntry::new(level, session_id, message);
        trace_entry(&entry);
        self.log.write().await.push(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub async fn logs(&self, session_id: Option<&SessionId>, limit: usize) -> Vec<LogEntry> {
        self.log.read().await.query(session_id, limit)
    }

    /// Drops every log entry of a deleted session.
    pub async fn forget(&self, session_id: &SessionId) {
        self.log.write().await.forget(session_id);
    }
}

fn trace_entry(entry: &LogEntry) {
    let session = entry.session_id.as_ref().map(SessionId::as_str).unwrap_or("-");
    match entry.level {
        LogLevel::Debug => debug!(session_id = session, "{}", entry.message),
        LogLevel::Info | LogLevel::Success => info!(session_id = session, "{}", entry.message),
        LogLevel::Warning => warn!(session_id = session, "{}", entry.message),
        LogLevel::Error => error!(session_id = session, "{}", entry.message),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
