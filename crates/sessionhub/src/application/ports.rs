//! Collaborator ports.
//!
//! The manager never speaks the external network's wire protocol, never
//! interprets credential material, and never chooses a storage format.  Each
//! of those concerns sits behind one of the traits below and is injected at
//! construction time:
//!
//! | Port               | Production adapter                      | Test adapter               |
//! |--------------------|-----------------------------------------|----------------------------|
//! | [`TransportDriver`]| `BridgeTransport`, `NullTransport`      | `MockTransport`            |
//! | [`CredentialStore`]| `FileCredentialStore`                   | `InMemoryCredentialStore`  |
//! | [`SnapshotStore`]  | `JsonSnapshotStore`                     | `InMemorySnapshotStore`    |
//!
//! # Transport contract
//!
//! [`TransportDriver::connect`] either refuses with
//! [`ConnectOutcome::PairingRequired`] (no credentials and pairing not
//! allowed) or returns an established [`TransportConnection`]: a
//! [`TransportLink`] for outbound calls plus a stream of [`TransportEvent`]s.
//! Establishing the link is *not* the same as being live; the supervisor
//! waits for [`TransportEvent::Connected`] before it sends anything.  When
//! the event stream ends the supervisor treats it as a recoverable
//! disconnect.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sessionhub_core::{
    CredentialBlob, CredentialsRef, Destination, DisconnectReason, PairingChallenge, Payload,
    SessionId, SessionSnapshot,
};
use thiserror::Error;
use tokio::sync::mpsc;

// ── Transport ─────────────────────────────────────────────────────────────────

/// Failure reported by a transport driver or link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The link is gone; the message was not handed to the network.
    #[error("transport not connected")]
    NotConnected,

    #[error("transport operation timed out")]
    Timeout,

    /// Credentials were rejected.  Terminal for the session.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The network refused this particular operation.
    #[error("rejected by transport: {0}")]
    Rejected(String),

    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Asynchronous notifications from an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The session is live and can send.
    Connected,
    /// The connection closed or failed.
    Disconnected(DisconnectReason),
    /// A (possibly refreshed) pairing artifact to display to the operator.
    PairingChallenge(PairingChallenge),
    /// Pairing finished; the blob must be persisted by the credential store.
    CredentialsReady(CredentialBlob),
}

/// Outbound half of an established connection.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Hands one payload to the network.
    async fn send(&self, destination: &Destination, payload: &Payload) -> Result<(), TransportError>;

    /// Lightweight liveness check.  `Ok(())` means the link answered.
    async fn probe(&self) -> Result<(), TransportError>;

    /// Asks the network to revoke this device's credentials.
    async fn logout(&self) -> Result<(), TransportError>;

    /// Releases the connection.  Idempotent.
    async fn close(&self);
}

/// A live link plus its event stream.
pub struct TransportConnection {
    pub link: Arc<dyn TransportLink>,
    pub events: mpsc::Receiver<TransportEvent>,
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum ConnectOutcome {
    Established(TransportConnection),
    /// No usable credentials and pairing was not requested.
    PairingRequired,
}

/// Opens connections to the external network.
#[async_trait]
pub trait TransportDriver: Send + Sync {
    /// Opens a connection for `session_id`.
    ///
    /// `allow_pairing` is `true` only when an operator explicitly asked to
    /// pair; without it, a session lacking credentials must get
    /// [`ConnectOutcome::PairingRequired`] rather than a pairing challenge.
    async fn connect(
        &self,
        session_id: &SessionId,
        credentials: Option<CredentialsRef>,
        allow_pairing: bool,
    ) -> Result<ConnectOutcome, TransportError>;
}

// ── Credential store ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CredentialStoreError {
    #[error("I/O error accessing credentials at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential backend unavailable: {0}")]
    Unavailable(String),
}

/// Persists opaque pairing credentials, one blob per session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, session_id: &SessionId) -> Result<Option<CredentialsRef>, CredentialStoreError>;

    async fn save(&self, session_id: &SessionId, blob: &CredentialBlob) -> Result<(), CredentialStoreError>;

    /// Removes stored credentials.  Deleting an absent entry is not an error.
    async fn delete(&self, session_id: &SessionId) -> Result<(), CredentialStoreError>;
}

// ── Snapshot store ────────────────────────────────────────────────────────────

/// The timestamped document written by the state persister.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub written_at: DateTime<Utc>,
    pub sessions: Vec<SessionSnapshot>,
}

#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    #[error("I/O error accessing snapshot at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse snapshot at {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("snapshot backend unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for operational snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn write(&self, document: &SnapshotDocument) -> Result<(), SnapshotStoreError>;

    async fn read(&self) -> Result<Option<SnapshotDocument>, SnapshotStoreError>;
}
