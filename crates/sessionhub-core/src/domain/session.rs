//! Session identity, lifecycle state, and the caller-facing status view.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──► Connecting ──► WaitingPairing ──► Authenticated ──► Connected
//!                       ▲  │                                               │
//!                       │  └───────────── (stored credentials) ───────────►│
//!                       │                                                  ▼
//!                  Reconnecting ◄──────── (recoverable) ─────────── Disconnected
//!                                                                   │        │
//!                                          (attempts exhausted) ◄───┘        └──► (terminal)
//!                                                 Failed                          LoggedOut
//! ```
//!
//! `Failed` and `LoggedOut` are terminal: nothing retries automatically from
//! either of them.  `Failed` sessions stay registered until an operator calls
//! `Reset` or `Delete`; `LoggedOut` sessions are removed from the registry.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable, caller-supplied key identifying one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle state of a session, owned by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, no transport handle yet.  Waiting for credentials or an
    /// explicit pairing request.
    Uninitialized,
    /// A transport handshake is in progress.
    Connecting,
    /// The transport issued a pairing challenge; waiting for the device to
    /// accept it.
    WaitingPairing,
    /// Credential exchange finished; waiting for the transport to confirm the
    /// session is live.
    Authenticated,
    /// Live and able to send.
    Connected,
    /// The transport reported closure or an error.
    Disconnected,
    /// A reconnect is scheduled behind the backoff timer.
    Reconnecting,
    /// Reconnect attempts exhausted, or credentials rejected.  Terminal.
    Failed,
    /// The remote side logged the device out.  Terminal.
    LoggedOut,
}

impl SessionState {
    /// Returns `true` for states from which no automatic recovery happens.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::LoggedOut)
    }

    pub fn is_connected(self) -> bool {
        self == SessionState::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Connecting => "connecting",
            SessionState::WaitingPairing => "waiting_pairing",
            SessionState::Authenticated => "authenticated",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Failed => "failed",
            SessionState::LoggedOut => "logged_out",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the most recent liveness probes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub last_check_at: Option<DateTime<Utc>>,
    pub is_healthy: bool,
    pub consecutive_failures: u32,
}

/// Per-session delivery counters.  These survive restarts via the state
/// snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub messages_queued: u64,
    pub reconnect_count: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Opaque credential material produced by a completed pairing.
///
/// The manager never looks inside; it only hands the bytes to the
/// credential store.  `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBlob(Vec<u8>);

impl CredentialBlob {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for CredentialBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialBlob(<{} bytes>)", self.0.len())
    }
}

/// Handle to previously stored credentials, as returned by the credential
/// store and passed back to the transport driver on connect.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialsRef(Arc<[u8]>);

impl CredentialsRef {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<CredentialBlob> for CredentialsRef {
    fn from(blob: CredentialBlob) -> Self {
        Self(Arc::from(blob.into_bytes()))
    }
}

impl From<Vec<u8>> for CredentialsRef {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl fmt::Debug for CredentialsRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialsRef(<{} bytes>)", self.0.len())
    }
}

/// A short-lived pairing artifact issued by the transport, to be displayed
/// to the operator by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingChallenge {
    pub code: String,
    pub issued_at: DateTime<Utc>,
}

impl PairingChallenge {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            issued_at: Utc::now(),
        }
    }
}

/// Whether a disconnect should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectKind {
    /// Network failure or timeout; retried with backoff.
    Recoverable,
    /// Explicit logout or revoked credentials; never retried.
    Terminal,
}

/// A classified disconnect reported by the transport (or synthesised by the
/// health monitor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectReason {
    pub kind: DisconnectKind,
    pub detail: String,
}

/// Substrings that mark a free-form disconnect detail as terminal.
const TERMINAL_MARKERS: &[&str] = &["logged out", "logout", "revoked", "unauthorized", "401"];

impl DisconnectReason {
    pub fn recoverable(detail: impl Into<String>) -> Self {
        Self {
            kind: DisconnectKind::Recoverable,
            detail: detail.into(),
        }
    }

    pub fn terminal(detail: impl Into<String>) -> Self {
        Self {
            kind: DisconnectKind::Terminal,
            detail: detail.into(),
        }
    }

    /// Classifies a free-form reason string.
    ///
    /// Anything mentioning a logout or a credential rejection is terminal;
    /// everything else (timeouts, resets, stream errors) is recoverable.
    pub fn classify(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let lowered = detail.to_ascii_lowercase();
        if TERMINAL_MARKERS.iter().any(|m| lowered.contains(m)) {
            Self::terminal(detail)
        } else {
            Self::recoverable(detail)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == DisconnectKind::Terminal
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DisconnectKind::Recoverable => write!(f, "{} (recoverable)", self.detail),
            DisconnectKind::Terminal => write!(f, "{} (terminal)", self.detail),
        }
    }
}

/// Point-in-time view of a session, returned by `GetStatus` / `ListAll`.
///
/// This is a plain serializable copy of the supervisor's state; holding one
/// does not keep anything alive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub id: SessionId,
    pub state: SessionState,
    pub is_ready: bool,
    pub is_connected: bool,
    /// Outstanding pairing code while the session is `WaitingPairing`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    pub last_reconnect_attempt: Option<DateTime<Utc>>,
    pub queue_size: usize,
    /// Milliseconds since `connected_at`, zero when not connected.
    pub uptime_ms: u64,
    pub health: HealthCheck,
    pub stats: SessionStats,
}

/// Non-secret operational state persisted for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub stats: SessionStats,
    pub reconnect_attempts: u32,
    pub last_reconnect_attempt: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
