//! # sessionhub-core
//!
//! Shared library for SessionHub containing the session data model, the
//! outbound dispatch primitives, and the supervision policies that decide
//! when a dropped connection is retried.
//!
//! This crate performs no I/O.  It has no async runtime, no sockets, and no
//! file system access, so every rule in here can be unit-tested with plain
//! `#[test]` functions and a hand-picked `Instant`.
//!
//! # Architecture overview
//!
//! SessionHub keeps many independent, long-lived connections ("sessions") to
//! an external messaging network.  Each session is paired once through a
//! device-pairing handshake and is then used to deliver outbound
//! notifications.  The manager crate (`sessionhub`) owns the actors and the
//! collaborators; this crate supplies the pieces they are built from:
//!
//! - **`domain`** – What a session *is*: its id, lifecycle state, statistics,
//!   health record, queued messages, payloads, the status view returned to
//!   callers, the bounded operational log, and [`SessionPolicy`] (every
//!   tunable with its default).
//!
//! - **`dispatch`** – How outbound sends are throttled and buffered: a
//!   sliding-window [`RateLimiter`] and a bounded drop-oldest
//!   [`MessageQueue`].
//!
//! - **`supervision`** – How failures are handled: the exponential
//!   [`BackoffScheduler`] with its single pending deadline, and the
//!   [`HealthTracker`] that turns probe results into a reconnect verdict.

pub mod dispatch;
pub mod domain;
pub mod supervision;

pub use dispatch::queue::{EnqueueOutcome, MessageQueue};
pub use dispatch::rate_limiter::RateLimiter;
pub use domain::config::SessionPolicy;
pub use domain::destination::{normalize_destination, Destination, DestinationError};
pub use domain::log::{LogBuffer, LogEntry, LogLevel};
pub use domain::message::{MediaPayload, MediaSource, Payload, QueuedMessage, RejectReason, SendOutcome};
pub use domain::session::{
    CredentialBlob, CredentialsRef, DisconnectKind, DisconnectReason, HealthCheck, PairingChallenge,
    SessionId, SessionSnapshot, SessionState, SessionStats, SessionStatus,
};
pub use supervision::backoff::{BackoffExhausted, BackoffScheduler};
pub use supervision::health::{HealthTracker, HealthVerdict};
