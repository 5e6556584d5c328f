//! Supervisor command protocol.

use std::time::Duration;

use sessionhub_core::{Destination, PairingChallenge, Payload, SendOutcome, SessionSnapshot, SessionStatus};
use thiserror::Error;
use tokio::sync::oneshot;

/// Commands accepted by a session supervisor.
pub enum SessionCommand {
    GetStatus {
        reply: oneshot::Sender<SessionStatus>,
    },
    Send {
        destination: Destination,
        payload: Payload,
        reply: oneshot::Sender<SendOutcome>,
    },
    RequestPairing {
        reply: oneshot::Sender<Result<PairingChallenge, PairingError>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    /// Tears the session down and ends the actor.  With `logout` the
    /// transport is first asked to revoke the device.
    Shutdown {
        logout: bool,
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("session supervisor has shut down")]
    ActorShutdown,
}

/// Why `RequestPairing` did not produce a challenge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PairingError {
    #[error("session is already paired")]
    AlreadyPaired,

    #[error("session has failed; delete it before pairing again")]
    SessionFailed,

    #[error("no pairing challenge within {0:?}")]
    Timeout(Duration),

    #[error("pairing aborted: {0}")]
    Transport(String),

    #[error("session is shutting down")]
    ShuttingDown,
}
