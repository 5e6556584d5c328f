//! Handle for communicating with a session supervisor.
//!
//! `SupervisorHandle` is a thin wrapper around an `mpsc::Sender<SessionCommand>`.
//! It is cheap to clone; every method is a request/response round trip
//! through the supervisor's command channel.

use sessionhub_core::{
    Destination, PairingChallenge, Payload, SendOutcome, SessionId, SessionSnapshot, SessionStatus,
};
use tokio::sync::{mpsc, oneshot};

use super::command::{PairingError, SessionCommand, SupervisorError};

#[derive(Clone)]
pub struct SupervisorHandle {
    id: SessionId,
    tx: mpsc::Sender<SessionCommand>,
}

impl SupervisorHandle {
    pub(crate) fn new(id: SessionId, tx: mpsc::Sender<SessionCommand>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns `true` once the supervisor has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SupervisorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SupervisorError::ActorShutdown)?;
        reply_rx.await.map_err(|_| SupervisorError::ActorShutdown)
    }

    pub async fn status(&self) -> Result<SessionStatus, SupervisorError> {
        self.request(|reply| SessionCommand::GetStatus { reply }).await
    }

    pub async fn send(&self, destination: Destination, payload: Payload) -> Result<SendOutcome, SupervisorError> {
        self.request(|reply| SessionCommand::Send {
            destination,
            payload,
            reply,
        })
        .await
    }

    /// Waits until the transport issues a challenge (or pairing fails).
    ///
    /// There is no timeout here; callers bound the wait.
    pub async fn request_pairing(&self) -> Result<PairingChallenge, PairingError> {
        self.request(|reply| SessionCommand::RequestPairing { reply })
            .await
            .map_err(|_| PairingError::ShuttingDown)?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SupervisorError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// Stops the supervisor and waits for it to acknowledge.
    pub async fn shutdown(&self, logout: bool) -> Result<(), SupervisorError> {
        self.request(|reply| SessionCommand::Shutdown { logout, reply }).await
    }
}
