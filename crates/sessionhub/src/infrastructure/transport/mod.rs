//! Transport drivers.
//!
//! The driver is chosen once at start-up from configuration:
//!
//! - [`TransportKind::Null`]   – [`NullTransport`], a self-contained
//!   simulation.  Pairing completes on its own and sends are only logged.
//!   Useful for smoke-testing the manager without a network.
//! - [`TransportKind::Bridge`] – [`bridge::BridgeTransport`], which talks to
//!   an external protocol bridge process over TCP.
//!
//! `mock::MockTransport` is the scriptable test double.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sessionhub_core::{
    CredentialBlob, CredentialsRef, Destination, PairingChallenge, Payload, SessionId,
};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::application::ports::{
    ConnectOutcome, TransportConnection, TransportDriver, TransportError, TransportEvent, TransportLink,
};

pub mod bridge;
pub mod mock;

/// Which driver the binary starts with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Null,
    Bridge,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Null => f.write_str("null"),
            TransportKind::Bridge => f.write_str("bridge"),
        }
    }
}

/// Builds the driver selected by `kind`.  `bridge_addr` is only used by the
/// bridge driver.
pub fn build_driver(kind: TransportKind, bridge_addr: &str) -> Arc<dyn TransportDriver> {
    match kind {
        TransportKind::Null => Arc::new(NullTransport),
        TransportKind::Bridge => Arc::new(bridge::BridgeTransport::new(bridge_addr)),
    }
}

// ── Null transport ────────────────────────────────────────────────────────────

/// Transport that never leaves the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

#[async_trait]
impl TransportDriver for NullTransport {
    async fn connect(
        &self,
        session_id: &SessionId,
        credentials: Option<CredentialsRef>,
        allow_pairing: bool,
    ) -> Result<ConnectOutcome, TransportError> {
        if credentials.is_none() && !allow_pairing {
            return Ok(ConnectOutcome::PairingRequired);
        }

        let (tx, rx) = mpsc::channel(4);
        if credentials.is_none() {
            let code = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
            let blob = CredentialBlob::new(format!("null:{session_id}").into_bytes());
            let _ = tx.try_send(TransportEvent::PairingChallenge(PairingChallenge::new(code)));
            let _ = tx.try_send(TransportEvent::CredentialsReady(blob));
        }
        let _ = tx.try_send(TransportEvent::Connected);
        // Keep the sender alive inside the link so the event stream stays open.
        let link = NullLink {
            session_id: session_id.clone(),
            _events: tx,
        };
        Ok(ConnectOutcome::Established(TransportConnection {
            link: Arc::new(link),
            events: rx,
        }))
    }
}

struct NullLink {
    session_id: SessionId,
    _events: mpsc::Sender<TransportEvent>,
}

#[async_trait]
impl TransportLink for NullLink {
    async fn send(&self, destination: &Destination, payload: &Payload) -> Result<(), TransportError> {
        debug!(
            session_id = %self.session_id,
            destination = destination.as_str(),
            kind = payload.kind(),
            "null transport: message discarded"
        );
        Ok(())
    }

    async fn probe(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn logout(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self) {}
}

// ── Tests ─────────────────────────────────────────────────────────────────────
