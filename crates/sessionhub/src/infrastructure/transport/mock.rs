//! Scriptable in-memory transport for tests.
//!
//! # Why a mock transport?
//!
//! A real messaging network cannot be paired, disconnected, or made to fail
//! on demand from test code.  `MockTransport` stands in for it:
//!
//! - Every `connect` call and every outbound send is recorded so assertions
//!   can check exactly what the supervisor did and in what order.
//! - Switches (`set_fail_connects`, `fail_next_sends`, `set_stall_sends`,
//!   `set_probe_healthy`, `set_reject_credentials`, `set_auto_connect`)
//!   inject failures.
//! - `emit`, `disconnect`, and `complete_pairing` push transport events into
//!   the most recent connection of a session, as the network would.
//!
//! # Usage in tests
//!
//! ```ignore
//! let transport = MockTransport::new();
//! let registry = SessionRegistry::new(policy, Arc::new(transport.clone()), store);
//!
//! registry.request_pairing(&id).await?;
//! transport.complete_pairing(&id, b"creds");
//! // ... wait for Connected ...
//! transport.disconnect(&id, "connection reset");
//! ```
//!
//! `MockTransport` is cheap to clone; clones share the same recorded state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sessionhub_core::{
    CredentialBlob, CredentialsRef, Destination, DisconnectReason, PairingChallenge, Payload, SessionId,
};
use tokio::sync::mpsc;

use crate::application::ports::{
    ConnectOutcome, TransportConnection, TransportDriver, TransportError, TransportEvent, TransportLink,
};

const EVENT_BUFFER: usize = 32;

/// One message accepted by a mock link.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub session_id: SessionId,
    pub destination: Destination,
    pub payload: Payload,
}

#[derive(Default)]
struct SessionRecord {
    connects: usize,
    logouts: usize,
    closes: usize,
    events: Option<mpsc::Sender<TransportEvent>>,
}

struct MockState {
    sessions: HashMap<SessionId, SessionRecord>,
    sent: Vec<SentMessage>,
    fail_connects: bool,
    reject_credentials: bool,
    auto_connect: bool,
    probe_healthy: bool,
    failing_sends: usize,
    stall_sends: bool,
    challenges_issued: u32,
}

impl MockState {
    fn session(&mut self, id: &SessionId) -> &mut SessionRecord {
        self.sessions.entry(id.clone()).or_default()
    }
}

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A transport that connects instantly with stored credentials and
    /// answers every probe.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                sessions: HashMap::new(),
                sent: Vec::new(),
                fail_connects: false,
                reject_credentials: false,
                auto_connect: true,
                probe_healthy: true,
                failing_sends: 0,
                stall_sends: false,
                challenges_issued: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock transport lock poisoned")
    }

    // ── Switches ──────────────────────────────────────────────────────────────

    /// When set, every `connect` fails with a recoverable I/O error.
    pub fn set_fail_connects(&self, fail: bool) {
        self.lock().fail_connects = fail;
    }

    /// When set, connecting with credentials fails with `TransportError::Auth`.
    pub fn set_reject_credentials(&self, reject: bool) {
        self.lock().reject_credentials = reject;
    }

    /// When cleared, a credentialed connect is established but never
    /// reports `Connected` on its own.
    pub fn set_auto_connect(&self, auto: bool) {
        self.lock().auto_connect = auto;
    }

    pub fn set_probe_healthy(&self, healthy: bool) {
        self.lock().probe_healthy = healthy;
    }

    /// The next `count` sends on any link fail with an I/O error.
    pub fn fail_next_sends(&self, count: usize) {
        self.lock().failing_sends = count;
    }

    /// When set, sends on any link never complete, like a wedged socket.
    pub fn set_stall_sends(&self, stall: bool) {
        self.lock().stall_sends = stall;
    }

    // ── Event injection ───────────────────────────────────────────────────────

    /// Pushes `event` into the session's latest connection.
    ///
    /// Returns `false` when the session never connected or its supervisor
    /// has dropped the event stream.
    pub fn emit(&self, session_id: &SessionId, event: TransportEvent) -> bool {
        let sender = self
            .lock()
            .sessions
            .get(session_id)
            .and_then(|s| s.events.clone());
        match sender {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Simulates the operator scanning the challenge: credentials arrive,
    /// then the link goes live.
    pub fn complete_pairing(&self, session_id: &SessionId, credentials: &[u8]) -> bool {
        self.emit(
            session_id,
            TransportEvent::CredentialsReady(CredentialBlob::new(credentials.to_vec())),
        ) && self.emit(session_id, TransportEvent::Connected)
    }

    /// Reports a disconnect, classified from the free-form `reason`.
    pub fn disconnect(&self, session_id: &SessionId, reason: &str) -> bool {
        self.emit(
            session_id,
            TransportEvent::Disconnected(DisconnectReason::classify(reason)),
        )
    }

    // ── Recorded calls ────────────────────────────────────────────────────────

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    /// Text bodies sent for one session, in send order.
    pub fn sent_bodies(&self, session_id: &SessionId) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .filter(|m| &m.session_id == session_id)
            .filter_map(|m| match &m.payload {
                Payload::Text { body } => Some(body.clone()),
                Payload::Media(_) => None,
            })
            .collect()
    }

    pub fn connect_count(&self, session_id: &SessionId) -> usize {
        self.lock().sessions.get(session_id).map_or(0, |s| s.connects)
    }

    pub fn logout_count(&self, session_id: &SessionId) -> usize {
        self.lock().sessions.get(session_id).map_or(0, |s| s.logouts)
    }

    pub fn close_count(&self, session_id: &SessionId) -> usize {
        self.lock().sessions.get(session_id).map_or(0, |s| s.closes)
    }
}

#[async_trait]
impl TransportDriver for MockTransport {
    async fn connect(
        &self,
        session_id: &SessionId,
        credentials: Option<CredentialsRef>,
        allow_pairing: bool,
    ) -> Result<ConnectOutcome, TransportError> {
        let mut state = self.lock();
        state.session(session_id).connects += 1;

        if state.fail_connects {
            return Err(TransportError::Io("connection refused".to_string()));
        }
        if credentials.is_some() && state.reject_credentials {
            return Err(TransportError::Auth("credentials revoked".to_string()));
        }
        if credentials.is_none() && !allow_pairing {
            return Ok(ConnectOutcome::PairingRequired);
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        if credentials.is_some() {
            if state.auto_connect {
                let _ = tx.try_send(TransportEvent::Connected);
            }
        } else {
            state.challenges_issued += 1;
            let code = format!("MOCK-{}", state.challenges_issued);
            let _ = tx.try_send(TransportEvent::PairingChallenge(PairingChallenge::new(code)));
        }
        state.session(session_id).events = Some(tx);

        let link = MockLink {
            session_id: session_id.clone(),
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        };
        Ok(ConnectOutcome::Established(TransportConnection {
            link: Arc::new(link),
            events: rx,
        }))
    }
}

struct MockLink {
    session_id: SessionId,
    state: Arc<Mutex<MockState>>,
    closed: AtomicBool,
}

impl MockLink {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock transport lock poisoned")
    }
}

#[async_trait]
impl TransportLink for MockLink {
    async fn send(&self, destination: &Destination, payload: &Payload) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let stalled = self.lock().stall_sends;
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut state = self.lock();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(TransportError::Io("send failed".to_string()));
        }
        state.sent.push(SentMessage {
            session_id: self.session_id.clone(),
            destination: destination.clone(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn probe(&self) -> Result<(), TransportError> {
        if self.lock().probe_healthy {
            Ok(())
        } else {
            Err(TransportError::Io("probe failed".to_string()))
        }
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.lock().session(&self.session_id).logouts += 1;
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.lock().session(&self.session_id).closes += 1;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> SessionId {
        SessionId::new("m1")
    }

    #[tokio::test]
    async fn test_connect_without_credentials_or_pairing_requires_pairing() {
        let transport = MockTransport::new();

        let outcome = transport.connect(&id(), None, false).await.unwrap();

        assert!(matches!(outcome, ConnectOutcome::PairingRequired));
        assert_eq!(transport.connect_count(&id()), 1);
    }

    #[tokio::test]
    async fn test_pairing_connect_issues_numbered_challenge() {
        // Arrange
        let transport = MockTransport::new();

        // Act
        let outcome = transport.connect(&id(), None, true).await.unwrap();

        // Assert
        let ConnectOutcome::Established(mut conn) = outcome else {
            panic!("expected an established connection");
        };
        match conn.events.recv().await.unwrap() {
            TransportEvent::PairingChallenge(c) => assert_eq!(c.code, "MOCK-1"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failing_sends_then_recording() {
        // Arrange
        let transport = MockTransport::new();
        let outcome = transport
            .connect(&id(), Some(CredentialsRef::from(b"c".to_vec())), false)
            .await
            .unwrap();
        let ConnectOutcome::Established(conn) = outcome else {
            panic!("expected an established connection");
        };
        transport.fail_next_sends(1);
        let dest = Destination::new_unchecked("1");

        // Act
        let first = conn.link.send(&dest, &Payload::text("a")).await;
        let second = conn.link.send(&dest, &Payload::text("b")).await;

        // Assert
        assert!(first.is_err());
        assert!(second.is_ok());
        assert_eq!(transport.sent_bodies(&id()), vec!["b"]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_sends() {
        let transport = MockTransport::new();
        let ConnectOutcome::Established(conn) = transport
            .connect(&id(), Some(CredentialsRef::from(b"c".to_vec())), false)
            .await
            .unwrap()
        else {
            panic!("expected an established connection");
        };

        conn.link.close().await;
        conn.link.close().await;

        assert_eq!(transport.close_count(&id()), 1);
        assert_eq!(
            conn.link.send(&Destination::new_unchecked("1"), &Payload::text("x")).await,
            Err(TransportError::NotConnected)
        );
    }
}
