//! Bridge transport: newline-delimited JSON over TCP.
//!
//! The messaging network's wire protocol is spoken by a separate bridge
//! process.  Each session opens its own TCP connection to that bridge and
//! exchanges one JSON object per line.
//!
//! # Frames
//!
//! ```text
//! manager → bridge                         bridge → manager
//! {"type":"connect", session_id,           {"type":"pairing_required"}
//!   credentials?, allow_pairing}           {"type":"pairing_challenge", code}
//! {"type":"send", id, destination,         {"type":"credentials_ready", credentials}
//!   payload}                               {"type":"connected"}
//! {"type":"probe", id}                     {"type":"disconnected", reason, terminal}
//! {"type":"logout", id}                    {"type":"ack", id, ok, error?}
//! ```
//!
//! The first frame the bridge sends after `connect` decides the outcome of
//! the connect call: `pairing_required` refuses, a terminal `disconnected`
//! is an authentication failure, anything else establishes the link and is
//! forwarded as the first event.
//!
//! `send`, `probe`, and `logout` are request/response: each carries an `id`
//! and completes when the matching `ack` arrives.  If the connection drops,
//! every outstanding request fails with `TransportError::NotConnected`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sessionhub_core::{
    CredentialBlob, CredentialsRef, Destination, DisconnectReason, PairingChallenge, Payload, SessionId,
};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::ports::{
    ConnectOutcome, TransportConnection, TransportDriver, TransportError, TransportEvent, TransportLink,
};

const EVENT_BUFFER: usize = 32;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to connect to bridge at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bridge I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode bridge frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("bridge closed the connection during the handshake")]
    HandshakeClosed,
}

impl From<BridgeError> for TransportError {
    fn from(e: BridgeError) -> Self {
        TransportError::Io(e.to_string())
    }
}

// ── Wire frames ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound {
    Connect {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        credentials: Option<Vec<u8>>,
        allow_pairing: bool,
    },
    Send {
        id: u64,
        destination: String,
        payload: Payload,
    },
    Probe {
        id: u64,
    },
    Logout {
        id: u64,
    },
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    PairingRequired,
    PairingChallenge {
        code: String,
    },
    CredentialsReady {
        credentials: Vec<u8>,
    },
    Connected,
    Disconnected {
        reason: String,
        #[serde(default)]
        terminal: bool,
    },
    Ack {
        id: u64,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

impl Inbound {
    /// The session event carried by a non-ack frame.
    fn into_event(self) -> Option<TransportEvent> {
        match self {
            Inbound::PairingChallenge { code } => {
                Some(TransportEvent::PairingChallenge(PairingChallenge::new(code)))
            }
            Inbound::CredentialsReady { credentials } => {
                Some(TransportEvent::CredentialsReady(CredentialBlob::new(credentials)))
            }
            Inbound::Connected => Some(TransportEvent::Connected),
            Inbound::Disconnected { reason, terminal } => {
                let reason = if terminal {
                    DisconnectReason::terminal(reason)
                } else {
                    DisconnectReason::recoverable(reason)
                };
                Some(TransportEvent::Disconnected(reason))
            }
            Inbound::PairingRequired | Inbound::Ack { .. } => None,
        }
    }
}

fn encode(frame: &Outbound) -> Result<Vec<u8>, BridgeError> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    Ok(line)
}

// ── Driver ────────────────────────────────────────────────────────────────────

pub struct BridgeTransport {
    addr: String,
}

impl BridgeTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl TransportDriver for BridgeTransport {
    async fn connect(
        &self,
        session_id: &SessionId,
        credentials: Option<CredentialsRef>,
        allow_pairing: bool,
    ) -> Result<ConnectOutcome, TransportError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| BridgeError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        let (read_half, mut write_half) = stream.into_split();

        let hello = encode(&Outbound::Connect {
            session_id: session_id.to_string(),
            credentials: credentials.map(|c| c.as_bytes().to_vec()),
            allow_pairing,
        })?;
        write_half.write_all(&hello).await.map_err(BridgeError::from)?;

        let mut lines = BufReader::new(read_half).lines();
        let first = loop {
            match lines.next_line().await.map_err(BridgeError::from)? {
                None => return Err(BridgeError::HandshakeClosed.into()),
                Some(line) => match parse_line(session_id, &line) {
                    Some(frame) => break frame,
                    None => continue,
                },
            }
        };

        let first_event = match first {
            Inbound::PairingRequired => return Ok(ConnectOutcome::PairingRequired),
            Inbound::Disconnected { reason, terminal: true } => return Err(TransportError::Auth(reason)),
            Inbound::Disconnected { reason, terminal: false } => return Err(TransportError::Io(reason)),
            other => other.into_event(),
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        if let Some(event) = first_event {
            let _ = events_tx.try_send(event);
        }

        let shared = Arc::new(Shared::default());
        let reader = tokio::spawn(read_frames(
            session_id.clone(),
            lines,
            Arc::clone(&shared),
            events_tx,
        ));

        debug!(session_id = %session_id, addr = %self.addr, "bridge connection established");
        Ok(ConnectOutcome::Established(TransportConnection {
            link: Arc::new(BridgeLink {
                session_id: session_id.clone(),
                writer: tokio::sync::Mutex::new(write_half),
                shared,
                next_id: AtomicU64::new(1),
                reader,
            }),
            events: events_rx,
        }))
    }
}

fn parse_line(session_id: &SessionId, line: &str) -> Option<Inbound> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "ignoring malformed bridge frame");
            None
        }
    }
}

// ── Link ──────────────────────────────────────────────────────────────────────

type AckSender = oneshot::Sender<Result<(), String>>;

/// State shared between a link and its reader task.
#[derive(Default)]
struct Shared {
    closed: AtomicBool,
    pending: Mutex<HashMap<u64, AckSender>>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, AckSender>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a pending request when its caller stops waiting.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.id);
    }
}

struct BridgeLink {
    session_id: SessionId,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl BridgeLink {
    async fn request(&self, make: impl FnOnce(u64) -> Outbound) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = encode(&make(id))?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(id, tx);
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        self.writer
            .lock()
            .await
            .write_all(&line)
            .await
            .map_err(|_| TransportError::NotConnected)?;

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(TransportError::Rejected(reason)),
            Err(_) => Err(TransportError::NotConnected),
        }
    }
}

#[async_trait]
impl TransportLink for BridgeLink {
    async fn send(&self, destination: &Destination, payload: &Payload) -> Result<(), TransportError> {
        self.request(|id| Outbound::Send {
            id,
            destination: destination.as_str().to_string(),
            payload: payload.clone(),
        })
        .await
    }

    async fn probe(&self) -> Result<(), TransportError> {
        self.request(|id| Outbound::Probe { id }).await
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.request(|id| Outbound::Logout { id }).await
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reader.abort();
        self.shared.pending().clear();
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!(session_id = %self.session_id, error = %e, "bridge shutdown failed");
        }
    }
}

impl Drop for BridgeLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Reads frames until EOF, resolving acks and forwarding everything else.
async fn read_frames(
    session_id: SessionId,
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    shared: Arc<Shared>,
    events: mpsc::Sender<TransportEvent>,
) {
    let reason = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break "bridge connection closed".to_string(),
            Err(e) => break format!("bridge read failed: {e}"),
        };
        let Some(frame) = parse_line(&session_id, &line) else {
            continue;
        };

        match frame {
            Inbound::Ack { id, ok, error } => {
                let waiter = shared.pending().remove(&id);
                if let Some(waiter) = waiter {
                    let result = if ok {
                        Ok(())
                    } else {
                        Err(error.unwrap_or_else(|| "rejected".to_string()))
                    };
                    let _ = waiter.send(result);
                }
            }
            Inbound::PairingRequired => {
                debug!(session_id = %session_id, "unexpected pairing_required after handshake");
            }
            other => {
                if let Some(event) = other.into_event() {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
        }
    };

    shared.closed.store(true, Ordering::SeqCst);
    shared.pending().clear();
    debug!(session_id = %session_id, %reason, "bridge reader exiting");
    let _ = events
        .send(TransportEvent::Disconnected(DisconnectReason::recoverable(reason)))
        .await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
