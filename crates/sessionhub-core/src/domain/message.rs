//! Outbound payloads, queued messages, and the result of a send request.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::destination::Destination;

/// Where the bytes of a media payload come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSource {
    /// Inline content.
    Bytes(Vec<u8>),
    /// Content the transport fetches itself.
    Url(String),
}

/// A media attachment with an optional caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub mime_type: String,
    pub source: MediaSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// The unit handed to the transport driver.  The manager never inspects it
/// beyond logging its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Text { body: String },
    Media(MediaPayload),
}

impl Payload {
    pub fn text(body: impl Into<String>) -> Self {
        Payload::Text { body: body.into() }
    }

    /// Short label for logs; never includes the content.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text { .. } => "text",
            Payload::Media(_) => "media",
        }
    }
}

/// A message waiting in a session's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub destination: Destination,
    pub payload: Payload,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl QueuedMessage {
    pub fn new(destination: Destination, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            destination,
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }
}

/// Why a send request was refused outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    /// No session with that id has been initialised.
    NotInitialized,
    /// The session is in the terminal `Failed` state.
    SessionFailed,
    /// The destination normalised to nothing usable.
    InvalidDestination(String),
    /// The session is shutting down.
    ShuttingDown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotInitialized => f.write_str("session not initialized"),
            RejectReason::SessionFailed => {
                f.write_str("session failed; delete it and pair again")
            }
            RejectReason::InvalidDestination(d) => write!(f, "invalid destination: {d}"),
            RejectReason::ShuttingDown => f.write_str("session is shutting down"),
        }
    }
}

/// Result of `SendMessage`.  Capacity pressure never surfaces as an error:
/// it degrades to `Queued`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    Sent,
    Queued,
    Rejected { reason: RejectReason },
}

impl SendOutcome {
    pub fn rejected(reason: RejectReason) -> Self {
        SendOutcome::Rejected { reason }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, SendOutcome::Rejected { .. })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
