//! Bounded operational log served to collaborators through `GetLogs`.
//!
//! This is not a replacement for `tracing`: it is a small, queryable history
//! of lifecycle facts (state changes, pairing, drops) that a dashboard can
//! show without access to the process logs.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, session_id: Option<SessionId>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            session_id,
            message: message.into(),
        }
    }
}

/// Ring buffer of [`LogEntry`]; the oldest entry is evicted at capacity.
#[derive(Debug)]
pub struct LogBuffer {
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns up to `limit` most recent entries, oldest first.
    ///
    /// With `session = Some(id)` only entries tagged with that session are
    /// considered; with `None` every entry is.
    pub fn query(&self, session: Option<&SessionId>, limit: usize) -> Vec<LogEntry> {
        let mut picked: Vec<LogEntry> = self
            .entries
            .iter()
            .rev()
            .filter(|e| session.map_or(true, |id| e.session_id.as_ref() == Some(id)))
            .take(limit)
            .cloned()
            .collect();
        picked.reverse();
        picked
    }

    /// Drops every entry tagged with `session`.
    pub fn forget(&mut self, session: &SessionId) {
        self.entries.retain(|e| e.session_id.as_ref() != Some(session));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
