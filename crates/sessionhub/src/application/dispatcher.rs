//! MessageDispatcher: the outbound path of one session.
//!
//! Owned by the session's supervisor, so it needs no locking.  It combines
//! the core [`MessageQueue`] and [`RateLimiter`] with the delivery counters
//! in [`SessionStats`].
//!
//! # Admission
//!
//! A new message is handed to the transport immediately only when all three
//! hold: the session is `Connected`, the queue is empty, and the rate limiter
//! grants a slot.  Anything else appends to the queue.  Requiring an empty
//! queue keeps per-session FIFO while a drain is in progress.
//!
//! # Draining
//!
//! The supervisor calls [`MessageDispatcher::schedule_drain`] whenever there
//! may be work (on connect, or after queueing while connected) and runs one
//! drain step each time [`MessageDispatcher::next_drain_at`] comes due.  One
//! step sends at most one message; steps are `drain_interval` apart, and a
//! step that finds the rate window exhausted reschedules itself for when the
//! oldest slot frees up.
//!
//! # Delivery
//!
//! [`MessageDispatcher::deliver`] returns an owned future so the supervisor
//! can run the send on its own task and keep answering commands meanwhile.
//! The supervisor keeps at most one delivery in flight, which preserves FIFO.
//!
//! # Failures
//!
//! A failed send goes back to the *tail* with `retry_count + 1` while
//! retries remain; once they are used up the message counts towards
//! `messages_failed` and is dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sessionhub_core::{
    EnqueueOutcome, MessageQueue, QueuedMessage, RateLimiter, SessionPolicy, SessionSnapshot,
    SessionStats,
};
use tokio::time::{timeout, Instant};

use super::ports::{TransportError, TransportLink};

/// Whether a new message may go out right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    SendNow,
    Enqueue,
}

/// What happened to a message whose delivery failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Back in the queue, at the tail.
    Requeued { retry_count: u32 },
    /// Retries exhausted; counted as failed.
    Abandoned,
}

pub struct MessageDispatcher {
    queue: MessageQueue,
    limiter: RateLimiter,
    stats: SessionStats,
    drain_interval: Duration,
    send_timeout: Duration,
    next_drain_at: Option<Instant>,
}

impl MessageDispatcher {
    pub fn new(policy: &SessionPolicy) -> Self {
        Self {
            queue: MessageQueue::new(policy.message_queue_max_size, policy.max_send_retries),
            limiter: RateLimiter::new(policy.rate_limit_max_messages, policy.rate_limit_window),
            stats: SessionStats::default(),
            drain_interval: policy.drain_interval,
            send_timeout: policy.send_timeout,
            next_drain_at: None,
        }
    }

    /// Seeds counters from a persisted snapshot.
    pub fn restore(&mut self, snapshot: &SessionSnapshot) {
        self.stats = snapshot.stats.clone();
    }

    /// Decides whether a new message goes out now, reserving a rate slot if so.
    pub fn admit(&mut self, connected: bool, now: Instant) -> Admission {
        if connected && self.queue.is_empty() && self.limiter.try_acquire(now.into_std()) {
            Admission::SendNow
        } else {
            Admission::Enqueue
        }
    }

    /// Appends a new message at the tail, counting it as queued.
    pub fn enqueue(&mut self, msg: QueuedMessage) -> EnqueueOutcome {
        self.stats.messages_queued += 1;
        self.push(msg)
    }

    fn push(&mut self, msg: QueuedMessage) -> EnqueueOutcome {
        let outcome = self.queue.push_back(msg);
        if let EnqueueOutcome::DroppedOldest { exhausted: true, .. } = outcome {
            self.stats.messages_failed += 1;
        }
        outcome
    }

    /// Sends one message over `link`, bounded by the send timeout.
    pub fn deliver(
        &self,
        link: Arc<dyn TransportLink>,
        msg: &QueuedMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send + 'static {
        let limit = self.send_timeout;
        let destination = msg.destination.clone();
        let payload = msg.payload.clone();
        async move {
            match timeout(limit, link.send(&destination, &payload)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            }
        }
    }

    pub fn record_sent(&mut self) {
        self.stats.messages_sent += 1;
        self.stats.last_message_at = Some(Utc::now());
    }

    /// Puts a failed message back at the tail, or abandons it.
    ///
    /// The second value reports an entry displaced by the requeue when the
    /// queue was already full.
    pub fn retry_or_abandon(&mut self, mut msg: QueuedMessage) -> (RetryOutcome, Option<EnqueueOutcome>) {
        if !self.queue.can_retry(&msg) {
            self.stats.messages_failed += 1;
            return (RetryOutcome::Abandoned, None);
        }
        msg.retry_count += 1;
        let retry_count = msg.retry_count;
        let pushed = self.push(msg);
        let displaced = matches!(pushed, EnqueueOutcome::DroppedOldest { .. }).then_some(pushed);
        (RetryOutcome::Requeued { retry_count }, displaced)
    }

    /// Arms the drain timer to fire at `now` if there is queued work and no
    /// step is already pending.
    pub fn schedule_drain(&mut self, now: Instant) {
        if !self.queue.is_empty() && self.next_drain_at.is_none() {
            self.next_drain_at = Some(now);
        }
    }

    pub fn cancel_drain(&mut self) {
        self.next_drain_at = None;
    }

    pub fn next_drain_at(&self) -> Option<Instant> {
        self.next_drain_at
    }

    /// Takes the head of the queue for one drain step.
    ///
    /// Returns `None` (and re-arms the timer for when the rate window frees
    /// up) if no slot is available.
    pub fn begin_drain_step(&mut self, now: Instant) -> Option<QueuedMessage> {
        self.next_drain_at = None;
        if self.queue.is_empty() {
            return None;
        }
        let std_now = now.into_std();
        if !self.limiter.try_acquire(std_now) {
            let wait = self.limiter.next_available_in(std_now);
            self.next_drain_at = Some(now + wait);
            return None;
        }
        self.queue.pop_front()
    }

    /// Arms the next drain step one `drain_interval` after `now`.
    pub fn finish_drain_step(&mut self, now: Instant) {
        if !self.queue.is_empty() {
            self.next_drain_at = Some(now + self.drain_interval);
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn record_reconnect(&mut self) {
        self.stats.reconnect_count += 1;
    }

    /// Drops every queued message, returning how many there were.
    pub fn discard_queue(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        self.next_drain_at = None;
        n
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
