//! Bounded per-session outbound queue.
//!
//! # Overflow policy
//!
//! The queue never grows past its capacity and never refuses a new message.
//! When full, the oldest entry is dropped to make room.  Whether that drop
//! counts as a delivery failure depends on the dropped entry: one that had
//! already used up its retries is reported as `exhausted` (the supervisor
//! counts it in `messages_failed`); a fresh one is a silent capacity
//! trade-off.

use std::collections::VecDeque;

use crate::domain::message::QueuedMessage;

/// What happened when a message was appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Appended,
    DroppedOldest {
        dropped: QueuedMessage,
        /// `true` when the dropped entry had no retries left.
        exhausted: bool,
    },
}

#[derive(Debug, Clone)]
pub struct MessageQueue {
    capacity: usize,
    max_retries: u32,
    items: VecDeque<QueuedMessage>,
}

impl MessageQueue {
    /// `capacity` must be non-zero; configuration loading rejects zero.
    pub fn new(capacity: usize, max_retries: u32) -> Self {
        Self {
            capacity,
            max_retries,
            items: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Appends `msg` at the tail, dropping the head first if the queue is full.
    pub fn push_back(&mut self, msg: QueuedMessage) -> EnqueueOutcome {
        let outcome = if self.items.len() >= self.capacity {
            match self.items.pop_front() {
                Some(dropped) => {
                    let exhausted = dropped.retry_count >= self.max_retries;
                    EnqueueOutcome::DroppedOldest { dropped, exhausted }
                }
                None => EnqueueOutcome::Appended,
            }
        } else {
            EnqueueOutcome::Appended
        };
        self.items.push_back(msg);
        outcome
    }

    pub fn pop_front(&mut self) -> Option<QueuedMessage> {
        self.items.pop_front()
    }

    /// Returns `true` if `msg` may be retried once more.
    pub fn can_retry(&self, msg: &QueuedMessage) -> bool {
        msg.retry_count < self.max_retries
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::destination::Destination;
    use crate::domain::message::Payload;

    fn msg(body: &str) -> QueuedMessage {
        QueuedMessage::new(Destination::new_unchecked("25800"), Payload::text(body))
    }

    fn body(m: &QueuedMessage) -> &str {
        match &m.payload {
            Payload::Text { body } => body,
            Payload::Media(_) => "<media>",
        }
    }

    #[test]
    fn test_push_within_capacity_appends() {
        let mut q = MessageQueue::new(3, 3);
        assert_eq!(q.push_back(msg("a")), EnqueueOutcome::Appended);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_overflow_drops_exactly_the_oldest() {
        // Arrange: fill to capacity 1000
        let mut q = MessageQueue::new(1000, 3);
        for i in 0..1000 {
            q.push_back(msg(&format!("m{i}")));
        }

        // Act: the 1001st message
        let outcome = q.push_back(msg("m1000"));

        // Assert
        match outcome {
            EnqueueOutcome::DroppedOldest { dropped, exhausted } => {
                assert_eq!(body(&dropped), "m0");
                assert!(!exhausted, "fresh message drop is a silent trade-off");
            }
            other => panic!("expected a drop, got {other:?}"),
        }
        assert_eq!(q.len(), 1000);
        let drained: Vec<_> = std::iter::from_fn(|| q.pop_front()).collect();
        assert_eq!(drained.first().map(body), Some("m1"));
        assert_eq!(drained.last().map(body), Some("m1000"));
    }

    #[test]
    fn test_overflow_reports_exhausted_entry() {
        let mut q = MessageQueue::new(1, 3);
        let mut worn = msg("worn");
        worn.retry_count = 3;
        q.push_back(worn);

        let outcome = q.push_back(msg("new"));

        assert!(matches!(outcome, EnqueueOutcome::DroppedOldest { exhausted: true, .. }));
    }

    #[test]
    fn test_pop_front_is_fifo() {
        let mut q = MessageQueue::new(10, 3);
        for b in ["A", "B", "C"] {
            q.push_back(msg(b));
        }

        let order: Vec<_> = std::iter::from_fn(|| q.pop_front()).map(|m| body(&m).to_string()).collect();

        assert_eq!(order, vec!["A", "B", "C"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_can_retry_respects_limit() {
        let q = MessageQueue::new(10, 3);
        let mut m = msg("x");
        m.retry_count = 2;
        assert!(q.can_retry(&m));
        m.retry_count = 3;
        assert!(!q.can_retry(&m));
    }
}
