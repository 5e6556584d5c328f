//! Outbound dispatch primitives.
//!
//! - **`rate_limiter`** – Sliding-window send counter.  A send is allowed only
//!   while fewer than `max` sends were recorded inside the trailing window.
//! - **`queue`** – Bounded FIFO of [`QueuedMessage`](crate::QueuedMessage)s
//!   with a drop-oldest overflow policy.
//!
//! Both take the current time as an argument instead of reading a clock, so
//! the supervisor can feed them the runtime's (possibly paused) clock.

pub mod queue;
pub mod rate_limiter;
