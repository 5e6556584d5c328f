//! Supervision policies: when to retry and when to give up.
//!
//! - **`backoff`** – Exponential reconnect delays with an attempt cap and a
//!   single pending deadline per session.
//! - **`health`** – Consecutive-failure counting for liveness probes.

pub mod backoff;
pub mod health;
