//! Application layer of the session manager.
//!
//! # What lives here
//!
//! The *application* layer sits between the pure rules in `sessionhub_core`
//! and the adapters in `infrastructure`.  Code in this layer:
//!
//! - **Orchestrates** core types (queue, rate limiter, backoff, health
//!   tracker) into the per-session lifecycle.
//! - **Depends on ports** (the traits in [`ports`]) rather than on concrete
//!   transports or stores, so every collaborator can be swapped for a mock.
//! - **Owns the concurrency model**: one actor per session, a registry of
//!   actor handles, and a few background tasks (health probes, persistence).
//!
//! # Sub-modules
//!
//! - **`ports`**          – Traits for the transport driver, the credential
//!   store, and the snapshot store, plus the types that cross them.
//! - **`events`**         – Typed lifecycle events, their broadcast channel,
//!   and the bounded session log behind `GetLogs`.
//! - **`dispatcher`**     – Outbound message flow: admit, queue, retry, drain.
//! - **`health_monitor`** – Periodic liveness probe task for a live link.
//! - **`session`**        – The supervisor actor, its command protocol, and
//!   the cloneable handle used to talk to it.
//! - **`registry`**       – The public API: the map of session id to
//!   supervisor, with linearizable creation.
//! - **`persister`**      – Periodic snapshot and start-up reload of
//!   non-secret counters.

pub mod dispatcher;
pub mod events;
pub mod health_monitor;
pub mod persister;
pub mod ports;
pub mod registry;
pub mod session;
