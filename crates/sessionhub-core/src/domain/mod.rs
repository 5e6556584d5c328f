//! Domain layer: the session data model and its supporting value types.
//!
//! Everything here is plain data plus the small amount of logic that belongs
//! to the data itself (state classification, destination normalisation, the
//! log ring buffer).  There is no I/O and no async code in this module tree.
//!
//! # Sub-modules
//!
//! - **`session`** – [`SessionId`](session::SessionId), the lifecycle
//!   [`SessionState`](session::SessionState), statistics, the health record,
//!   pairing/credential handles, disconnect classification, and the
//!   caller-facing [`SessionStatus`](session::SessionStatus) view.
//! - **`message`** – Payloads, queued messages, and send outcomes.
//! - **`destination`** – Phone-style destination normalisation.
//! - **`config`** – [`SessionPolicy`](config::SessionPolicy), the runtime
//!   tunables shared by every supervisor.
//! - **`log`** – The bounded operational log served by `GetLogs`.

pub mod config;
pub mod destination;
pub mod log;
pub mod message;
pub mod session;
