//! Per-session supervision.
//!
//! Each session is owned by exactly one [`SessionSupervisor`] actor, the sole
//! mutator of its state.  Everything else talks to it through a cloneable
//! [`SupervisorHandle`], which turns method calls into [`SessionCommand`]s
//! with a oneshot reply channel.
//!
//! - **`command`**    – The command protocol and its error types.
//! - **`handle`**     – Async client API over the command channel.
//! - **`supervisor`** – The actor: state machine, transport link, reconnect
//!   timer, health monitor, and message dispatcher.

pub mod command;
pub mod handle;
pub mod supervisor;

pub use command::{PairingError, SessionCommand, SupervisorError};
pub use handle::SupervisorHandle;
pub use supervisor::{SessionSupervisor, SupervisorConfig};
