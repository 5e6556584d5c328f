//! Storage infrastructure: configuration, credentials, and snapshots.
//!
//! - **`config`**      – The TOML configuration file and its mapping onto
//!   `SessionPolicy`.
//! - **`credentials`** – `FileCredentialStore`, one opaque file per session.
//! - **`snapshot`**    – `JsonSnapshotStore`, the single state document.
//! - **`memory`**      – In-memory variants of both stores.

pub mod config;
pub mod credentials;
pub mod memory;
pub mod snapshot;
