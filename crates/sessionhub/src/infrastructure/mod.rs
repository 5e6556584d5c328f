//! Infrastructure layer of the session manager.
//!
//! Contains the adapters behind the application ports: transport drivers,
//! credential and snapshot stores, and the configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `sessionhub_core`, but MUST NOT be imported by the `application` layer
//! outside of tests.

pub mod storage;
pub mod transport;
