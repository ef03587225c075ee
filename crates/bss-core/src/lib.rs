//! # bss-core
//!
//! Foundation types, errors, backoff math and logging for the BSS realtime
//! event layer.
//!
//! This crate provides the shared vocabulary that the other `bss-*` crates depend on:
//!
//! - **Envelope**: [`envelope::Envelope`], the structured (CloudEvents-style) unit of transport
//! - **Connection state**: [`state::ConnectionState`] for the connection lifecycle signal
//! - **Backoff**: [`retry::ReconnectPolicy`] and the exponential delay calculation
//! - **Errors**: [`errors::DecodeError`] and [`errors::ListenerError`] via `thiserror`
//! - **Logging**: [`logging::init_subscriber`] and the log-capture test utilities
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `bss-settings` and `bss-realtime`.

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod logging;
pub mod retry;
pub mod state;
pub mod text;

pub use envelope::Envelope;
pub use errors::{DecodeError, ListenerError};
pub use retry::ReconnectPolicy;
pub use state::ConnectionState;
