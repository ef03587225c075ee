//! Connection manager.
//!
//! Owns one server-to-client stream, publishes its [`ConnectionState`], and
//! reconnects with capped exponential backoff after transport failures.
//! Every inbound message body is handed to a [`MessageSink`] in arrival order.

mod config;
mod manager;

use bss_core::ConnectionState;
use serde::Serialize;

pub use config::ConnectionConfig;
pub use manager::ConnectionManager;

/// Receives raw message bodies from the connection manager.
///
/// Called synchronously on the connection task, one message at a time.
pub trait MessageSink: Send + Sync {
    /// Handle one raw message body.
    fn deliver(&self, raw: &str);
}

/// One published state transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StateChange {
    /// State before the transition.
    pub from: ConnectionState,
    /// State after the transition.
    pub to: ConnectionState,
}

impl StateChange {
    /// Build a transition record.
    pub fn new(from: ConnectionState, to: ConnectionState) -> Self {
        Self { from, to }
    }
}
