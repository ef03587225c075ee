//! Connection lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the streaming connection owned by a connection manager.
///
/// `Erroring` is transient: it is published when the transport fails and is
/// immediately followed by `Closed` for the failed connection object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection is open and none is being opened.
    #[default]
    Closed,
    /// The transport is being opened.
    Connecting,
    /// The stream is live and messages are flowing.
    Open,
    /// The transport reported an error.
    Erroring,
}

impl ConnectionState {
    /// Whether `connect()` should be a no-op in this state.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Open | Self::Connecting)
    }

    /// Lowercase name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Erroring => "erroring",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
