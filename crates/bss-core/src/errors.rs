//! Error types for envelope decoding and listener failures.
//!
//! Neither error ever leaves the dispatch loop: both are logged and counted,
//! and the offending message or listener is skipped.

use thiserror::Error;

/// Failure to decode a raw payload into an [`Envelope`](crate::Envelope).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid JSON or does not match the envelope shape.
    #[error("malformed envelope JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A required attribute is present but empty.
    #[error("envelope attribute `{0}` must not be empty")]
    EmptyAttribute(&'static str),
}

/// Failure reported by a subscription callback.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listener returned an error.
    #[error("listener failed: {0}")]
    Failed(String),
    /// The listener panicked while handling the envelope.
    #[error("listener panicked: {0}")]
    Panicked(String),
}

impl ListenerError {
    /// Convenience constructor for listener-reported failures.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Build a [`ListenerError::Panicked`] from a `catch_unwind` payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::Panicked(message)
    }
}
