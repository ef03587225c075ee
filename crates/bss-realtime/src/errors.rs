//! Client construction errors.

use thiserror::Error;

use crate::transport::TransportError;

/// Failure to build a [`RealtimeClient`](crate::RealtimeClient).
///
/// Runtime failures never surface here; they are retried by the connection
/// manager and observed through its state.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Settings failed validation.
    #[error("invalid settings: {0}")]
    Settings(#[from] bss_settings::SettingsError),
    /// The HTTP transport could not be built.
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}
