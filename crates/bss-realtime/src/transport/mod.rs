//! Server-to-client streaming transport.
//!
//! The connection manager talks to the network only through [`Transport`],
//! which opens one stream and yields [`SseMessage`]s until it fails or ends.
//! [`SseTransport`] is the HTTP implementation; tests substitute scripted ones.

pub mod sse;

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

pub use sse::SseTransport;

/// One server-sent message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseMessage {
    /// SSE `id` field, if the server set one.
    pub id: Option<String>,
    /// SSE `event` field (`"message"` when absent).
    pub event: String,
    /// SSE `data` field, the raw envelope JSON.
    pub data: String,
}

impl SseMessage {
    /// A default-typed message carrying `data`.
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: "message".to_string(),
            data: data.into(),
        }
    }

    /// Set the SSE `id` field.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Parameters for opening one stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenRequest {
    /// Stream URL.
    pub url: String,
    /// Whether `credential_headers` are attached.
    pub with_credentials: bool,
    /// Credential headers (e.g. `Authorization`, `Cookie`).
    pub credential_headers: BTreeMap<String, String>,
    /// Last SSE id seen on a previous connection, sent as `Last-Event-ID`.
    pub last_event_id: Option<String>,
}

/// Transport-level failure. Always recovered by the connection manager's
/// reconnect policy; never surfaced to event consumers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, reset, DNS, TLS...).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),
    /// The server answered with something other than an event stream.
    #[error("unexpected content type {0:?}")]
    ContentType(String),
    /// No response headers within the connect timeout.
    #[error("timed out after {0}ms waiting for the event stream")]
    Timeout(u64),
    /// The open stream failed mid-flight.
    #[error("stream error: {0}")]
    Stream(String),
    /// The server ended the stream.
    #[error("stream closed by server")]
    Closed,
}

/// Stream of inbound messages for one open connection.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<SseMessage, TransportError>> + Send>>;

/// Opens server-to-client message streams.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a stream. Resolves once the server has accepted it.
    async fn open(&self, request: &OpenRequest) -> Result<MessageStream, TransportError>;
}
