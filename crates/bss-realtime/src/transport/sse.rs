//! HTTP server-sent events transport.
//!
//! Opens `GET <url>` with `Accept: text/event-stream`, checks the response
//! and turns the body into [`SseMessage`]s with `eventsource-stream`.
//! Messages without data (keep-alives) are dropped here.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{Event, Eventsource};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tracing::debug;

use super::{MessageStream, OpenRequest, SseMessage, Transport, TransportError};

const EVENT_STREAM_MIME: &str = "text/event-stream";
const LAST_EVENT_ID: &str = "Last-Event-ID";

/// [`Transport`] over HTTP server-sent events.
#[derive(Clone, Debug)]
pub struct SseTransport {
    client: reqwest::Client,
    connect_timeout: Duration,
}

impl SseTransport {
    /// Build a transport whose opens give up after `connect_timeout`
    /// without response headers.
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self::with_client(client, connect_timeout))
    }

    /// Build a transport around an existing client.
    pub fn with_client(client: reqwest::Client, connect_timeout: Duration) -> Self {
        Self {
            client,
            connect_timeout,
        }
    }

    fn build_request(&self, request: &OpenRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .get(&request.url)
            .header(ACCEPT, EVENT_STREAM_MIME)
            .header(CACHE_CONTROL, "no-cache");
        if request.with_credentials {
            for (name, value) in &request.credential_headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(id) = &request.last_event_id {
            builder = builder.header(LAST_EVENT_ID, id.as_str());
        }
        builder
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn open(&self, request: &OpenRequest) -> Result<MessageStream, TransportError> {
        let timeout_ms = u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX);
        let response = tokio::time::timeout(self.connect_timeout, self.build_request(request).send())
            .await
            .map_err(|_| TransportError::Timeout(timeout_ms))??;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        if !content_type.starts_with(EVENT_STREAM_MIME) {
            return Err(TransportError::ContentType(content_type));
        }

        debug!(url = %request.url, "event stream accepted");

        let messages = response
            .bytes_stream()
            .eventsource()
            .filter_map(|item| {
                futures::future::ready(match item {
                    Ok(event) => to_message(event).map(Ok),
                    Err(e) => Some(Err(TransportError::Stream(e.to_string()))),
                })
            });
        Ok(Box::pin(messages))
    }
}

/// Convert a parsed SSE event, dropping data-less keep-alives.
fn to_message(event: Event) -> Option<SseMessage> {
    if event.data.is_empty() {
        return None;
    }
    Some(SseMessage {
        id: (!event.id.is_empty()).then_some(event.id),
        event: if event.event.is_empty() {
            "message".to_string()
        } else {
            event.event
        },
        data: event.data,
    })
}
