//! # bss-realtime
//!
//! Server-pushed domain event delivery for BSS clients.
//!
//! - **Transport**: [`transport::Transport`] and the HTTP server-sent events
//!   implementation [`transport::SseTransport`]
//! - **Connection manager**: [`ConnectionManager`] owns one stream, publishes
//!   its state and reconnects with capped exponential backoff
//! - **Dispatcher**: [`EventDispatcher`] decodes envelopes and fans them out to
//!   exact-type and wildcard subscriptions with per-listener isolation
//! - **Domain events**: [`domain::TypedEvent`] and [`DomainEventRouter`] map
//!   envelope types onto typed customer, order, payment and invoice events
//! - **Client**: [`RealtimeClient`] composes the above with explicit start/stop
//!
//! ## Crate Position
//!
//! Top of the workspace. Depends on: bss-core, bss-settings.

#![deny(unsafe_code)]

pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod transport;

pub use bss_core::{ConnectionState, Envelope, ListenerError, ReconnectPolicy};
pub use client::RealtimeClient;
pub use connection::{ConnectionConfig, ConnectionManager, MessageSink, StateChange};
pub use dispatcher::{DispatchStats, EventDispatcher, Listener, Pattern, Subscription, listener};
pub use domain::{DomainEvent, DomainEventRouter, Notifier, RouterConfig, TypedEvent};
pub use errors::ClientError;
pub use transport::{SseTransport, Transport, TransportError};
