//! Composition of one dispatcher and one connection manager.

use std::sync::Arc;
use std::time::Duration;

use bss_core::{ConnectionState, Envelope, ListenerError};
use bss_settings::RealtimeSettings;
use tokio::sync::watch;
use tracing::info;

use crate::connection::{ConnectionConfig, ConnectionManager, MessageSink};
use crate::dispatcher::{EventDispatcher, Listener, Pattern, Subscription};
use crate::domain::{DomainEventRouter, Notifier, RouterConfig};
use crate::errors::ClientError;
use crate::transport::{SseTransport, Transport};

/// Realtime event client.
///
/// Subscriptions may be registered before [`start`](Self::start); they do not
/// depend on the connection. Dropping the client stops the connection.
pub struct RealtimeClient {
    dispatcher: EventDispatcher,
    connection: ConnectionManager,
    router_config: RouterConfig,
}

impl RealtimeClient {
    /// Build a client over an arbitrary transport.
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        let dispatcher = EventDispatcher::new();
        let sink: Arc<dyn MessageSink> = Arc::new(dispatcher.clone());
        let connection = ConnectionManager::new(config, transport, sink);
        Self {
            dispatcher,
            connection,
            router_config: RouterConfig::default(),
        }
    }

    /// Build a client over HTTP server-sent events from loaded settings.
    pub fn from_settings(settings: &RealtimeSettings) -> Result<Self, ClientError> {
        settings.validate()?;
        let transport = SseTransport::new(Duration::from_millis(settings.connect_timeout_ms))?;
        let mut client = Self::new(ConnectionConfig::from_settings(settings), Arc::new(transport));
        client.router_config = RouterConfig::from_ttl_ms(settings.dedup_ttl_ms);
        Ok(client)
    }

    /// Underlying dispatcher.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Register a listener. See [`EventDispatcher::subscribe`].
    pub fn subscribe(&self, pattern: impl Into<Pattern>, listener: Listener) -> Subscription {
        self.dispatcher.subscribe(pattern, listener)
    }

    /// Register a closure. See [`EventDispatcher::subscribe_fn`].
    pub fn subscribe_fn<F>(&self, pattern: impl Into<Pattern>, f: F) -> Subscription
    where
        F: Fn(&Envelope) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe_fn(pattern, f)
    }

    /// Attach a typed domain-event router using the configured dedup window.
    pub fn domain_events(&self) -> DomainEventRouter {
        DomainEventRouter::attach(&self.dispatcher, self.router_config.clone())
    }

    /// Attach a typed domain-event router that also raises notices.
    pub fn domain_events_with_notifier(&self, notifier: Arc<dyn Notifier>) -> DomainEventRouter {
        DomainEventRouter::with_notifier(&self.dispatcher, self.router_config.clone(), notifier)
    }

    /// Open the connection.
    pub fn start(&self) {
        info!(url = %self.connection.config().url, "starting realtime client");
        self.connection.connect();
    }

    /// Close the connection and cancel any pending reconnect.
    pub fn stop(&self) {
        self.connection.disconnect();
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Receiver tracking the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("connection", &self.connection)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
