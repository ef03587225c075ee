//! Routes dispatcher envelopes to typed domain-event consumers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bss_core::{Envelope, ListenerError};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{Notification, TypedEvent};
use crate::dispatcher::{EventDispatcher, Pattern, Subscription};

const DEFAULT_CAPACITY: usize = 256;
const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(60 * 60);

/// Receives user-facing notices derived from domain events.
pub trait Notifier: Send + Sync {
    /// Show `notification`, raised by `event`.
    fn notify(&self, notification: &Notification, event: &TypedEvent);
}

/// Router options.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Broadcast channel capacity; slow receivers lag past this.
    pub capacity: usize,
    /// Suppress envelopes whose `(source, id)` pair was already routed within
    /// this window. `None` routes every envelope.
    pub dedup_ttl: Option<Duration>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            dedup_ttl: Some(DEFAULT_DEDUP_TTL),
        }
    }
}

impl RouterConfig {
    /// Config with duplicate suppression disabled.
    pub fn without_dedup() -> Self {
        Self {
            dedup_ttl: None,
            ..Self::default()
        }
    }

    /// Build from a millisecond TTL as stored in settings; `0` disables
    /// duplicate suppression.
    pub fn from_ttl_ms(ttl_ms: Option<u64>) -> Self {
        Self {
            dedup_ttl: ttl_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
            ..Self::default()
        }
    }
}

/// `(source, id)` pair identifying an envelope.
type SeenKey = (String, String);

/// Envelope keys seen within the TTL window.
///
/// `order` holds keys in insertion order. The TTL is fixed, so the front is
/// always the next entry to expire.
struct SeenIds {
    ttl: Duration,
    seen: HashMap<SeenKey, Instant>,
    order: VecDeque<(SeenKey, Instant)>,
}

impl SeenIds {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `(source, id)`; `false` if it was already seen and has not expired.
    fn insert(&mut self, source: &str, id: &str, now: Instant) -> bool {
        self.expire(now);
        let key = (source.to_owned(), id.to_owned());
        if self.seen.contains_key(&key) {
            return false;
        }
        let _ = self.seen.insert(key.clone(), now);
        self.order.push_back((key, now));
        true
    }

    fn expire(&mut self, now: Instant) {
        while let Some((key, at)) = self.order.front() {
            if now.duration_since(*at) < self.ttl {
                break;
            }
            let _ = self.seen.remove(key);
            let _ = self.order.pop_front();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.len()
    }
}

struct Inner {
    tx: broadcast::Sender<TypedEvent>,
    notifier: Option<Arc<dyn Notifier>>,
    seen: Option<Mutex<SeenIds>>,
}

impl Inner {
    fn route(&self, envelope: &Envelope) -> Result<(), ListenerError> {
        if let Some(seen) = &self.seen {
            if !seen.lock().insert(&envelope.source, &envelope.id, Instant::now()) {
                debug!(event_id = %envelope.id, source = %envelope.source, event_type = %envelope.event_type, "suppressing duplicate event");
                return Ok(());
            }
        }

        let typed = TypedEvent::from_envelope(envelope).map_err(|e| ListenerError::failed(e.to_string()))?;
        if let Some(notifier) = &self.notifier {
            if let Some(notification) = typed.event.notification() {
                notifier.notify(&notification, &typed);
            }
        }
        let receivers = self.tx.send(typed).unwrap_or(0);
        trace!(event_id = %envelope.id, receivers, "routed domain event");
        Ok(())
    }
}

/// Wildcard subscriber that turns envelopes into [`TypedEvent`]s.
///
/// Typed events go out on a broadcast channel; notices go to the optional
/// [`Notifier`]. Dropping the router removes its subscription.
pub struct DomainEventRouter {
    inner: Arc<Inner>,
    _subscription: Subscription,
}

impl DomainEventRouter {
    /// Subscribe a router to every envelope on `dispatcher`.
    pub fn attach(dispatcher: &EventDispatcher, config: RouterConfig) -> Self {
        Self::build(dispatcher, config, None)
    }

    /// As [`attach`](Self::attach), also forwarding notices to `notifier`.
    pub fn with_notifier(
        dispatcher: &EventDispatcher,
        config: RouterConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::build(dispatcher, config, Some(notifier))
    }

    fn build(
        dispatcher: &EventDispatcher,
        config: RouterConfig,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let (tx, _) = broadcast::channel(config.capacity.max(1));
        let inner = Arc::new(Inner {
            tx,
            notifier,
            seen: config.dedup_ttl.map(|ttl| Mutex::new(SeenIds::new(ttl))),
        });
        let routed = Arc::clone(&inner);
        let subscription = dispatcher.subscribe_fn(Pattern::Wildcard, move |envelope| routed.route(envelope));
        debug!(dedup_ttl = ?config.dedup_ttl, "domain event router attached");
        Self {
            inner,
            _subscription: subscription,
        }
    }

    /// Receiver for typed events routed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TypedEvent> {
        self.inner.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }
}

impl std::fmt::Debug for DomainEventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainEventRouter")
            .field("receivers", &self.receiver_count())
            .field("dedup", &self.inner.seen.is_some())
            .finish_non_exhaustive()
    }
}
