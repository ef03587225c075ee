//! Event dispatcher.
//!
//! Decodes raw payloads into [`Envelope`]s and delivers each one to every
//! subscription whose [`Pattern`] matches: exact-type subscriptions first,
//! then wildcard ones. Each delivery is isolated: a listener that errors or
//! panics is logged and counted, and the remaining listeners still run.
//!
//! The matching listeners are snapshotted under the registry's read lock and
//! invoked after it is released, so a listener may subscribe or unsubscribe
//! (itself included) while a dispatch is running. Such changes apply to the
//! next dispatch only.

mod pattern;
mod stats;

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bss_core::text::preview;
use bss_core::{Envelope, ListenerError};
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

pub use pattern::{Pattern, WILDCARD};
pub use stats::DispatchStats;

use crate::connection::MessageSink;
use stats::Counters;

/// Subscription callback.
///
/// Return `Err` to report a failure; the dispatcher logs it and moves on.
pub type Listener = Arc<dyn Fn(&Envelope) -> Result<(), ListenerError> + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Envelope) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

struct Entry {
    id: u64,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    entries: RwLock<HashMap<Pattern, Vec<Entry>>>,
    next_id: AtomicU64,
    counters: Counters,
}

impl Registry {
    /// Remove one registration; prunes the pattern when it becomes empty.
    fn remove(&self, pattern: &Pattern, id: u64) -> bool {
        let mut entries = self.entries.write();
        let Some(list) = entries.get_mut(pattern) else {
            return false;
        };
        let before = list.len();
        list.retain(|e| e.id != id);
        let removed = list.len() < before;
        if list.is_empty() {
            let _ = entries.remove(pattern);
        }
        removed
    }
}

/// Registry of subscriptions plus the decode-and-deliver path.
///
/// Cloning is cheap and yields a handle to the same registry. The registry
/// is torn down when the last clone is dropped.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Registry>,
}

impl EventDispatcher {
    /// Create a dispatcher with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` under `pattern`.
    ///
    /// Multiple subscriptions may share a pattern; each is delivered to and
    /// removable on its own. The returned handle removes exactly this
    /// registration when unsubscribed or dropped.
    pub fn subscribe(&self, pattern: impl Into<Pattern>, listener: Listener) -> Subscription {
        let pattern = pattern.into();
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut entries = self.registry.entries.write();
            entries
                .entry(pattern.clone())
                .or_default()
                .push(Entry { id, listener });
        }
        debug!(pattern = %pattern, subscription_id = id, "subscribed");
        Subscription {
            registry: Arc::downgrade(&self.registry),
            pattern,
            id,
            active: true,
        }
    }

    /// Register a closure under `pattern`. Shorthand for [`subscribe`](Self::subscribe).
    pub fn subscribe_fn<F>(&self, pattern: impl Into<Pattern>, f: F) -> Subscription
    where
        F: Fn(&Envelope) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.subscribe(pattern, listener(f))
    }

    /// Remove every registration of `listener` under `pattern`.
    ///
    /// Listeners are compared by identity (the same `Arc`), so other
    /// subscriptions on the pattern are untouched. Returns how many were removed.
    pub fn unsubscribe(&self, pattern: impl Into<Pattern>, listener: &Listener) -> usize {
        let pattern = pattern.into();
        let mut entries = self.registry.entries.write();
        let Some(list) = entries.get_mut(&pattern) else {
            return 0;
        };
        let before = list.len();
        list.retain(|e| !std::ptr::addr_eq(Arc::as_ptr(&e.listener), Arc::as_ptr(listener)));
        let removed = before - list.len();
        if list.is_empty() {
            let _ = entries.remove(&pattern);
        }
        drop(entries);
        if removed > 0 {
            debug!(pattern = %pattern, removed, "unsubscribed");
        }
        removed
    }

    /// Decode `raw` and deliver it.
    ///
    /// Never fails: a payload that does not decode is logged and dropped
    /// without touching the registry.
    pub fn dispatch(&self, raw: &str) {
        self.registry.counters.received();
        match Envelope::decode(raw) {
            Ok(envelope) => {
                let _ = self.publish(&envelope);
            }
            Err(e) => {
                self.registry.counters.decode_failure();
                warn!(error = %e, payload = %preview(raw), "dropping undecodable event payload");
            }
        }
    }

    /// Deliver an already-decoded envelope. Returns the number of listeners
    /// that handled it without error.
    pub fn publish(&self, envelope: &Envelope) -> usize {
        let listeners = self.snapshot(&envelope.event_type);
        if listeners.is_empty() {
            self.registry.counters.unmatched();
            trace!(event_type = %envelope.event_type, event_id = %envelope.id, "no subscribers");
            return 0;
        }

        let mut delivered = 0;
        for (pattern, listener) in &listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(envelope))) {
                Ok(Ok(())) => {
                    delivered += 1;
                    self.registry.counters.delivered(&envelope.event_type);
                }
                Ok(Err(e)) => self.listener_failed(envelope, pattern, &e),
                Err(payload) => {
                    self.listener_failed(envelope, pattern, &ListenerError::from_panic(payload.as_ref()));
                }
            }
        }
        debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.id,
            listeners = listeners.len(),
            delivered,
            "dispatched event"
        );
        delivered
    }

    /// Exact matches followed by wildcard matches, cloned out of the lock.
    fn snapshot(&self, event_type: &str) -> Vec<(Pattern, Listener)> {
        let entries = self.registry.entries.read();
        let exact = Pattern::Exact(event_type.to_owned());
        [exact, Pattern::Wildcard]
            .into_iter()
            .filter_map(|p| entries.get(&p).map(|list| (p, list)))
            .flat_map(|(p, list)| {
                list.iter()
                    .map(move |e| (p.clone(), Arc::clone(&e.listener)))
            })
            .collect()
    }

    fn listener_failed(&self, envelope: &Envelope, pattern: &Pattern, error: &ListenerError) {
        self.registry.counters.listener_failure(&envelope.event_type);
        warn!(
            event_type = %envelope.event_type,
            event_id = %envelope.id,
            pattern = %pattern,
            error = %error,
            "event listener failed"
        );
    }

    /// Whether any subscription is registered under `pattern`.
    pub fn has_subscribers(&self, pattern: impl Into<Pattern>) -> bool {
        self.registry.entries.read().contains_key(&pattern.into())
    }

    /// Total number of registered subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.registry.entries.read().values().map(Vec::len).sum()
    }

    /// Patterns that currently have at least one subscription, sorted.
    pub fn patterns(&self) -> Vec<Pattern> {
        let mut patterns: Vec<Pattern> = self.registry.entries.read().keys().cloned().collect();
        patterns.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        patterns
    }

    /// Drop every registration. Outstanding [`Subscription`] handles become no-ops.
    pub fn clear(&self) {
        let removed = {
            let mut entries = self.registry.entries.write();
            let count = entries.values().map(Vec::len).sum::<usize>();
            entries.clear();
            count
        };
        debug!(removed, "cleared subscriptions");
    }

    /// Current counters.
    pub fn stats(&self) -> DispatchStats {
        self.registry.counters.snapshot()
    }
}

impl MessageSink for EventDispatcher {
    fn deliver(&self, raw: &str) {
        self.dispatch(raw);
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscriptions", &self.subscriber_count())
            .finish()
    }
}

/// Capability that removes one registration.
///
/// Dropping the handle unsubscribes; call [`detach`](Self::detach) to keep
/// the registration for the dispatcher's lifetime instead.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Registry>,
    pattern: Pattern,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Pattern this subscription is registered under.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Remove this registration. Returns `false` if it was already gone
    /// (cleared, or the dispatcher was dropped).
    pub fn unsubscribe(mut self) -> bool {
        self.release()
    }

    /// Keep the registration alive without holding the handle.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn release(&mut self) -> bool {
        if !std::mem::replace(&mut self.active, false) {
            return false;
        }
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = registry.remove(&self.pattern, self.id);
        if removed {
            debug!(pattern = %self.pattern, subscription_id = self.id, "unsubscribed");
        }
        removed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("patterns", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}
