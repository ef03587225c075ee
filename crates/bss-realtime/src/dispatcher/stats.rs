//! Dispatch counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time copy of a dispatcher's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    /// Raw payloads handed to `dispatch`.
    pub received: u64,
    /// Payloads dropped because they did not decode.
    pub decode_failures: u64,
    /// Envelopes that matched no subscription.
    pub unmatched: u64,
    /// Successful listener invocations.
    pub delivered: u64,
    /// Listener invocations that returned an error or panicked.
    pub listener_failures: u64,
}

/// Live counters, updated lock-free from the dispatch path.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    received: AtomicU64,
    decode_failures: AtomicU64,
    unmatched: AtomicU64,
    delivered: AtomicU64,
    listener_failures: AtomicU64,
}

impl Counters {
    pub(crate) fn received(&self) {
        let _ = self.received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("bss_events_received_total").increment(1);
    }

    pub(crate) fn decode_failure(&self) {
        let _ = self.decode_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("bss_events_decode_failures_total").increment(1);
    }

    pub(crate) fn unmatched(&self) {
        let _ = self.unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivered(&self, event_type: &str) {
        let _ = self.delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("bss_events_delivered_total", "event_type" => event_type.to_owned())
            .increment(1);
    }

    pub(crate) fn listener_failure(&self, event_type: &str) {
        let _ = self.listener_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("bss_event_listener_failures_total", "event_type" => event_type.to_owned())
            .increment(1);
    }

    pub(crate) fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            received: self.received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
        }
    }
}
