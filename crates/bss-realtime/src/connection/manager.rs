//! Connection lifecycle and reconnect loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bss_core::ConnectionState;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{ConnectionConfig, MessageSink, StateChange};
use crate::transport::{MessageStream, OpenRequest, Transport, TransportError};

const TRANSITION_CAPACITY: usize = 64;

/// Background task bookkeeping for the current connect lifecycle.
///
/// `generation` changes on every connect and disconnect; a task only
/// publishes state while its generation is current.
#[derive(Default)]
struct Lifecycle {
    generation: u64,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl Lifecycle {
    /// Cancel and abort the running task, if any.
    fn stop(&mut self) -> bool {
        let cancel = self.cancel.take();
        let task = self.task.take();
        if let Some(cancel) = &cancel {
            cancel.cancel();
        }
        if let Some(task) = &task {
            task.abort();
        }
        cancel.is_some() || task.is_some()
    }
}

struct Shared {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn MessageSink>,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<StateChange>,
    attempts: AtomicU32,
    last_event_id: Mutex<Option<String>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Shared {
    /// Publish `next` unconditionally. Callers hold the lifecycle lock.
    fn set_state(&self, next: ConnectionState) {
        let mut previous = next;
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            previous = std::mem::replace(current, next);
            true
        });
        if changed {
            debug!(from = %previous, to = %next, url = %self.config.url, "connection state changed");
            let _ = self.transitions.send(StateChange::new(previous, next));
        }
    }

    /// Publish `next` only if `generation` still owns the connection.
    fn publish(&self, generation: u64, next: ConnectionState) -> bool {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.generation != generation {
            return false;
        }
        self.set_state(next);
        true
    }

    fn open_request(&self) -> OpenRequest {
        OpenRequest {
            url: self.config.url.clone(),
            with_credentials: self.config.with_credentials,
            credential_headers: self.config.credential_headers.clone(),
            last_event_id: self.last_event_id.lock().clone(),
        }
    }

    /// Forward messages until the stream fails or `cancel` fires.
    ///
    /// Returns `None` when cancelled.
    async fn pump(&self, mut stream: MessageStream, cancel: &CancellationToken) -> Option<TransportError> {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(message)) => {
                    if let Some(id) = &message.id {
                        *self.last_event_id.lock() = Some(id.clone());
                    }
                    trace!(event = %message.event, id = ?message.id, bytes = message.data.len(), "message received");
                    self.sink.deliver(&message.data);
                }
                Some(Err(e)) => return Some(e),
                None => return Some(TransportError::Closed),
            }
        }
    }
}

/// Owns one streaming connection and its reconnect policy.
///
/// `connect` and `disconnect` are synchronous; the connection itself runs on
/// a background tokio task. Dropping the manager disconnects it.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager in the `Closed` state. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                sink,
                state,
                transitions,
                attempts: AtomicU32::new(0),
                last_event_id: Mutex::new(None),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// Start a connect lifecycle.
    ///
    /// No-op while `Open` or `Connecting`. Otherwise any pending reconnect is
    /// cancelled, state moves to `Connecting` and a task opens the stream.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let Ok(runtime) = Handle::try_current() else {
            error!(url = %self.shared.config.url, "connect called outside a tokio runtime");
            return;
        };

        let mut lifecycle = self.shared.lifecycle.lock();
        let current = *self.shared.state.borrow();
        if current.is_active() {
            debug!(state = %current, "connect ignored, connection already active");
            return;
        }

        let _ = lifecycle.stop();
        lifecycle.generation += 1;
        let generation = lifecycle.generation;
        let cancel = CancellationToken::new();
        self.shared.set_state(ConnectionState::Connecting);
        lifecycle.task = Some(runtime.spawn(run(
            Arc::clone(&self.shared),
            generation,
            cancel.clone(),
        )));
        lifecycle.cancel = Some(cancel);
    }

    /// Close the connection and cancel any pending reconnect.
    ///
    /// Idempotent and safe from any state. Once this returns no further
    /// messages reach the sink and no reconnect can fire.
    pub fn disconnect(&self) {
        let mut lifecycle = self.shared.lifecycle.lock();
        let stopped = lifecycle.stop();
        lifecycle.generation += 1;
        self.shared.set_state(ConnectionState::Closed);
        drop(lifecycle);
        if stopped {
            info!(url = %self.shared.config.url, "event stream disconnected");
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver that always holds the latest state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Receiver for every transition published after this call.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateChange> {
        self.shared.transitions.subscribe()
    }

    /// Reconnect attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Last SSE id seen, sent as `Last-Event-ID` on reconnect.
    pub fn last_event_id(&self) -> Option<String> {
        self.shared.last_event_id.lock().clone()
    }

    /// Configuration this manager was built with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.shared.config.url)
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish()
    }
}

/// One connect lifecycle: open, pump, and reconnect until cancelled,
/// exhausted, or reconnection is disabled.
async fn run(shared: Arc<Shared>, generation: u64, cancel: CancellationToken) {
    let url = shared.config.url.clone();
    loop {
        if !shared.publish(generation, ConnectionState::Connecting) {
            return;
        }

        let request = shared.open_request();
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            opened = shared.transport.open(&request) => opened,
        };

        let failure = match opened {
            Ok(stream) => {
                shared.attempts.store(0, Ordering::SeqCst);
                if !shared.publish(generation, ConnectionState::Open) {
                    return;
                }
                info!(url = %url, resumed_from = ?request.last_event_id, "event stream open");
                match shared.pump(stream, &cancel).await {
                    Some(e) => e,
                    None => return,
                }
            }
            Err(e) => e,
        };

        metrics::counter!("bss_events_transport_errors_total").increment(1);
        warn!(url = %url, error = %failure, "event stream failed");
        if !shared.publish(generation, ConnectionState::Erroring)
            || !shared.publish(generation, ConnectionState::Closed)
        {
            return;
        }

        if !shared.config.auto_reconnect {
            info!(url = %url, "auto-reconnect disabled, staying closed");
            return;
        }
        let attempts = shared.attempts.load(Ordering::SeqCst);
        if !shared.config.policy.allows(attempts) {
            warn!(
                url = %url,
                attempts,
                max_attempts = shared.config.policy.max_attempts,
                "reconnect attempts exhausted, staying closed until connect"
            );
            return;
        }

        let delay = shared.config.policy.delay_for(attempts);
        shared.attempts.store(attempts + 1, Ordering::SeqCst);
        metrics::counter!("bss_events_reconnects_total").increment(1);
        info!(
            url = %url,
            attempt = attempts + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SseMessage;
    use async_trait::async_trait;
    use bss_core::ReconnectPolicy;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    type Item = Result<SseMessage, TransportError>;

    enum Step {
        Fail(TransportError),
        Stream(mpsc::UnboundedReceiver<Item>),
    }

    /// Transport that replays a script of open outcomes and records each open.
    /// Once the script runs out every open fails with 503.
    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        opens: Mutex<Vec<(Instant, OpenRequest)>>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                opens: Mutex::default(),
            })
        }

        fn push(&self, step: Step) {
            self.steps.lock().push_back(step);
        }

        fn open_count(&self) -> usize {
            self.opens.lock().len()
        }

        fn requests(&self) -> Vec<OpenRequest> {
            self.opens.lock().iter().map(|(_, r)| r.clone()).collect()
        }

        fn open_times(&self) -> Vec<Instant> {
            self.opens.lock().iter().map(|(at, _)| *at).collect()
        }

        /// Milliseconds between consecutive opens.
        fn gaps_ms(&self) -> Vec<u128> {
            let opens = self.opens.lock();
            opens
                .windows(2)
                .map(|w| (w[1].0 - w[0].0).as_millis())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, request: &OpenRequest) -> Result<MessageStream, TransportError> {
            self.opens.lock().push((Instant::now(), request.clone()));
            let step = self.steps.lock().pop_front();
            match step {
                None => Err(TransportError::Status(503)),
                Some(Step::Fail(e)) => Err(e),
                Some(Step::Stream(rx)) => Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                }))),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().clone()
        }
    }

    impl MessageSink for RecordingSink {
        fn deliver(&self, raw: &str) {
            self.messages.lock().push(raw.to_owned());
        }
    }

    fn stream_step() -> (mpsc::UnboundedSender<Item>, Step) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Step::Stream(rx))
    }

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            ..ReconnectPolicy::default()
        }
    }

    fn build(
        config: ConnectionConfig,
        transport: &Arc<ScriptedTransport>,
    ) -> (ConnectionManager, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let manager = ConnectionManager::new(
            config,
            Arc::clone(transport) as Arc<dyn Transport>,
            Arc::clone(&sink) as Arc<dyn MessageSink>,
        );
        (manager, sink)
    }

    fn config(max_attempts: u32) -> ConnectionConfig {
        ConnectionConfig::new("http://test/events").with_policy(policy(max_attempts))
    }

    /// Each gap must equal the expected delay; the paused clock may round a
    /// deadline up by one timer tick.
    fn assert_gaps(actual: &[u128], expected: &[u128]) {
        assert_eq!(actual.len(), expected.len(), "gaps {actual:?} vs {expected:?}");
        for (a, e) in actual.iter().zip(expected) {
            assert!(*a >= *e && *a <= *e + 1, "gaps {actual:?} vs {expected:?}");
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_until_exhausted() {
        let transport = ScriptedTransport::new(vec![]);
        let (manager, _sink) = build(config(4), &transport);

        manager.connect();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(transport.open_count(), 5);
        assert_gaps(&transport.gaps_ms(), &[1000, 2000, 4000, 8000]);
        assert_eq!(manager.attempts(), 4);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_capped() {
        let transport = ScriptedTransport::new(vec![]);
        let config = ConnectionConfig::new("http://test/events").with_policy(ReconnectPolicy {
            base_delay_ms: 1000,
            max_delay_ms: 3000,
            max_attempts: 4,
            jitter_factor: 0.0,
        });
        let (manager, _sink) = build(config, &transport);

        manager.connect();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_gaps(&transport.gaps_ms(), &[1000, 2000, 3000, 3000]);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_open_resets_attempts() {
        let (tx, step) = stream_step();
        let transport = ScriptedTransport::new(vec![
            Step::Fail(TransportError::Status(502)),
            Step::Fail(TransportError::Status(502)),
            step,
        ]);
        let (manager, sink) = build(config(10), &transport);

        manager.connect();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.attempts(), 0);
        assert_gaps(&transport.gaps_ms(), &[1000, 2000]);

        tx.send(Ok(SseMessage::data("one"))).unwrap();
        settle().await;
        assert_eq!(sink.messages(), vec!["one"]);

        // server drops the stream; next delay starts from the base again
        let (_tx2, step2) = stream_step();
        transport.push(step2);
        let dropped_at = Instant::now();
        drop(tx);
        tokio::time::sleep(Duration::from_secs(5)).await;
        let reopened_at = transport.open_times()[3];
        assert_gaps(&[(reopened_at - dropped_at).as_millis()], &[1000]);
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let transport = ScriptedTransport::new(vec![]);
        let (manager, _sink) = build(config(10), &transport);

        manager.connect();
        settle().await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(manager.attempts(), 1);

        manager.disconnect();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_after_disconnect_does_not_race_old_timer() {
        let (_tx, step) = stream_step();
        let transport = ScriptedTransport::new(vec![Step::Fail(TransportError::Closed), step]);
        let (manager, _sink) = build(config(10), &transport);

        manager.connect();
        settle().await;
        manager.disconnect();
        manager.connect();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(transport.open_count(), 2);
        assert_eq!(manager.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent() {
        let transport = ScriptedTransport::new(vec![]);
        let (manager, _sink) = build(config(10), &transport);
        let mut transitions = manager.subscribe_transitions();

        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(transitions.try_recv().is_err());

        let (_tx, step) = stream_step();
        transport.push(step);
        manager.connect();
        settle().await;
        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_active_is_noop() {
        let (_tx, step) = stream_step();
        let transport = ScriptedTransport::new(vec![step]);
        let (manager, _sink) = build(config(10), &transport);

        manager.connect();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        manager.connect();
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Open);
        manager.connect();
        settle().await;

        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_reconnect_when_disabled() {
        let transport = ScriptedTransport::new(vec![]);
        let (manager, _sink) = build(config(10).with_auto_reconnect(false), &transport);

        manager.connect();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(manager.attempts(), 0);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_after_exhaustion() {
        let transport = ScriptedTransport::new(vec![]);
        let (manager, _sink) = build(config(2), &transport);

        manager.connect();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.open_count(), 3);

        // one more try; the counter is still exhausted so nothing is scheduled
        manager.connect();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.open_count(), 4);
        assert_eq!(manager.state(), ConnectionState::Closed);

        // a successful explicit connect resets the counter
        let (_tx, step) = stream_step();
        transport.push(step);
        manager.connect();
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn last_event_id_sent_on_reconnect() {
        let (tx, step) = stream_step();
        let (_tx2, step2) = stream_step();
        let transport = ScriptedTransport::new(vec![step, step2]);
        let config = config(10).with_credential_header("Authorization", "Bearer t");
        let (manager, sink) = build(config, &transport);

        manager.connect();
        settle().await;
        tx.send(Ok(SseMessage::data("a").with_id("e1"))).unwrap();
        tx.send(Ok(SseMessage::data("b"))).unwrap();
        tx.send(Err(TransportError::Stream("reset".into()))).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].last_event_id, None);
        assert_eq!(requests[1].last_event_id.as_deref(), Some("e1"));
        assert!(requests[1].with_credentials);
        assert_eq!(
            requests[1].credential_headers.get("Authorization").map(String::as_str),
            Some("Bearer t")
        );
        assert_eq!(sink.messages(), vec!["a", "b"]);
        assert_eq!(manager.last_event_id().as_deref(), Some("e1"));
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_are_published_in_order() {
        let (tx, step) = stream_step();
        let transport = ScriptedTransport::new(vec![step]);
        let (manager, _sink) = build(config(10).with_auto_reconnect(false), &transport);
        let mut transitions = manager.subscribe_transitions();
        let mut watched = manager.watch_state();

        manager.connect();
        settle().await;
        assert!(watched.has_changed().unwrap());
        assert_eq!(*watched.borrow_and_update(), ConnectionState::Open);

        drop(tx);
        settle().await;

        let mut seen = Vec::new();
        while let Ok(change) = transitions.try_recv() {
            seen.push((change.from, change.to));
        }
        use ConnectionState::{Closed, Connecting, Erroring, Open};
        assert_eq!(
            seen,
            vec![
                (Closed, Connecting),
                (Connecting, Open),
                (Open, Erroring),
                (Erroring, Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_delivered_after_disconnect() {
        let (tx, step) = stream_step();
        let transport = ScriptedTransport::new(vec![step]);
        let (manager, sink) = build(config(10), &transport);

        manager.connect();
        settle().await;
        tx.send(Ok(SseMessage::data("before"))).unwrap();
        settle().await;

        manager.disconnect();
        let _ = tx.send(Ok(SseMessage::data("after")));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(sink.messages(), vec!["before"]);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_disconnects() {
        let transport = ScriptedTransport::new(vec![]);
        let (manager, _sink) = build(config(10), &transport);
        manager.connect();
        settle().await;
        drop(manager);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.open_count(), 1);
    }

    #[test]
    fn connect_without_runtime_stays_closed() {
        let transport = ScriptedTransport::new(vec![]);
        let (manager, _sink) = build(config(10), &transport);
        manager.connect();
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(transport.open_count(), 0);
    }
}
