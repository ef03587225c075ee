//! End-to-end delivery over a mock HTTP server-sent events endpoint.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use bss_realtime::{ConnectionConfig, ConnectionState, ReconnectPolicy, RealtimeClient, SseTransport};
use parking_lot::Mutex;
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASE_DELAY_MS: u64 = 100;

fn policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay_ms: BASE_DELAY_MS,
        max_delay_ms: 400,
        max_attempts: 5,
        jitter_factor: 0.0,
    }
}

fn client(server: &MockServer, config: impl FnOnce(ConnectionConfig) -> ConnectionConfig) -> RealtimeClient {
    let config = config(ConnectionConfig::new(format!("{}/events", server.uri())).with_policy(policy()));
    let transport = SseTransport::new(Duration::from_secs(5)).unwrap();
    RealtimeClient::new(config, Arc::new(transport))
}

fn envelope(id: &str, event_type: &str, data: Value) -> String {
    json!({
        "id": id,
        "source": "urn:bss:billing",
        "type": event_type,
        "specversion": "1.0",
        "datacontenttype": "application/json",
        "time": "2024-05-01T10:00:00Z",
        "data": data,
    })
    .to_string()
}

fn sse(frames: &[(Option<&str>, String)]) -> ResponseTemplate {
    let mut body = String::from(": connected\n\n");
    for (id, data) in frames {
        if let Some(id) = id {
            let _ = writeln!(body, "id: {id}");
        }
        let _ = write!(body, "data: {data}\n\n");
    }
    ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream")
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |r| r.len())
}

#[tokio::test]
async fn delivers_across_server_drop_and_resumes_from_last_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(sse(&[(
            Some("evt-1"),
            envelope("evt-1", "pay.completed.v1", json!({"amount": 10})),
        )]))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(header("last-event-id", "evt-1"))
        .respond_with(sse(&[(
            Some("evt-2"),
            envelope("evt-2", "pay.completed.v1", json!({"amount": 25})),
        )]))
        .up_to_n_times(1)
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .with_priority(10)
        .mount(&server)
        .await;

    let client = client(&server, |c| c);
    let amounts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&amounts);
    let _sub = client.subscribe_fn("pay.completed.v1", move |env| {
        seen.lock().push(env.data["amount"].as_i64().unwrap_or_default());
        Ok(())
    });

    client.start();
    wait_for(|| amounts.lock().len() >= 2).await;
    assert_eq!(*amounts.lock(), vec![10, 25]);

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("last-event-id").is_none());
    assert_eq!(
        requests[1].headers.get("last-event-id").and_then(|v| v.to_str().ok()),
        Some("evt-1")
    );
    assert_eq!(client.connection().last_event_id().as_deref(), Some("evt-2"));

    client.stop();
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn recovers_after_unavailable_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(sse(&[(None, envelope("a", "com.droid.bss.order.created.v1", json!({"orderId": "o-1"})))]))
        .up_to_n_times(1)
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .with_priority(10)
        .mount(&server)
        .await;

    let client = client(&server, |c| c);
    let router = client.domain_events();
    let mut typed = router.subscribe();

    client.start();
    let event = tokio::time::timeout(Duration::from_secs(5), typed.recv())
        .await
        .expect("no typed event")
        .unwrap();
    assert_eq!(event.meta.id, "a");
    assert_eq!(event.event.aggregate(), Some("order"));
    assert!(request_count(&server).await >= 3);
}

#[tokio::test]
async fn malformed_payload_does_not_stop_the_stream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(sse(&[
            (None, "{not json".to_string()),
            (None, envelope("ok", "customer.created.v1", json!({"customerId": "c-1"}))),
        ]))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let client = client(&server, |c| c.with_auto_reconnect(false));
    let ids = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&ids);
    let _sub = client.subscribe_fn("*", move |env| {
        seen.lock().push(env.id.clone());
        Ok(())
    });

    client.start();
    wait_for(|| !ids.lock().is_empty()).await;
    assert_eq!(*ids.lock(), vec!["ok".to_string()]);

    let stats = client.dispatcher().stats();
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.delivered, 1);
}

#[tokio::test]
async fn forwards_credential_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(sse(&[(None, envelope("1", "invoice.paid.v1", json!({"invoiceId": "i-1"})))]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(10)
        .mount(&server)
        .await;

    let client = client(&server, |c| {
        c.with_credential_header("Authorization", "Bearer secret")
            .with_auto_reconnect(false)
    });
    let hits = Arc::new(Mutex::new(0_u32));
    let seen = Arc::clone(&hits);
    let _sub = client.subscribe_fn("invoice.paid.v1", move |_| {
        *seen.lock() += 1;
        Ok(())
    });

    client.start();
    wait_for(|| *hits.lock() == 1).await;
}

#[tokio::test]
async fn stop_cancels_pending_reconnect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = client(&server, |c| c);
    client.start();
    wait_for(|| client.connection().attempts() == 1).await;
    client.stop();

    let before = request_count(&server).await;
    tokio::time::sleep(Duration::from_millis(BASE_DELAY_MS * 5)).await;
    assert_eq!(request_count(&server).await, before);
    assert_eq!(client.state(), ConnectionState::Closed);
}
