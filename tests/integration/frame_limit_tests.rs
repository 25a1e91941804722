//! Inbound frames over `protocol.max_frame_bytes` on a live connection.
//!
//! Covers:
//! - a response that follows an over-long line still reaches its caller
//! - a notification that follows an over-long line is still delivered
//! - several over-long lines in a row are each skipped
//! - a server disconnect after an over-long line is still seen as EOF

use serde_json::json;
use tokio::sync::mpsc;

use muxlink::{Client, ConnectionState, LogLevel, Notification};

use super::test_helpers::{capture_logs, eventually, test_config, LogRecords, MockServer, STEP};

const LIMIT: usize = 128;

/// Connect a client whose inbound frame limit is [`LIMIT`] bytes.
async fn limited_pair() -> (MockServer, Client) {
    let mut server = MockServer::start().await;
    let mut config = test_config(&server.endpoint());
    config.protocol.max_frame_bytes = LIMIT;
    let client = Client::new(config).expect("valid config");

    let (connected, ()) = tokio::join!(client.connect(STEP), server.accept());
    connected.expect("client connects");
    let _register = server.next_frame_of_type("register").await;

    (server, client)
}

/// A well-formed notification padded well past [`LIMIT`].
fn over_long_line() -> String {
    json!({"type": "notification", "event": "big", "data": "x".repeat(LIMIT * 3)}).to_string()
}

fn skip_warnings(logs: &LogRecords) -> usize {
    logs.lock()
        .unwrap()
        .iter()
        .filter(|(level, m)| *level == LogLevel::Warn && m.starts_with("skipping inbound frame"))
        .count()
}

// ── Frames after a skipped line ─────────────────────────────────────────────

/// A reply written right behind an over-long line lands in the same read
/// buffer; it must still resolve the waiting request without a disconnect.
#[tokio::test]
async fn response_after_over_long_line_resolves_the_request() {
    let (mut server, client) = limited_pair().await;
    let logs = capture_logs(&client);

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.request("echo", &json!({"text": "hi"}), STEP).await })
    };
    let request = server.next_frame_of_type("echo").await;

    server.push_raw(&over_long_line()).await;
    server.reply(&request, json!("hi")).await;

    let data = caller.await.expect("join").expect("request succeeds");
    assert_eq!(data, json!("hi"));
    assert!(client.is_connected());
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.pending_count(), 0);
    assert_eq!(skip_warnings(&logs), 1);
}

/// The notification behind an over-long line reaches the handler and the
/// oversized one never does.
#[tokio::test]
async fn notification_after_over_long_line_is_delivered() {
    let (mut server, client) = limited_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
    client.set_notification_handler(move |notification| {
        let _ = tx.send(notification);
    });

    server.push_raw(&over_long_line()).await;
    server
        .push(&json!({"type": "notification", "event": "small"}))
        .await;

    let notification = tokio::time::timeout(STEP, rx.recv())
        .await
        .expect("notification in time")
        .expect("channel open");
    assert_eq!(notification.event.as_deref(), Some("small"));
    assert!(client.is_connected());
}

/// Back-to-back over-long lines are each reported once and the response
/// after them is still routed.
#[tokio::test]
async fn consecutive_over_long_lines_are_each_skipped() {
    let (mut server, client) = limited_pair().await;
    let logs = capture_logs(&client);

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.request("echo", &json!({}), STEP).await })
    };
    let request = server.next_frame_of_type("echo").await;

    server.push_raw(&over_long_line()).await;
    server.push_raw(&over_long_line()).await;
    server.reply(&request, json!("after two")).await;

    assert_eq!(
        caller.await.expect("join").expect("request succeeds"),
        json!("after two")
    );
    assert_eq!(skip_warnings(&logs), 2);
    assert!(client.is_connected());
}

// ── End of stream ───────────────────────────────────────────────────────────

/// Skipping a line must not mask a real EOF that follows it.
#[tokio::test]
async fn disconnect_after_over_long_line_is_detected() {
    let (mut server, client) = limited_pair().await;
    let logs = capture_logs(&client);

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.request("long", &json!({}), STEP).await })
    };
    let _request = server.next_frame_of_type("long").await;

    server.push_raw(&over_long_line()).await;
    server.disconnect().await;

    let err = caller.await.expect("join").expect_err("must fail");
    assert!(err.is_connection_error(), "got {err:?}");
    assert!(eventually(|| !client.is_connected()).await);
    assert_eq!(client.pending_count(), 0);
    assert_eq!(skip_warnings(&logs), 1);
}
