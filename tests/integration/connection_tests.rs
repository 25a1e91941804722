//! Connection lifecycle: connect, close, disconnect, and state reporting.

use std::time::Duration;

use serde_json::json;

use muxlink::{Client, ClientConfig, ClientError, ConnectionState};

use super::test_helpers::{capture_logs, connected_pair, eventually, test_config, MockServer, STEP};

// ── Construction ────────────────────────────────────────────────────────────

/// A fresh client is disconnected with nothing pending.
#[tokio::test]
async fn new_client_starts_disconnected() {
    let client = Client::new(ClientConfig::new("127.0.0.1:1")).expect("valid config");

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.is_connected());
    assert_eq!(client.pending_count(), 0);
}

/// `Client::new` validates its config.
#[tokio::test]
async fn invalid_config_is_rejected_at_construction() {
    let err = Client::new(ClientConfig::new("nope")).expect_err("must fail");
    assert!(matches!(err, ClientError::Config(_)));
}

/// Without a connection both calls fail at once with `NotConnected`.
#[tokio::test]
async fn send_and_request_while_disconnected_fail_immediately() {
    let client = Client::new(ClientConfig::new("127.0.0.1:1")).expect("valid config");

    let sent = tokio::time::timeout(Duration::from_millis(200), client.send("x", &json!({})))
        .await
        .expect("send must not block");
    assert_eq!(sent, Err(ClientError::NotConnected));

    let requested = tokio::time::timeout(
        Duration::from_millis(200),
        client.request("x", &json!({}), STEP),
    )
    .await
    .expect("request must not block");
    assert_eq!(requested, Err(ClientError::NotConnected));
    assert_eq!(client.pending_count(), 0);
}

// ── Connect ─────────────────────────────────────────────────────────────────

/// The first frame after connecting is the registration frame.
#[tokio::test]
async fn connect_sends_registration_frame() {
    let mut server = MockServer::start().await;
    let client = Client::new(test_config(&server.endpoint())).expect("valid config");

    let (connected, ()) = tokio::join!(client.connect(STEP), server.accept());
    connected.expect("connect");
    assert!(client.is_connected());

    let register = server.next_frame().await;
    assert_eq!(register["type"], "register");
    assert_eq!(register["client"], "muxlink-test");
    assert_eq!(register["version"], env!("CARGO_PKG_VERSION"));
    assert!(register["id"].is_string());
    assert!(register["pid"].is_u64());
    assert!(register["connected_at"].is_string());
}

/// Connecting while connected is a no-op.
#[tokio::test]
async fn connect_when_already_connected_is_a_no_op() {
    let (_server, client) = connected_pair().await;

    client.connect(STEP).await.expect("second connect");
    assert!(client.is_connected());
}

/// A refused connect returns a connection error, logs it, and leaves the
/// client disconnected.
#[tokio::test]
async fn connect_to_closed_port_fails_and_stays_disconnected() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let client = Client::new(ClientConfig::new(format!("127.0.0.1:{port}"))).expect("valid");
    let logs = capture_logs(&client);

    let err = client.connect(STEP).await.expect_err("nothing is listening");

    assert!(matches!(err, ClientError::Connection(_)), "got {err:?}");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(logs
        .lock()
        .unwrap()
        .iter()
        .any(|(_, m)| m.starts_with("connect failed")));
}

// ── Close ───────────────────────────────────────────────────────────────────

/// A second close succeeds and the client stays closed.
#[tokio::test]
async fn close_is_idempotent() {
    let (mut server, client) = connected_pair().await;

    client.close().await.expect("first close");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(server.client_closed().await);

    client.close().await.expect("second close");
    assert_eq!(
        client.send("x", &json!({})).await,
        Err(ClientError::NotConnected)
    );
}

/// Closing a client that never connected succeeds.
#[tokio::test]
async fn close_without_connect_is_ok() {
    let client = Client::new(ClientConfig::new("127.0.0.1:1")).expect("valid config");
    client.close().await.expect("close");
}

/// Closing fails in-flight requests with "connection closed".
#[tokio::test]
async fn close_fails_pending_requests() {
    let (mut server, client) = connected_pair().await;

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.request("long", &json!({}), STEP).await })
    };
    let _request = server.next_frame_of_type("long").await;

    client.close().await.expect("close");

    let err = caller.await.expect("join").expect_err("must fail");
    assert_eq!(err, ClientError::Connection("connection closed".into()));
    assert_eq!(client.pending_count(), 0);
}

/// A send parked on a full socket must not keep `close` waiting; the
/// shutdown is bounded by the connect timeout.
#[tokio::test]
async fn close_is_bounded_when_a_write_is_stalled() {
    let mut server = MockServer::start().await;
    let mut config = test_config(&server.endpoint());
    config.timeouts.connect_seconds = 1;
    let client = Client::new(config).expect("valid config");
    let (connected, ()) = tokio::join!(client.connect(STEP), server.accept());
    connected.expect("connect");

    // The server never reads, so the socket buffers fill and one send
    // ends up parked inside the writer.
    let flooder = {
        let client = client.clone();
        tokio::spawn(async move {
            let blob = "x".repeat(1 << 20);
            while client.send("bulk", &json!({"blob": blob})).await.is_ok() {}
        })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!flooder.is_finished(), "writes should be stalled");

    let closed = tokio::time::timeout(STEP, client.close())
        .await
        .expect("close must not wait on the stalled write");

    if let Err(err) = closed {
        assert!(err.to_string().contains("timed out"), "got {err:?}");
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.pending_count(), 0);
    flooder.abort();
    drop(server);
}

// ── Server disconnect ───────────────────────────────────────────────────────

/// Server EOF fails in-flight requests and publishes `Disconnected`.
#[tokio::test]
async fn server_disconnect_fails_pending_and_marks_disconnected() {
    let (mut server, client) = connected_pair().await;
    let mut state = client.subscribe_state();

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.request("long", &json!({}), STEP).await })
    };
    let _request = server.next_frame_of_type("long").await;

    server.disconnect().await;

    let err = caller.await.expect("join").expect_err("must fail");
    assert!(err.is_connection_error(), "got {err:?}");
    assert!(err.to_string().contains("connection lost"));

    tokio::time::timeout(
        STEP,
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .expect("state change in time")
    .expect("sender alive");
    assert!(!client.is_connected());
    assert_eq!(client.pending_count(), 0);
}

/// With `fail_pending_on_disconnect` off, requests run to their own deadline.
#[tokio::test]
async fn disconnect_without_drain_leaves_requests_to_their_deadline() {
    let mut server = MockServer::start().await;
    let mut config = test_config(&server.endpoint());
    config.protocol.fail_pending_on_disconnect = false;
    let client = Client::new(config).expect("valid config");
    let (connected, ()) = tokio::join!(client.connect(STEP), server.accept());
    connected.expect("connect");

    let caller = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .request("long", &json!({}), Duration::from_millis(300))
                .await
        })
    };
    let _request = server.next_frame_of_type("long").await;
    server.disconnect().await;

    let err = caller.await.expect("join").expect_err("must fail");
    assert!(matches!(err, ClientError::Timeout { .. }), "got {err:?}");
    assert_eq!(client.pending_count(), 0);
}

/// `connect` after a lost connection registers again and serves requests.
#[tokio::test]
async fn reconnect_after_server_disconnect() {
    let (mut server, client) = connected_pair().await;

    server.disconnect().await;
    assert!(eventually(|| !client.is_connected()).await);

    let (connected, ()) = tokio::join!(client.connect(STEP), server.accept());
    connected.expect("reconnect");
    let register = server.next_frame_of_type("register").await;
    assert!(register["id"].is_string());

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.request("echo", &json!({}), STEP).await })
    };
    let request = server.next_frame_of_type("echo").await;
    server.reply(&request, json!("again")).await;
    assert_eq!(caller.await.expect("join").expect("echo"), json!("again"));
}

// ── State ───────────────────────────────────────────────────────────────────

/// State subscribers see connect and close transitions.
#[tokio::test]
async fn state_transitions_are_observable() {
    let mut server = MockServer::start().await;
    let client = Client::new(test_config(&server.endpoint())).expect("valid config");
    let state = client.subscribe_state();
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);

    let (connected, ()) = tokio::join!(client.connect(STEP), server.accept());
    connected.expect("connect");
    assert_eq!(*state.borrow(), ConnectionState::Connected);

    client.close().await.expect("close");
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);
}

/// `Debug` shows the endpoint and current state.
#[tokio::test]
async fn debug_output_names_endpoint_and_state() {
    let client = Client::new(ClientConfig::new("127.0.0.1:9")).expect("valid config");
    let rendered = format!("{client:?}");
    assert!(rendered.contains("127.0.0.1"));
    assert!(rendered.contains("Disconnected"));
}
