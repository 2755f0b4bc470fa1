use anyhow::Result;
use lib_realtime::{ConnectionState, Frame, OutboundFrame, RealtimeClient, RealtimeOptions, SendOutcome};
use project_tests::{LoopbackServer, STEP_TIMEOUT};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn options() -> RealtimeOptions {
    RealtimeOptions {
        reconnect_base_delay_ms: 50,
        reconnect_max_delay_ms: 200,
        heartbeat_interval_ms: 0,
        jitter_ratio: 0.0,
        ..RealtimeOptions::default()
    }
}

async fn wait_for_state(client: &RealtimeClient, state: ConnectionState) -> Result<()> {
    let mut rx = client.watch_state();
    timeout(STEP_TIMEOUT, rx.wait_for(|current| *current == state)).await??;
    Ok(())
}

#[tokio::test]
async fn frames_flow_both_ways_over_a_real_socket() -> Result<()> {
    init_logs();
    let mut server = LoopbackServer::bind().await?;
    let client = RealtimeClient::websocket(server.url(), options())?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _alerts = client.subscribe("alerts", move |frame| {
        tx.send(frame.clone())?;
        Ok(())
    });
    assert_eq!(client.send(OutboundFrame::new("hello", json!({ "v": 1 }))), SendOutcome::Queued);

    client.connect();
    let mut conn = server.accept().await?;
    wait_for_state(&client, ConnectionState::Open).await?;

    let queued = conn.next_frame().await?.expect("queued frame");
    assert_eq!(queued.topic, "hello");
    assert_eq!(queued.data, json!({ "v": 1 }));

    assert_eq!(
        client.send(OutboundFrame::new("ack", json!(true)).with_correlation_id("c-1")),
        SendOutcome::Sent
    );
    let sent = conn.next_frame().await?.expect("live frame");
    assert_eq!(sent.correlation_id.as_deref(), Some("c-1"));

    conn.send_frame(&Frame::new("alerts", json!({ "level": "high" }))).await?;
    let received = timeout(STEP_TIMEOUT, rx.recv()).await?.expect("dispatched frame");
    assert_eq!(received.data, json!({ "level": "high" }));

    client.disconnect();
    Ok(())
}

#[tokio::test]
async fn disconnect_sends_a_normal_close_frame() -> Result<()> {
    init_logs();
    let mut server = LoopbackServer::bind().await?;
    let client = RealtimeClient::websocket(server.url(), options())?;
    client.connect();
    let mut conn = server.accept().await?;
    wait_for_state(&client, ConnectionState::Open).await?;

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Closed);
    match conn.next_message().await? {
        Some(Message::Close(Some(frame))) => assert_eq!(u16::from(frame.code), 1000),
        other => panic!("expected a close frame, got {other:?}"),
    }
    assert!(!server.accepts_within(Duration::from_millis(300)).await);
    Ok(())
}

#[tokio::test]
async fn abnormal_server_close_triggers_reconnect() -> Result<()> {
    init_logs();
    let mut server = LoopbackServer::bind().await?;
    let client = RealtimeClient::websocket(server.url(), options())?;
    client.connect();
    let mut conn = server.accept().await?;
    wait_for_state(&client, ConnectionState::Open).await?;

    conn.close(4001, "restarting").await?;
    let _again = server.accept().await?;
    wait_for_state(&client, ConnectionState::Open).await?;
    assert_eq!(client.status().attempt, 0);

    client.disconnect();
    Ok(())
}

#[tokio::test]
async fn normal_server_close_is_final() -> Result<()> {
    init_logs();
    let mut server = LoopbackServer::bind().await?;
    let client = RealtimeClient::websocket(server.url(), options())?;
    client.connect();
    let mut conn = server.accept().await?;
    wait_for_state(&client, ConnectionState::Open).await?;

    conn.close(1000, "bye").await?;
    wait_for_state(&client, ConnectionState::Closed).await?;
    assert!(!server.accepts_within(Duration::from_millis(300)).await);
    Ok(())
}

#[tokio::test]
async fn heartbeats_answered_by_the_server_keep_the_link() -> Result<()> {
    init_logs();
    let mut server = LoopbackServer::bind().await?;
    let client = RealtimeClient::websocket(
        server.url(),
        RealtimeOptions {
            heartbeat_interval_ms: 100,
            heartbeat_timeout_ms: 200,
            ..options()
        },
    )?;
    client.connect();
    let conn = server.accept().await?;
    tokio::spawn(conn.pump());
    wait_for_state(&client, ConnectionState::Open).await?;

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(client.state(), ConnectionState::Open);
    assert!(!server.accepts_within(Duration::from_millis(50)).await);

    client.disconnect();
    Ok(())
}

#[tokio::test]
async fn unreachable_endpoint_schedules_retries() -> Result<()> {
    init_logs();
    // Bind then drop to get a port nobody listens on.
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };
    let client = RealtimeClient::websocket(
        &format!("ws://127.0.0.1:{port}/ws"),
        RealtimeOptions {
            max_reconnect_attempts: Some(2),
            ..options()
        },
    )?;
    let mut diagnostics = client.diagnostics();
    client.connect();

    // The initial attempt plus two retries.
    let mut failures = 0;
    while failures < 3 {
        if let lib_realtime::Diagnostic::ConnectFailed { .. } = timeout(STEP_TIMEOUT, diagnostics.recv()).await?? {
            failures += 1;
        }
    }
    wait_for_state(&client, ConnectionState::Closed).await?;
    assert!(client.status().retries_exhausted);
    Ok(())
}
