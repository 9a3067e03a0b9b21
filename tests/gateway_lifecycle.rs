//! End-to-end lifecycle tests: echo, admission limits, inactivity and
//! registry shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use ws_gateway::{
    handler_fn, CloseCode, Connection, ConnectionRegistry, Context, Dispatcher, GatewayError,
    MessageType, PipeDispatcher, RegistryConfig,
};

mod common;

fn echo_dispatcher() -> Arc<PipeDispatcher> {
    let echo = handler_fn(|conn, req| {
        Box::pin(async move {
            conn.send(req.message_type(), Bytes::copy_from_slice(req.data()))
                .await
        })
    });

    Arc::new(PipeDispatcher::new(echo))
}

#[tokio::test]
async fn test_echo_roundtrip() {
    let (addr, handle) = common::start_gateway(echo_dispatcher(), RegistryConfig::default()).await;

    let mut client = common::connect_client(addr).await;

    client.send(Message::Text("ping".into())).await.unwrap();

    let reply = client.next().await.unwrap().unwrap();
    assert_eq!(reply.into_text().unwrap().as_str(), "ping");

    client.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();

    let reply = client.next().await.unwrap().unwrap();
    assert!(matches!(reply, Message::Binary(data) if data.as_ref() == [1u8, 2, 3]));

    handle.close(None).await;
}

#[tokio::test]
async fn test_connection_limit_rejects_before_upgrade() {
    let config = RegistryConfig {
        max_connections: 1,
        ..RegistryConfig::default()
    };
    let (addr, handle) = common::start_gateway(echo_dispatcher(), config).await;

    let _first = common::connect_client(addr).await;

    // Give the first upgrade time to land in the registry.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let rejected = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await;

    match rejected {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 503);
        }
        Ok(_) => panic!("second client must not be admitted"),
        Err(other) => panic!("unexpected handshake failure: {other}"),
    }

    handle.close(None).await;
}

#[tokio::test]
async fn test_registry_full_closes_with_try_again_later() {
    use axum::extract::ws::WebSocketUpgrade;
    use axum::extract::State;
    use axum::response::Response;
    use axum::routing::get;

    type UpgradeState = (Arc<ConnectionRegistry>, Arc<dyn Dispatcher>);

    // An upgrade route without the channel's pre-upgrade capacity check:
    // both clients get past the handshake and the registry's own admission
    // turns the second one away after the upgrade.
    async fn upgrade(
        State((registry, dispatcher)): State<UpgradeState>,
        ws: WebSocketUpgrade,
    ) -> Response {
        ws.on_upgrade(move |socket| async move {
            registry
                .handle_connection(&Context::new(), socket, dispatcher)
                .await;
        })
    }

    let registry = Arc::new(ConnectionRegistry::new(RegistryConfig {
        max_connections: 1,
        ..RegistryConfig::default()
    }));
    let dispatcher: Arc<dyn Dispatcher> = echo_dispatcher();

    let app = axum::Router::new()
        .route("/ws", get(upgrade))
        .with_state((registry, dispatcher));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let _first = common::connect_client(addr).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut second = common::connect_client(addr).await;
    let (code, reason) = common::await_close(&mut second, Duration::from_secs(1)).await;

    assert_eq!(code, 1013);
    assert_eq!(reason, "connection limit reached");
}

#[tokio::test]
async fn test_inactive_connection_is_closed_with_going_away() {
    let config = RegistryConfig {
        inactivity_timeout_ms: 10,
        ..RegistryConfig::default()
    };
    let (addr, handle) = common::start_gateway(echo_dispatcher(), config).await;

    let started = Instant::now();
    let mut client = common::connect_client(addr).await;

    let (code, reason) = common::await_close(&mut client, Duration::from_secs(1)).await;

    assert_eq!(code, 1001);
    assert_eq!(reason, "inactivity timeout");
    assert!(started.elapsed() < Duration::from_secs(1));

    handle.close(None).await;
}

#[tokio::test]
async fn test_registry_close_sends_service_restart() {
    let (addr, handle) = common::start_gateway(echo_dispatcher(), RegistryConfig::default()).await;

    let mut client = common::connect_client(addr).await;

    // Prove the connection is live before shutting down.
    client.send(Message::Text("up?".into())).await.unwrap();
    let reply = client.next().await.unwrap().unwrap();
    assert_eq!(reply.into_text().unwrap().as_str(), "up?");

    let closing = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.close(None).await })
    };

    let (code, _reason) = common::await_close(&mut client, Duration::from_secs(1)).await;
    assert_eq!(code, 1012);

    closing.await.unwrap();

    // A closed gateway rejects newcomers before the upgrade.
    let rejected = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await;
    assert!(rejected.is_err());
}

#[tokio::test]
async fn test_graceful_close_drains_in_flight_requests() {
    // The handler answers after 100ms; a close with a drain context must
    // let that response out before the close frame.
    let slow_echo = handler_fn(|conn, req| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            conn.send(req.message_type(), Bytes::copy_from_slice(req.data()))
                .await
        })
    });
    let dispatcher = Arc::new(PipeDispatcher::new(slow_echo));

    let (addr, handle) = common::start_gateway(dispatcher, RegistryConfig::default()).await;

    let mut client = common::connect_client(addr).await;
    client.send(Message::Text("work".into())).await.unwrap();

    // Let the frame reach the handler before closing.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let drain = ws_gateway::Context::new().with_timeout(Duration::from_secs(2));
    let closing = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.close(Some(drain)).await })
    };

    let reply = client.next().await.unwrap().unwrap();
    assert_eq!(reply.into_text().unwrap().as_str(), "work");

    let (code, _reason) = common::await_close(&mut client, Duration::from_secs(1)).await;
    assert_eq!(code, 1012);

    closing.await.unwrap();
}

#[tokio::test]
async fn test_close_racing_peer_close_sends_single_close_frame() {
    // A slow handler keeps one request in flight so the server-side close
    // parks in its drain wait with the connection in the closing state.
    let slow_echo = handler_fn(|conn, req| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            conn.send(req.message_type(), Bytes::copy_from_slice(req.data()))
                .await
        })
    });

    let (registry, captured) = common::capturing_registry(RegistryConfig::default());
    let (addr, _handle) =
        common::start_gateway_on_registry(Arc::new(PipeDispatcher::new(slow_echo)), registry)
            .await;

    let mut client = common::connect_client(addr).await;
    client.send(Message::Text("work".into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let conn = captured.lock().unwrap().clone().expect("connection captured");

    let server_close = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            let started = Instant::now();
            let drain = Context::new().with_timeout(Duration::from_secs(2));
            let result = conn
                .close(CloseCode::NORMAL_CLOSURE, "bye", Some(drain))
                .await;
            (result, started.elapsed())
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The peer closes mid-drain. The read loop's terminal transition must
    // defer to the in-flight close instead of writing its own close frame
    // or canceling the context under the drain wait.
    client.send(Message::Close(None)).await.unwrap();

    let mut close_frames = 0;
    while let Some(frame) = client.next().await {
        match frame {
            Ok(Message::Close(_)) => close_frames += 1,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    assert_eq!(close_frames, 1);

    let (result, close_duration) = server_close.await.unwrap();
    result.unwrap();

    // The peer's close must not have short-circuited the drain: the close
    // call only returns once the in-flight request finished.
    assert!(
        close_duration >= Duration::from_millis(150),
        "drain was cut short: {close_duration:?}"
    );
}

#[tokio::test]
async fn test_send_after_close_returns_connection_closed() {
    let (registry, captured) = common::capturing_registry(RegistryConfig::default());
    let (addr, _handle) =
        common::start_gateway_on_registry(echo_dispatcher(), registry).await;

    let mut client = common::connect_client(addr).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let conn = captured.lock().unwrap().clone().expect("connection captured");

    conn.close(CloseCode::NORMAL_CLOSURE, "done", None)
        .await
        .unwrap();

    let err = conn
        .send(MessageType::Text, Bytes::from_static(b"late"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ConnectionClosed));

    // Closing again is rejected the same way.
    let err = conn
        .close(CloseCode::NORMAL_CLOSURE, "again", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ConnectionClosed));

    let (code, _reason) = common::await_close(&mut client, Duration::from_secs(1)).await;
    assert_eq!(code, 1000);
}

#[tokio::test]
async fn test_frames_during_flight_are_all_answered() {
    let (addr, handle) = common::start_gateway(echo_dispatcher(), RegistryConfig::default()).await;

    let mut client = common::connect_client(addr).await;

    for i in 0..10 {
        client
            .send(Message::Text(format!("msg-{i}").into()))
            .await
            .unwrap();
    }

    // Responses may arrive out of order; collect and compare as sets.
    let mut got = Vec::new();
    for _ in 0..10 {
        let reply = client.next().await.unwrap().unwrap();
        got.push(reply.into_text().unwrap().to_string());
    }
    got.sort();

    let mut want: Vec<String> = (0..10).map(|i| format!("msg-{i}")).collect();
    want.sort();

    assert_eq!(got, want);

    handle.close(None).await;
}
