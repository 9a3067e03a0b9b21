//! Shared helpers for the end-to-end tests.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use ws_gateway::{
    Channel, ChannelConfig, Conn, ConnectionRegistry, Dispatcher, RegistryConfig, Server,
    ServerConfig, ServerHandle,
};

pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A registry that exposes the most recently admitted connection.
pub fn capturing_registry(
    config: RegistryConfig,
) -> (
    Arc<ConnectionRegistry>,
    Arc<std::sync::Mutex<Option<Arc<Conn>>>>,
) {
    let captured: Arc<std::sync::Mutex<Option<Arc<Conn>>>> =
        Arc::new(std::sync::Mutex::new(None));

    let registry = {
        let captured = Arc::clone(&captured);
        Arc::new(
            ConnectionRegistry::new(config).with_on_connect(move |conn| {
                *captured.lock().unwrap() = Some(Arc::clone(conn));
            }),
        )
    };

    (registry, captured)
}

/// Starts a gateway with one channel at `/ws` on an ephemeral port.
pub async fn start_gateway(
    dispatcher: Arc<dyn Dispatcher>,
    registry_config: RegistryConfig,
) -> (SocketAddr, ServerHandle) {
    let registry = Arc::new(ConnectionRegistry::new(registry_config));
    start_gateway_on_registry(dispatcher, registry).await
}

/// Starts a gateway at `/ws` around a caller-built registry.
pub async fn start_gateway_on_registry(
    dispatcher: Arc<dyn Dispatcher>,
    registry: Arc<ConnectionRegistry>,
) -> (SocketAddr, ServerHandle) {
    let channel = Channel::new("/ws", dispatcher, registry, ChannelConfig::default());

    let mut server = Server::new(ServerConfig {
        addr: "127.0.0.1:0".to_owned(),
    });
    server.add_channel(channel);

    let (ready_tx, ready_rx) = oneshot::channel();
    let server = server.with_ready_signal(ready_tx);
    let handle = server.handle();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    let addr = ready_rx.await.expect("server became ready");
    (addr, handle)
}

/// Connects a WebSocket client to the gateway's `/ws` channel.
pub async fn connect_client(addr: SocketAddr) -> ClientSocket {
    let (socket, _response) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("client connected");
    socket
}

/// Reads frames until a close frame arrives, returning its code and reason.
pub async fn await_close(socket: &mut ClientSocket, within: Duration) -> (u16, String) {
    let deadline = tokio::time::Instant::now() + within;

    loop {
        let frame = tokio::time::timeout_at(deadline, socket.next())
            .await
            .expect("close frame before deadline")
            .expect("socket still open");

        match frame.expect("readable frame") {
            Message::Close(Some(frame)) => {
                return (u16::from(frame.code), frame.reason.to_string());
            }
            Message::Close(None) => return (1005, String::new()),
            _ => continue,
        }
    }
}

/// Starts a one-response-per-connection HTTP backend on an ephemeral port.
///
/// Every request is answered with `200 OK` and `body` after `delay`.
pub async fn start_http_backend(body: &'static str, delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;

                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Starts a WebSocket upstream that echoes every data frame.
pub async fn start_ws_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(async move {
                        let Ok(mut upstream) = tokio_tungstenite::accept_async(stream).await
                        else {
                            return;
                        };

                        while let Some(Ok(frame)) = upstream.next().await {
                            if frame.is_text() || frame.is_binary() {
                                if upstream.send(frame).await.is_err() {
                                    break;
                                }
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
