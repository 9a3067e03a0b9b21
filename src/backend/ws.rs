//! Upstream WebSocket backend with per-client upstream reuse.
//!
//! # Data Flow
//! ```text
//! downstream request
//!     → look up upstream for the downstream connection id
//!     → missing: single-flight dial, register sink, spawn response pump
//!     → write (type, bytes) built by the request factory
//! response pump: upstream frame → downstream send, until either side dies
//! ```
//!
//! # Design Decisions
//! - At most one upstream socket per downstream connection; concurrent
//!   requests coalesce on the dial through the single-flight group
//! - A pump failure closes both sides; upstream close codes are propagated
//!   to the downstream, anything else becomes `1000 NormalClosure`

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message as TgMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::context::Context;
use crate::dispatch::{Connection, Request, RequestHandler};
use crate::error::GatewayError;
use crate::message::{self, CloseCode, MessageType};
use crate::sync::single_flight::Group;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type UpstreamSink = Arc<AsyncMutex<SplitSink<WsStream, TgMessage>>>;

/// Builds the outbound frame for one request.
pub type WsRequestFactory =
    Arc<dyn Fn(&Request) -> Result<(MessageType, Bytes), GatewayError> + Send + Sync>;

/// Establishes an upstream socket; replaceable for custom handshakes and
/// tests.
pub type Dialer =
    Arc<dyn Fn(Context, String) -> BoxFuture<'static, Result<WsStream, GatewayError>> + Send + Sync>;

/// Forwards requests to an upstream WebSocket service, one upstream socket
/// per downstream connection.
pub struct WsBackend {
    url: String,
    factory: WsRequestFactory,
    dialer: Dialer,
    upstreams: Arc<DashMap<String, UpstreamSink>>,
    dial_group: Group<String, Result<UpstreamSink, Arc<GatewayError>>>,
}

impl WsBackend {
    pub fn new(url: impl Into<String>, factory: WsRequestFactory) -> Self {
        Self {
            url: url.into(),
            factory,
            dialer: default_dialer(),
            upstreams: Arc::new(DashMap::new()),
            dial_group: Group::new(),
        }
    }

    /// Replaces the dialer used to establish upstream sockets.
    pub fn with_dialer(mut self, dialer: Dialer) -> Self {
        self.dialer = dialer;
        self
    }

    /// Returns the upstream sink for this downstream connection, dialing
    /// once under concurrent calls.
    async fn upstream(&self, conn: &Arc<dyn Connection>) -> Result<UpstreamSink, GatewayError> {
        if let Some(sink) = self.upstreams.get(conn.id()) {
            return Ok(Arc::clone(sink.value()));
        }

        let dialer = Arc::clone(&self.dialer);
        let upstreams = Arc::clone(&self.upstreams);
        let url = self.url.clone();
        let conn = Arc::clone(conn);

        self.dial_group
            .run(conn.id().to_owned(), move || async move {
                // A pump registered between the lookup and the dial wins.
                if let Some(sink) = upstreams.get(conn.id()) {
                    return Ok(Arc::clone(sink.value()));
                }

                let stream = match dialer(conn.context().clone(), url).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = conn
                            .close(CloseCode::INTERNAL_ERROR, "upstream dial failed", None)
                            .await;
                        return Err(Arc::new(err));
                    }
                };

                let (sink, stream) = stream.split();
                let sink = Arc::new(AsyncMutex::new(sink));

                upstreams.insert(conn.id().to_owned(), Arc::clone(&sink));

                tokio::spawn(pump_responses(
                    stream,
                    Arc::clone(&conn),
                    Arc::clone(&sink),
                    upstreams,
                ));

                tracing::debug!(conn_id = %conn.id(), "upstream websocket established");

                Ok(sink)
            })
            .await
            .map_err(GatewayError::Shared)
    }
}

#[async_trait]
impl RequestHandler for WsBackend {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        let sink = self.upstream(&conn).await?;

        let (msg_type, data) = (self.factory)(&req)?;
        let frame = message::to_upstream_message(msg_type, data)?;

        let ctx = req.context();
        let mut sink = sink.lock().await;

        tokio::select! {
            result = sink.send(frame) => result.map_err(GatewayError::from),
            _ = ctx.done() => Err(ctx.error()),
        }
    }
}

/// Forwards upstream frames to the downstream connection until either side
/// goes away, then closes both and drops the upstream registration.
async fn pump_responses(
    mut stream: SplitStream<WsStream>,
    downstream: Arc<dyn Connection>,
    sink: UpstreamSink,
    upstreams: Arc<DashMap<String, UpstreamSink>>,
) {
    let ctx = downstream.context().clone();
    let mut upstream_close: Option<(CloseCode, String)> = None;

    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = ctx.done() => break,
        };

        match frame {
            Some(Ok(TgMessage::Text(text))) => {
                let data = Bytes::copy_from_slice(text.as_bytes());
                if downstream.send(MessageType::Text, data).await.is_err() {
                    break;
                }
            }
            Some(Ok(TgMessage::Binary(data))) => {
                if downstream.send(MessageType::Binary, data).await.is_err() {
                    break;
                }
            }
            Some(Ok(TgMessage::Close(close_frame))) => {
                upstream_close =
                    close_frame.map(|f| (CloseCode(u16::from(f.code)), f.reason.to_string()));
                break;
            }
            // Control frames are handled by the protocol layer.
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                tracing::warn!(conn_id = %downstream.id(), error = %err, "upstream read failed");
                break;
            }
            None => break,
        }
    }

    upstreams.remove(downstream.id());

    let (code, reason) =
        upstream_close.unwrap_or((CloseCode::NORMAL_CLOSURE, "connection closed".to_owned()));

    {
        let mut sink = sink.lock().await;
        let _ = sink
            .send(message::upstream_close_message(code, &reason))
            .await;
        let _ = sink.close().await;
    }

    let _ = downstream.close(code, &reason, None).await;

    tracing::debug!(conn_id = %downstream.id(), code = %code, "upstream websocket torn down");
}

fn default_dialer() -> Dialer {
    Arc::new(|ctx, url| {
        Box::pin(async move {
            let connecting = connect_async(url);

            tokio::select! {
                result = connecting => {
                    let (stream, _response) = result?;
                    Ok(stream)
                }
                _ = ctx.done() => Err(ctx.error()),
            }
        })
    })
}
