//! One WebSocket peer: read loop, state machine, inactivity supervision.
//!
//! # State Transitions
//! ```text
//! Connected → Closing: graceful close requested, reads discarded,
//!                      in-flight callbacks drain
//! Closing   → Terminated: close frame written, context canceled
//! Connected → Terminated: read loop hit EOF, a peer close, or an error
//! ```
//!
//! # Design Decisions
//! - Transitions go through compare-and-set so exactly one closer wins,
//!   and only the winning transition performs side effects
//! - An in-flight `close` owns the close frame and the context
//!   cancellation; the read loop's terminal transition defers to it
//! - The reader stops pulling frames while the concurrency semaphore is
//!   exhausted, which is the connection's back-pressure
//! - Read errors are terminal but never propagate out of the read loop

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::time::Instant;
use uuid::Uuid;

use crate::context::Context;
use crate::dispatch::{Connection, Dispatcher};
use crate::error::GatewayError;
use crate::message::{self, CloseCode, MessageType};
use crate::sync::wait_group::WaitGroup;

use super::buffer_pool::{BufferPool, Payload};

const STATE_CONNECTED: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_TERMINATED: u8 = 2;

/// A live WebSocket peer managed by the registry.
pub struct Conn {
    id: String,
    ctx: Context,
    state: AtomicU8,
    writer: AsyncMutex<SplitSink<WebSocket, WsMessage>>,
    reader: AsyncMutex<Option<SplitStream<WebSocket>>>,
    dispatcher: Arc<dyn Dispatcher>,
    in_flight: Arc<WaitGroup>,
    sem: Arc<Semaphore>,
    buffer_pool: Arc<BufferPool>,
    inactivity_timeout: Option<Duration>,
    idle_deadline: parking_lot::Mutex<Instant>,
}

impl Conn {
    /// Builds a connection around an upgraded socket and starts inactivity
    /// supervision when a timeout is configured.
    pub(crate) fn new(
        ctx: &Context,
        socket: WebSocket,
        dispatcher: Arc<dyn Dispatcher>,
        buffer_pool: Arc<BufferPool>,
        concurrency_limit: u32,
        inactivity_timeout: Option<Duration>,
    ) -> Arc<Self> {
        let (writer, reader) = socket.split();

        let idle_deadline = Instant::now() + inactivity_timeout.unwrap_or(Duration::from_secs(0));

        let conn = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            ctx: ctx.child(),
            state: AtomicU8::new(STATE_CONNECTED),
            writer: AsyncMutex::new(writer),
            reader: AsyncMutex::new(Some(reader)),
            dispatcher,
            in_flight: WaitGroup::new(),
            sem: Arc::new(Semaphore::new(concurrency_limit as usize)),
            buffer_pool,
            inactivity_timeout,
            idle_deadline: parking_lot::Mutex::new(idle_deadline),
        });

        if inactivity_timeout.is_some() {
            conn.touch();
            tokio::spawn(Arc::clone(&conn).watch_inactivity());
        }

        conn
    }

    /// Reads frames and spawns the dispatcher callback for each one.
    ///
    /// Runs until the peer goes away, a read fails, or the connection is
    /// closed. Must only be invoked once per connection.
    pub(crate) async fn handle_requests(self: &Arc<Self>) {
        let Some(mut reader) = self.reader.lock().await.take() else {
            tracing::warn!(conn_id = %self.id, "read loop started twice, ignoring");
            return;
        };

        let mut peer_close: Option<(CloseCode, String)> = None;

        loop {
            if self.ctx.is_done() {
                break;
            }

            // Back-pressure: stop reading while the concurrency limit is
            // exhausted; a slot frees when a callback task finishes.
            let permit = tokio::select! {
                permit = Arc::clone(&self.sem).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.ctx.done() => break,
            };

            self.touch();

            let frame = tokio::select! {
                frame = reader.next() => frame,
                _ = self.ctx.done() => break,
            };

            let frame = match frame {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    tracing::warn!(conn_id = %self.id, error = %err, "error reading frame");
                    break;
                }
                None => break,
            };

            let (msg_type, data): (MessageType, &[u8]) = match &frame {
                WsMessage::Text(text) => (MessageType::Text, text.as_str().as_bytes()),
                WsMessage::Binary(data) => (MessageType::Binary, data),
                WsMessage::Close(close_frame) => {
                    peer_close = close_frame
                        .as_ref()
                        .map(|f| (CloseCode(f.code), f.reason.to_string()));
                    break;
                }
                // Pings are answered by the protocol layer.
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            };

            if self.state.load(Ordering::Acquire) == STATE_CLOSING {
                continue;
            }

            let mut buffer = self.buffer_pool.get();
            buffer.extend_from_slice(data);
            let payload = Payload::pooled(buffer, &self.buffer_pool);

            metrics::counter!("gateway_frames_total").increment(1);

            let guard = self.in_flight.enter();
            let conn = Arc::clone(self) as Arc<dyn Connection>;
            let dispatcher = Arc::clone(&self.dispatcher);

            tokio::spawn(async move {
                dispatcher.dispatch(conn, msg_type, payload).await;

                // Payload, permit and guard drop here: the buffer returns
                // to the pool, a read slot frees, and the drain counter
                // falls.
                drop(permit);
                drop(guard);
            });
        }

        self.terminate(peer_close).await;
    }

    /// Terminal transition driven by the read loop.
    ///
    /// When the read loop is the first closer (EOF, peer close or a read
    /// error with no explicit `close` in flight), it echoes the peer's
    /// close code when one was received, writes the close frame, cancels
    /// the context and waits out in-flight callbacks.
    ///
    /// When an explicit `close` already moved the connection to Closing,
    /// that call owns the close frame and the cancellation; writing a
    /// second close frame here would violate the protocol and canceling
    /// the context would defeat the caller's drain wait. The read loop
    /// then only marks the state terminal and waits for the close call to
    /// finish, so the registry's disconnect hook runs after the context is
    /// canceled.
    async fn terminate(&self, peer_close: Option<(CloseCode, String)>) {
        if self
            .state
            .compare_exchange(
                STATE_CONNECTED,
                STATE_TERMINATED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.ctx.cancel();

            let (code, reason) =
                peer_close.unwrap_or((CloseCode::NORMAL_CLOSURE, String::new()));

            let mut writer = self.writer.lock().await;
            let _ = writer
                .send(message::downstream_close_message(code, &reason))
                .await;
            drop(writer);

            self.in_flight.wait_idle().await;
            return;
        }

        if self
            .state
            .compare_exchange(
                STATE_CLOSING,
                STATE_TERMINATED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.ctx.done().await;
            self.in_flight.wait_idle().await;
        }
    }

    /// Pushes the inactivity deadline forward.
    fn touch(&self) {
        if let Some(timeout) = self.inactivity_timeout {
            *self.idle_deadline.lock() = Instant::now() + timeout;
        }
    }

    /// Closes the connection when the idle deadline passes without being
    /// pushed forward by a read or a send.
    async fn watch_inactivity(self: Arc<Self>) {
        loop {
            let deadline = *self.idle_deadline.lock();

            tokio::select! {
                _ = self.ctx.done() => return,
                _ = tokio::time::sleep_until(deadline) => {
                    if *self.idle_deadline.lock() <= Instant::now() {
                        let _ = Connection::close(
                            self.as_ref(),
                            CloseCode::GOING_AWAY,
                            "inactivity timeout",
                            None,
                        )
                        .await;
                        return;
                    }
                }
            }
        }
    }

    fn is_terminated(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_TERMINATED || self.ctx.is_done()
    }
}

#[async_trait::async_trait]
impl Connection for Conn {
    fn id(&self) -> &str {
        &self.id
    }

    fn context(&self) -> &Context {
        &self.ctx
    }

    async fn send(&self, msg_type: MessageType, data: Bytes) -> Result<(), GatewayError> {
        if self.is_terminated() {
            return Err(GatewayError::ConnectionClosed);
        }

        let frame = message::to_downstream_message(msg_type, data)?;

        let mut writer = self.writer.lock().await;
        writer
            .send(frame)
            .await
            .map_err(|_| GatewayError::ConnectionClosed)?;
        drop(writer);

        self.touch();

        Ok(())
    }

    async fn close(
        &self,
        code: CloseCode,
        reason: &str,
        drain: Option<Context>,
    ) -> Result<(), GatewayError> {
        self.state
            .compare_exchange(
                STATE_CONNECTED,
                STATE_CLOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| GatewayError::ConnectionClosed)?;

        if let Some(drain_ctx) = drain {
            tokio::select! {
                _ = self.in_flight.wait_idle() => {}
                _ = drain_ctx.done() => {}
                _ = self.ctx.done() => {}
            }
        }

        let mut writer = self.writer.lock().await;
        let _ = writer
            .send(message::downstream_close_message(code, reason))
            .await;
        drop(writer);

        self.ctx.cancel();
        self.state.store(STATE_TERMINATED, Ordering::Release);

        tracing::debug!(conn_id = %self.id, code = %code, reason = %reason, "connection closed");

        Ok(())
    }
}
