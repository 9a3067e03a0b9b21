//! Connection admission, bookkeeping and bulk shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::WebSocket;
use futures_util::future::join_all;
use parking_lot::RwLock;

use crate::config::RegistryConfig;
use crate::context::Context;
use crate::dispatch::{Connection, Dispatcher};
use crate::message::{self, CloseCode};

use super::buffer_pool::BufferPool;
use super::connection::Conn;

/// Observes connection lifecycle events.
///
/// Hooks run synchronously on the accept and close paths; hooks that need
/// to block should spawn their own task.
pub type ConnectionHook = Arc<dyn Fn(&Arc<Conn>) + Send + Sync>;

/// Owns all live connections of a channel.
///
/// Admission enforces the global connection limit, every accepted socket is
/// tracked until its read loop returns, and a bulk close tears the whole set
/// down with `1012 ServiceRestart`.
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
    buffer_pool: Arc<BufferPool>,
    config: RegistryConfig,
    on_connect: Option<ConnectionHook>,
    on_disconnect: Option<ConnectionHook>,
}

struct RegistryInner {
    connections: HashMap<String, Arc<Conn>>,
    closed: bool,
}

enum Admission {
    Accepted(Arc<Conn>),
    Rejected(WebSocket, CloseCode, &'static str),
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                connections: HashMap::new(),
                closed: false,
            }),
            buffer_pool: BufferPool::new(),
            config,
            on_connect: None,
            on_disconnect: None,
        }
    }

    /// Installs a hook invoked after a connection is admitted.
    pub fn with_on_connect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Arc<Conn>) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Installs a hook invoked exactly once per connection, after it left
    /// the registry.
    pub fn with_on_disconnect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Arc<Conn>) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    /// True while another connection can be admitted.
    ///
    /// The channel checks this before upgrading so clients are turned away
    /// with HTTP 503 instead of a post-upgrade close.
    pub fn can_accept(&self) -> bool {
        let inner = self.inner.read();

        if inner.closed {
            return false;
        }

        self.config.max_connections <= 0
            || (inner.connections.len() as i64) < self.config.max_connections
    }

    /// The inbound frame-size limit connections must be upgraded with.
    pub fn frame_size_limit(&self) -> usize {
        self.config.frame_size_limit
    }

    /// Looks up a live connection by id.
    pub fn connection(&self, id: &str) -> Option<Arc<Conn>> {
        self.inner.read().connections.get(id).cloned()
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Admits an upgraded socket and runs its read loop to completion.
    ///
    /// Closed registries reject with `1012 ServiceRestart`; a full registry
    /// rejects with `1013 TryAgainLater`. When the read loop returns, the
    /// connection is removed and the disconnect hook runs.
    pub async fn handle_connection(
        &self,
        ctx: &Context,
        socket: WebSocket,
        dispatcher: Arc<dyn Dispatcher>,
    ) {
        let admission = {
            let mut inner = self.inner.write();

            if inner.closed {
                Admission::Rejected(socket, CloseCode::SERVICE_RESTART, "")
            } else if self.config.max_connections > 0
                && inner.connections.len() as i64 >= self.config.max_connections
            {
                Admission::Rejected(socket, CloseCode::TRY_AGAIN_LATER, "connection limit reached")
            } else {
                let conn = Conn::new(
                    ctx,
                    socket,
                    dispatcher,
                    Arc::clone(&self.buffer_pool),
                    self.config.concurrency_limit,
                    self.config.inactivity_timeout(),
                );

                inner
                    .connections
                    .insert(conn.id().to_owned(), Arc::clone(&conn));

                Admission::Accepted(conn)
            }
        };

        let conn = match admission {
            Admission::Accepted(conn) => conn,
            Admission::Rejected(socket, code, reason) => {
                reject(socket, code, reason).await;
                return;
            }
        };

        metrics::gauge!("gateway_active_connections").increment(1.0);
        tracing::debug!(conn_id = %conn.id(), "connection registered");

        if let Some(hook) = &self.on_connect {
            hook(&conn);
        }

        conn.handle_requests().await;

        self.inner.write().connections.remove(conn.id());

        metrics::gauge!("gateway_active_connections").decrement(1.0);

        if let Some(hook) = &self.on_disconnect {
            hook(&conn);
        }

        tracing::debug!(conn_id = %conn.id(), "connection removed");
    }

    /// Closes the registry and every live connection in parallel with
    /// `1012 ServiceRestart`, propagating the optional drain context.
    ///
    /// Returns once every snapshotted close completed; connections admitted
    /// after the flag flipped do not exist, because none are admitted.
    pub async fn close(&self, ctx: Option<Context>) {
        let snapshot: Vec<Arc<Conn>> = {
            let mut inner = self.inner.write();
            inner.closed = true;
            inner.connections.values().cloned().collect()
        };

        tracing::info!(connections = snapshot.len(), "closing connection registry");

        let closing = snapshot.iter().map(|conn| {
            let drain = ctx.clone();
            async move {
                let _ = conn.close(CloseCode::SERVICE_RESTART, "", drain).await;
            }
        });

        join_all(closing).await;
    }
}

/// Sends a close frame on a socket that never became a connection.
async fn reject(mut socket: WebSocket, code: CloseCode, reason: &'static str) {
    let _ = socket
        .send(message::downstream_close_message(code, reason))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_accept_respects_limit_sign() {
        let unlimited = ConnectionRegistry::new(RegistryConfig {
            max_connections: -1,
            ..RegistryConfig::default()
        });
        assert!(unlimited.can_accept());

        let bounded = ConnectionRegistry::new(RegistryConfig {
            max_connections: 1,
            ..RegistryConfig::default()
        });
        assert!(bounded.can_accept());
    }

    #[tokio::test]
    async fn test_closed_registry_stops_accepting() {
        let registry = ConnectionRegistry::new(RegistryConfig::default());
        assert!(registry.can_accept());

        registry.close(None).await;

        assert!(!registry.can_accept());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_frame_size_limit_comes_from_config() {
        let registry = ConnectionRegistry::new(RegistryConfig {
            frame_size_limit: 100,
            ..RegistryConfig::default()
        });

        assert_eq!(registry.frame_size_limit(), 100);
    }
}
