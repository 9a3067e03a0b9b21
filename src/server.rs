//! Serves registered channels over HTTP.
//!
//! Thin glue between channels and axum: merges the channels' routers,
//! binds a listener, signals readiness with the bound address, and fans a
//! close out to every channel. TLS termination belongs in front of this.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use crate::channel::Channel;
use crate::config::ServerConfig;
use crate::context::Context;

/// Hosts one or more channels on a single listener.
pub struct Server {
    config: ServerConfig,
    channels: Vec<Arc<Channel>>,
    ctx: Context,
    ready: Option<oneshot::Sender<SocketAddr>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            channels: Vec::new(),
            ctx: Context::new(),
            ready: None,
        }
    }

    /// Registers a channel to be served.
    pub fn add_channel(&mut self, channel: Channel) -> Arc<Channel> {
        let channel = Arc::new(channel);
        self.channels.push(Arc::clone(&channel));
        channel
    }

    /// Installs a readiness signal that fires with the bound address once
    /// the server accepts connections. Tests bind port 0 and read the
    /// address from here.
    pub fn with_ready_signal(mut self, ready: oneshot::Sender<SocketAddr>) -> Self {
        self.ready = Some(ready);
        self
    }

    /// A handle that closes the server and its channels.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            ctx: self.ctx.clone(),
            channels: self.channels.clone(),
        }
    }

    /// Binds the configured address and serves until closed.
    pub async fn run(self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(&self.config.addr).await?;
        self.serve(listener).await
    }

    /// Serves on an already-bound listener until closed.
    pub async fn serve(mut self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;

        let mut router = axum::Router::new();
        for channel in &self.channels {
            router = router.merge(channel.router());
        }
        let router = router.layer(TraceLayer::new_for_http());

        tracing::info!(address = %addr, channels = self.channels.len(), "server starting");

        if let Some(ready) = self.ready.take() {
            let _ = ready.send(addr);
        }

        let ctx = self.ctx.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { ctx.done().await })
            .await?;

        tracing::info!(address = %addr, "server stopped");

        Ok(())
    }
}

/// Closes a running [`Server`] and all of its channels.
#[derive(Clone)]
pub struct ServerHandle {
    ctx: Context,
    channels: Vec<Arc<Channel>>,
}

impl ServerHandle {
    /// Stops accepting, then closes every channel in parallel, propagating
    /// the optional drain context to each connection.
    pub async fn close(&self, ctx: Option<Context>) {
        self.ctx.cancel();

        let closing = self.channels.iter().map(|channel| {
            let drain = ctx.clone();
            async move { channel.close(drain).await }
        });

        join_all(closing).await;
    }
}
