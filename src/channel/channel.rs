//! Binds a URL path to a dispatcher and a connection registry.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use url::Url;

use crate::config::ChannelConfig;
use crate::context::Context;
use crate::dispatch::Dispatcher;

use super::registry::ConnectionRegistry;

/// A WebSocket endpoint: upgrades HTTP requests at a path and feeds the
/// resulting connections into the registry with the dispatcher as the
/// message callback.
///
/// Clients are rejected with HTTP 503 before the upgrade whenever the
/// registry cannot accept another connection.
pub struct Channel {
    path: String,
    dispatcher: Arc<dyn Dispatcher>,
    registry: Arc<ConnectionRegistry>,
    config: ChannelConfig,
    ctx: Context,
}

impl Channel {
    pub fn new(
        path: impl Into<String>,
        dispatcher: Arc<dyn Dispatcher>,
        registry: Arc<ConnectionRegistry>,
        config: ChannelConfig,
    ) -> Self {
        Self {
            path: path.into(),
            dispatcher,
            registry,
            config,
            ctx: Context::new(),
        }
    }

    /// Replaces the base context new connections derive from.
    pub fn with_context(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }

    /// The URL path this channel is mounted at.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// An axum router serving the upgrade endpoint at this channel's path.
    ///
    /// HTTP-layer middleware (auth, tracing, ...) is applied by layering the
    /// returned router.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(&self.path, get(upgrade_handler))
            .with_state(Arc::clone(self))
    }

    /// Closes the channel by closing its registry.
    pub async fn close(&self, ctx: Option<Context>) {
        self.registry.close(ctx).await;
    }

    /// Validates the Origin header against the configured patterns.
    ///
    /// Requests without an Origin header (non-browser clients) are allowed.
    fn origin_allowed(&self, headers: &HeaderMap) -> bool {
        let Some(origin) = headers.get(header::ORIGIN) else {
            return true;
        };

        let Some(host) = origin
            .to_str()
            .ok()
            .and_then(|origin| Url::parse(origin).ok())
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        else {
            return false;
        };

        self.config.origin_patterns.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();

            if pattern == "*" {
                true
            } else if let Some(suffix) = pattern.strip_prefix("*.") {
                host.ends_with(&format!(".{suffix}")) || host == suffix
            } else {
                host == pattern
            }
        })
    }
}

async fn upgrade_handler(
    State(channel): State<Arc<Channel>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !channel.registry.can_accept() {
        tracing::debug!(path = %channel.path, "rejecting connection, registry full or closed");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    if !channel.origin_allowed(&headers) {
        tracing::debug!(path = %channel.path, "rejecting connection, origin not allowed");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.max_message_size(channel.registry.frame_size_limit())
        .on_upgrade(move |socket| async move {
            channel
                .registry
                .handle_connection(&channel.ctx, socket, Arc::clone(&channel.dispatcher))
                .await;
        })
}
