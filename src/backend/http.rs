//! HTTP backend: turns WebSocket requests into upstream HTTP calls.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::HttpBackendConfig;
use crate::dispatch::{Connection, Request, RequestHandler};
use crate::error::GatewayError;
use crate::message::MessageType;

/// Converts a gateway request into an outbound HTTP request.
///
/// The factory receives the backend's pooled client so it can use reqwest's
/// builder API; headers and body are entirely its business.
pub type RequestFactory =
    Arc<dyn Fn(&reqwest::Client, &Request) -> Result<reqwest::Request, GatewayError> + Send + Sync>;

/// Issues one HTTP call per request and writes the response body back as a
/// Text frame.
///
/// The request context governs the call: cancellation or a deadline aborts
/// it mid-flight. A client that hung up before the response arrives is not
/// an error worth surfacing, so `ConnectionClosed` on the final send is
/// swallowed.
pub struct HttpBackend {
    factory: RequestFactory,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(factory: RequestFactory, config: HttpBackendConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(config.max_conns_per_host)
            .build()?;

        Ok(Self { factory, client })
    }

    /// Builds a backend reusing an existing client.
    pub fn with_client(factory: RequestFactory, client: reqwest::Client) -> Self {
        Self { factory, client }
    }
}

#[async_trait]
impl RequestHandler for HttpBackend {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        let outbound = (self.factory)(&self.client, &req)?;
        let ctx = req.context();

        let response = tokio::select! {
            response = self.client.execute(outbound) => response?,
            _ = ctx.done() => return Err(ctx.error()),
        };

        let body = tokio::select! {
            body = response.bytes() => body?,
            _ = ctx.done() => return Err(ctx.error()),
        };

        match conn.send(MessageType::Text, body).await {
            Err(err) if err.is_connection_closed() => Ok(()),
            other => other,
        }
    }
}
