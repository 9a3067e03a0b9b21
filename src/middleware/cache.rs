//! Response caching with per-key request coalescing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::channel::ConnectionWrapper;
use crate::context::Context;
use crate::dispatch::{Connection, Middleware, Request, RequestHandler};
use crate::error::GatewayError;
use crate::message::MessageType;
use crate::sync::single_flight::Group;

/// Derives `(cache key, ttl)` for a request. An empty key bypasses the
/// cache entirely.
pub type RequestCacheKey = Arc<dyn Fn(&Request) -> (String, Duration) + Send + Sync>;

/// Stops the cache's background reaper.
pub type CacheCloser = Box<dyn Fn() + Send + Sync>;

type CachedResponse = Option<(MessageType, Bytes)>;

/// Caches handler responses by key and coalesces concurrent misses.
///
/// On a miss the leader runs the wrapped handler against a capturing
/// connection wrapper, so the response is recorded instead of sent; it is
/// then stored under the key and delivered to every coalesced caller on
/// their real connections. Callers whose context ended while waiting get
/// its error instead of a send.
///
/// The returned closer halts the expiry reaper; call it when the middleware
/// is retired.
pub fn cache(request_cache_key: RequestCacheKey) -> (Middleware, CacheCloser) {
    let store = Arc::new(TtlStore::new());
    let group = Arc::new(Group::new());

    let reaper_ctx = Context::new();
    tokio::spawn(reap_expired(Arc::clone(&store), reaper_ctx.clone()));

    let middleware: Middleware = Box::new(move |next| {
        Arc::new(Cache {
            request_cache_key: Arc::clone(&request_cache_key),
            store: Arc::clone(&store),
            group: Arc::clone(&group),
            next,
        })
    });

    let closer: CacheCloser = Box::new(move || reaper_ctx.cancel());

    (middleware, closer)
}

struct Cache {
    request_cache_key: RequestCacheKey,
    store: Arc<TtlStore>,
    group: Arc<Group<String, Result<CachedResponse, Arc<GatewayError>>>>,
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for Cache {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        let (key, ttl) = (self.request_cache_key)(&req);

        if key.is_empty() {
            return self.next.handle(conn, req).await;
        }

        let leader_key = key.clone();
        let store = Arc::clone(&self.store);
        let next = Arc::clone(&self.next);
        let leader_conn = Arc::clone(&conn);
        let leader_req = req.clone();

        let response = self
            .group
            .run(key, move || async move {
                if let Some(hit) = store.get(&leader_key) {
                    return Ok(Some(hit));
                }

                let captured: Arc<Mutex<CachedResponse>> = Arc::new(Mutex::new(None));

                let recorder = {
                    let captured = Arc::clone(&captured);
                    ConnectionWrapper::new(leader_conn).with_send_interceptor(
                        move |_inner, msg_type, data| {
                            *captured.lock() = Some((msg_type, data));
                            Box::pin(async { Ok(()) })
                        },
                    )
                };

                next.handle(Arc::new(recorder), leader_req)
                    .await
                    .map_err(Arc::new)?;

                let response = captured.lock().take();

                if let Some((msg_type, data)) = &response {
                    if ttl > Duration::ZERO {
                        store.set(leader_key, *msg_type, data.clone(), ttl);
                    }
                }

                Ok(response)
            })
            .await
            .map_err(GatewayError::Shared)?;

        if req.context().is_done() {
            return Err(req.context().error());
        }

        match response {
            Some((msg_type, data)) => conn.send(msg_type, data).await,
            None => Ok(()),
        }
    }
}

struct CacheEntry {
    msg_type: MessageType,
    data: Bytes,
    expires_at: Instant,
}

struct TtlStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl TtlStore {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str) -> CachedResponse {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;

        if entry.expires_at <= Instant::now() {
            return None;
        }

        Some((entry.msg_type, entry.data.clone()))
    }

    fn set(&self, key: String, msg_type: MessageType, data: Bytes, ttl: Duration) {
        self.entries.lock().insert(
            key,
            CacheEntry {
                msg_type,
                data,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.entries.lock().retain(|_, entry| entry.expires_at > now);
    }
}

const REAP_INTERVAL: Duration = Duration::from_secs(1);

async fn reap_expired(store: Arc<TtlStore>, ctx: Context) {
    loop {
        tokio::select! {
            _ = ctx.done() => return,
            _ = tokio::time::sleep(REAP_INTERVAL) => store.sweep(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::channel::Payload;
    use crate::dispatch::handler_fn;
    use crate::testing::MockConnection;

    use super::*;

    fn request() -> Request {
        Request::new(Context::new(), MessageType::Text, Payload::from_vec(vec![]))
    }

    fn constant_key(ttl: Duration) -> RequestCacheKey {
        Arc::new(move |_req| ("the-key".to_owned(), ttl))
    }

    fn counting_echo(calls: &Arc<AtomicUsize>) -> Arc<dyn RequestHandler> {
        let calls = Arc::clone(calls);
        handler_fn(move |conn, _req| {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                conn.send(MessageType::Text, Bytes::from_static(b"fresh"))
                    .await
            })
        })
    }

    #[tokio::test]
    async fn test_concurrent_requests_invoke_handler_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (middleware, closer) = cache(constant_key(Duration::from_secs(1)));
        let handler = middleware(counting_echo(&calls));

        let mut tasks = Vec::new();
        let mut conns = Vec::new();

        for _ in 0..4 {
            let conn = MockConnection::connected();
            conns.push(Arc::clone(&conn));
            let handler = Arc::clone(&handler);
            tasks.push(tokio::spawn(async move {
                handler
                    .handle(Arc::clone(&conn) as Arc<dyn Connection>, request())
                    .await
            }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);

        for conn in conns {
            assert_eq!(conn.sent(), vec![(MessageType::Text, Bytes::from_static(b"fresh"))]);
        }

        closer();
    }

    #[tokio::test]
    async fn test_hit_returns_stored_bytes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (middleware, closer) = cache(constant_key(Duration::from_secs(1)));
        let handler = middleware(counting_echo(&calls));

        let first = MockConnection::connected();
        handler
            .handle(Arc::clone(&first) as Arc<dyn Connection>, request())
            .await
            .unwrap();

        let second = MockConnection::connected();
        handler
            .handle(Arc::clone(&second) as Arc<dyn Connection>, request())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.sent(), second.sent());

        closer();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_misses() {
        let store = TtlStore::new();
        store.set(
            "k".to_owned(),
            MessageType::Text,
            Bytes::from_static(b"v"),
            Duration::from_millis(50),
        );

        assert!(store.get("k").is_some());

        tokio::time::advance(Duration::from_millis(60)).await;

        assert!(store.get("k").is_none());

        store.sweep();
        assert!(store.entries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_empty_key_bypasses_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bypass: RequestCacheKey = Arc::new(|_req| (String::new(), Duration::from_secs(1)));
        let (middleware, closer) = cache(bypass);
        let handler = middleware(counting_echo(&calls));

        let conn = MockConnection::connected();
        for _ in 0..2 {
            handler
                .handle(Arc::clone(&conn) as Arc<dyn Connection>, request())
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);

        closer();
    }

    #[tokio::test]
    async fn test_handler_error_reaches_all_callers() {
        let failing = handler_fn(|_conn, _req| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(GatewayError::other("no data"))
            })
        });

        let (middleware, closer) = cache(constant_key(Duration::from_secs(1)));
        let handler = middleware(failing);

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let conn = MockConnection::connected();
            let handler = Arc::clone(&handler);
            tasks.push(tokio::spawn(async move {
                handler
                    .handle(Arc::clone(&conn) as Arc<dyn Connection>, request())
                    .await
            }));
        }

        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(err.to_string().contains("no data"));
        }

        closer();
    }
}
