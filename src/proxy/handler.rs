// src/proxy/handler.rs
use crate::load_balancer::LoadBalancer;
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, ServerPool};
use bytes::Bytes;
use futures::Stream;
use hyper::client::HttpConnector;
use hyper::header::HeaderMap;
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::warn;
use url::Url;

/// Headers that are connection-scoped and must not be forwarded upstream.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no live backend available")]
    NoLiveBackend,

    #[error("failed to build upstream uri: {0}")]
    UpstreamUri(#[from] hyper::http::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper::Error),
}

impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let (status, message) = match err {
            ProxyError::NoLiveBackend => (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable"),
            ProxyError::UpstreamUri(_) | ProxyError::Upstream(_) => {
                (StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
        };

        Response::builder()
            .status(status)
            .body(Body::from(message))
            .unwrap()
    }
}

/// Keeps a backend's in-flight counter balanced: incremented on creation,
/// decremented when dropped, which covers success, transport failure, and a
/// panicking request alike.
struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl ConnectionGuard {
    fn new(backend: Arc<Backend>) -> Self {
        backend.increment_connections();
        Self { backend }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.decrement_connections();
    }
}

/// Response body that owns the connection guard, so the counter only drops
/// back once the upstream body has been fully streamed to the client.
struct TrackedBody {
    inner: Body,
    _guard: ConnectionGuard,
}

impl Stream for TrackedBody {
    type Item = Result<Bytes, hyper::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// The data-plane request handler: selects a backend under the configured
/// strategy and forwards the request as a streaming reverse proxy.
pub struct ProxyHandler {
    pool: Arc<ServerPool>,
    balancer: Arc<dyn LoadBalancer>,
    client: Client<HttpConnector>,
    metrics: Arc<MetricsCollector>,
}

impl ProxyHandler {
    pub fn new(
        pool: Arc<ServerPool>,
        balancer: Arc<dyn LoadBalancer>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            pool,
            balancer,
            client: Client::new(),
            metrics,
        }
    }

    /// Handles one client request end to end. Errors are folded into 502/503
    /// responses here; nothing on this path escapes as a process failure.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().to_string();
        let start = Instant::now();

        match self.forward(req).await {
            Ok((backend, response)) => {
                self.metrics.record_request(
                    &method,
                    response.status().as_u16(),
                    backend.url().as_str(),
                    start.elapsed(),
                );
                response
            }
            Err(err) => {
                let response = Response::from(err);
                self.metrics.record_request(
                    &method,
                    response.status().as_u16(),
                    "none",
                    start.elapsed(),
                );
                response
            }
        }
    }

    async fn forward(
        &self,
        mut req: Request<Body>,
    ) -> Result<(Arc<Backend>, Response<Body>), ProxyError> {
        let backends = self.pool.snapshot().await;
        let backend = self
            .balancer
            .select(&backends)
            .await
            .ok_or(ProxyError::NoLiveBackend)?;

        // The guard travels into the response body below; until the body is
        // drained the backend counts this request as in flight.
        let guard = ConnectionGuard::new(backend.clone());

        *req.uri_mut() = upstream_uri(backend.url(), req.uri())?;
        strip_hop_by_hop_headers(req.headers_mut());

        match self.client.request(req).await {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                let tracked = TrackedBody {
                    inner: body,
                    _guard: guard,
                };
                Ok((
                    backend,
                    Response::from_parts(parts, Body::wrap_stream(tracked)),
                ))
            }
            Err(err) => {
                warn!(backend = %backend.url(), error = %err, "error proxying to backend");
                self.pool.set_backend_status(backend.url(), false).await;
                Err(ProxyError::Upstream(err))
            }
        }
    }
}

/// Rewrites the request target to the backend origin: the backend's scheme
/// and authority, its base path joined with the request path, and the query
/// carried over untouched.
fn upstream_uri(base: &Url, uri: &Uri) -> Result<Uri, hyper::http::Error> {
    let authority = match base.port() {
        Some(port) => format!("{}:{}", base.host_str().unwrap_or_default(), port),
        None => base.host_str().unwrap_or_default().to_string(),
    };

    let base_path = base.path().trim_end_matches('/');
    let path_and_query = match uri.query() {
        Some(query) => format!("{}{}?{}", base_path, uri.path(), query),
        None => format!("{}{}", base_path, uri.path()),
    };

    Uri::builder()
        .scheme(base.scheme())
        .authority(authority.as_str())
        .path_and_query(path_and_query.as_str())
        .build()
}

fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}
