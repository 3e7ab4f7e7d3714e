// src/admin/mod.rs
use crate::metrics::MetricsRegistry;
use crate::proxy::{Backend, BackendStatus, ServerPool};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use url::Url;

#[derive(Debug, Deserialize)]
struct MutationRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    total_backends: usize,
    active_backends: usize,
    backends: Vec<BackendStatus>,
}

#[derive(Debug, Serialize)]
struct AckResponse {
    status: &'static str,
    message: &'static str,
    url: String,
}

/// The control plane: inspects and mutates the backend set at runtime.
///
/// Mutation bodies are `{"url": "http://..."}`; URLs are validated by
/// parsing, so add and remove agree on normalization and an add/remove pair
/// always round-trips.
pub struct AdminHandler {
    pool: Arc<ServerPool>,
    metrics: Arc<MetricsRegistry>,
}

impl AdminHandler {
    pub fn new(pool: Arc<ServerPool>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { pool, metrics }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/status") => self.status().await,
            (_, "/status") => method_not_allowed(),
            (&Method::POST, "/backends") => self.add_backend(req).await,
            (&Method::DELETE, "/backends") => self.remove_backend(req).await,
            (_, "/backends") => method_not_allowed(),
            (&Method::GET, "/metrics") => self.metrics_text(),
            _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    async fn status(&self) -> Response<Body> {
        let backends = self.pool.all_backends().await;
        let active_backends = backends.iter().filter(|b| b.alive).count();

        json_response(
            StatusCode::OK,
            &StatusResponse {
                total_backends: backends.len(),
                active_backends,
                backends,
            },
        )
    }

    async fn add_backend(&self, req: Request<Body>) -> Response<Body> {
        let url = match parse_mutation_body(req).await {
            Ok(url) => url,
            Err(resp) => return resp,
        };

        self.pool
            .add_backend(Arc::new(Backend::new(url.clone())))
            .await;
        info!(backend = %url, "backend added via admin API");

        json_response(
            StatusCode::OK,
            &AckResponse {
                status: "success",
                message: "Backend added successfully",
                url: url.into(),
            },
        )
    }

    async fn remove_backend(&self, req: Request<Body>) -> Response<Body> {
        let url = match parse_mutation_body(req).await {
            Ok(url) => url,
            Err(resp) => return resp,
        };

        if self.pool.remove_backend(&url).await {
            info!(backend = %url, "backend removed via admin API");
            json_response(
                StatusCode::OK,
                &AckResponse {
                    status: "success",
                    message: "Backend removed successfully",
                    url: url.into(),
                },
            )
        } else {
            text_response(StatusCode::NOT_FOUND, "Backend not found")
        }
    }

    fn metrics_text(&self) -> Response<Body> {
        Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(Body::from(self.metrics.gather()))
            .unwrap()
    }
}

/// Reads and validates a mutation body. The error side is the 400 response
/// to send back as-is.
async fn parse_mutation_body(req: Request<Body>) -> Result<Url, Response<Body>> {
    let bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(_) => return Err(text_response(StatusCode::BAD_REQUEST, "Invalid request body")),
    };

    let mutation: MutationRequest = match serde_json::from_slice(&bytes) {
        Ok(mutation) => mutation,
        Err(_) => return Err(text_response(StatusCode::BAD_REQUEST, "Invalid request body")),
    };

    Url::parse(&mutation.url)
        .map_err(|_| text_response(StatusCode::BAD_REQUEST, "Invalid URL"))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let payload = serde_json::to_vec(body).unwrap();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(payload))
        .unwrap()
}

fn text_response(status: StatusCode, message: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(message))
        .unwrap()
}

fn method_not_allowed() -> Response<Body> {
    text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}
