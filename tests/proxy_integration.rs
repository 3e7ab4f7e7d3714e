// tests/proxy_integration.rs
//
// End-to-end scenarios: real hyper upstreams on ephemeral ports, requests
// driven through the data-plane handler, and the health loop run against
// live and unreachable origins.

use fulcrum::health::HealthChecker;
use fulcrum::load_balancer::create_balancer;
use fulcrum::metrics::MetricsRegistry;
use fulcrum::proxy::{Backend, ProxyHandler, ServerPool};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

/// Upstream that answers 200 everywhere (including /health), tags responses
/// with its name, and counts the non-probe requests it served.
async fn spawn_upstream(name: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let served = counter.clone();

    let make_svc = make_service_fn(move |_| {
        let served = served.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let served = served.clone();
                async move {
                    if req.uri().path() != "/health" {
                        served.fetch_add(1, Ordering::SeqCst);
                    }
                    let echoed = format!(
                        "{}:{}",
                        name,
                        req.uri()
                            .path_and_query()
                            .map(|pq| pq.as_str())
                            .unwrap_or("/")
                    );
                    Ok::<_, Infallible>(
                        Response::builder()
                            .header("x-upstream", name)
                            .body(Body::from(echoed))
                            .unwrap(),
                    )
                }
            }))
        }
    });

    let server = Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(make_svc);
    let addr = server.local_addr();
    tokio::spawn(server);
    (addr, counter)
}

/// Reserves an ephemeral port and releases it, so connections are refused.
fn refused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn handler_for(pool: Arc<ServerPool>, strategy: &str) -> ProxyHandler {
    let registry = MetricsRegistry::new().unwrap();
    ProxyHandler::new(pool, create_balancer(strategy), registry.collector())
}

async fn pool_of(urls: &[String]) -> Arc<ServerPool> {
    let pool = Arc::new(ServerPool::new());
    for url in urls {
        pool.add_backend(Arc::new(Backend::new(Url::parse(url).unwrap())))
            .await;
    }
    pool
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn round_robin_alternates_between_live_backends() {
    let (addr_a, count_a) = spawn_upstream("a").await;
    let (addr_b, count_b) = spawn_upstream("b").await;

    let pool = pool_of(&[format!("http://{addr_a}"), format!("http://{addr_b}")]).await;
    let handler = handler_for(pool, "round-robin");

    let mut order = Vec::new();
    for _ in 0..6 {
        let resp = handler.handle(get("/")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        order.push(
            resp.headers()
                .get("x-upstream")
                .unwrap()
                .to_str()
                .unwrap()
                .to_string(),
        );
        // Drain so the in-flight slot is released before the next request.
        hyper::body::to_bytes(resp.into_body()).await.unwrap();
    }

    assert_eq!(count_a.load(Ordering::SeqCst), 3);
    assert_eq!(count_b.load(Ordering::SeqCst), 3);
    for pair in order.windows(2) {
        assert_ne!(pair[0], pair[1], "arrival order should alternate: {order:?}");
    }
}

#[tokio::test]
async fn path_and_query_are_forwarded_to_the_backend() {
    let (addr, _count) = spawn_upstream("echo").await;
    let pool = pool_of(&[format!("http://{addr}")]).await;
    let handler = handler_for(pool, "round-robin");

    let resp = handler.handle(get("/api/items?page=2")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    assert_eq!(&body[..], b"echo:/api/items?page=2");
}

#[tokio::test]
async fn transport_failure_fails_over_without_a_health_tick() {
    let (addr_a, _count_a) = spawn_upstream("a").await;
    let dead_url = format!("http://127.0.0.1:{}", refused_port());

    let pool = pool_of(&[format!("http://{addr_a}"), dead_url.clone()]).await;
    let handler = handler_for(pool.clone(), "round-robin");

    let mut bad_gateways = 0;
    for _ in 0..4 {
        let resp = handler.handle(get("/")).await;
        if resp.status() == StatusCode::BAD_GATEWAY {
            bad_gateways += 1;
        } else {
            assert_eq!(resp.headers().get("x-upstream").unwrap(), "a");
            hyper::body::to_bytes(resp.into_body()).await.unwrap();
        }
    }

    // The dead backend is hit once, reported as 502, and marked down.
    assert_eq!(bad_gateways, 1);
    let statuses = pool.all_backends().await;
    let dead = statuses.iter().find(|s| s.url.starts_with(&dead_url)).unwrap();
    assert!(!dead.alive);

    // Every subsequent request is routed around it.
    for _ in 0..4 {
        let resp = handler.handle(get("/")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        hyper::body::to_bytes(resp.into_body()).await.unwrap();
    }
}

#[tokio::test]
async fn connection_counters_return_to_zero_after_traffic() {
    let (addr, _count) = spawn_upstream("a").await;
    let pool = pool_of(&[format!("http://{addr}")]).await;
    let handler = handler_for(pool.clone(), "least-conn");

    for _ in 0..10 {
        let resp = handler.handle(get("/")).await;
        hyper::body::to_bytes(resp.into_body()).await.unwrap();
    }

    let total: i64 = pool
        .all_backends()
        .await
        .iter()
        .map(|s| s.current_connections)
        .sum();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn health_loop_resurrects_a_recovered_backend() {
    let (addr, _count) = spawn_upstream("a").await;
    let url = Url::parse(&format!("http://{addr}")).unwrap();
    let backend = Arc::new(Backend::new(url.clone()));

    let pool = Arc::new(ServerPool::new());
    pool.add_backend(backend.clone()).await;

    // Passive detection has marked it dead; the next sweep brings it back.
    pool.set_backend_status(&url, false).await;
    assert!(!backend.is_alive().await);

    let registry = MetricsRegistry::new().unwrap();
    let checker = HealthChecker::new(pool, Duration::from_millis(50), registry.collector());
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(checker.run(rx));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(backend.is_alive().await);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("health loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn health_loop_downs_an_unreachable_backend() {
    let (addr_a, _count) = spawn_upstream("a").await;
    let dead = Arc::new(Backend::new(
        Url::parse(&format!("http://127.0.0.1:{}", refused_port())).unwrap(),
    ));

    let pool = pool_of(&[format!("http://{addr_a}")]).await;
    pool.add_backend(dead.clone()).await;

    let registry = MetricsRegistry::new().unwrap();
    let checker = HealthChecker::new(pool.clone(), Duration::from_millis(50), registry.collector());
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(checker.run(rx));

    tokio::time::sleep(Duration::from_millis(400)).await;

    let statuses = pool.all_backends().await;
    let active = statuses.iter().filter(|s| s.alive).count();
    assert_eq!(statuses.len(), 2);
    assert_eq!(active, 1);
    assert!(!dead.is_alive().await);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("health loop did not stop")
        .unwrap();
}
