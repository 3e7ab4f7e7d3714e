// src/server/supervisor.rs
use crate::admin::AdminHandler;
use crate::config::ProxyConfig;
use crate::health::HealthChecker;
use crate::load_balancer::create_balancer;
use crate::metrics::MetricsRegistry;
use crate::proxy::{Backend, ProxyHandler, ServerPool};
use crate::server::handler::RequestHandler;
use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};
use url::Url;

/// How long in-flight requests get to finish once shutdown is triggered.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Owns the whole proxy lifecycle: backend registration, the health loop,
/// both listeners, and graceful teardown.
pub struct ProxyServer {
    config: ProxyConfig,
    pool: Arc<ServerPool>,
}

impl ProxyServer {
    /// Registers the configured backends. Each starts alive; the first
    /// health sweep corrects any that are actually down.
    pub async fn new(config: ProxyConfig) -> Result<Self> {
        let pool = Arc::new(ServerPool::new());

        for backend_url in &config.backends {
            let url = Url::parse(backend_url)
                .with_context(|| format!("failed to parse backend URL {backend_url}"))?;
            pool.add_backend(Arc::new(Backend::new(url))).await;
            info!(backend = %backend_url, "registered backend");
        }

        Ok(Self { config, pool })
    }

    /// Serves until `shutdown` resolves, then drains. Bind failures on
    /// either listener are fatal and surface as an error before anything is
    /// spawned.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.run_with_grace(shutdown, SHUTDOWN_GRACE).await
    }

    async fn run_with_grace(
        self,
        shutdown: impl Future<Output = ()>,
        grace: Duration,
    ) -> Result<()> {
        let metrics_registry = Arc::new(MetricsRegistry::new()?);
        let metrics = metrics_registry.collector();

        let balancer = create_balancer(&self.config.strategy);
        info!(strategy = balancer.name(), "load balancing strategy selected");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let checker = HealthChecker::new(
            self.pool.clone(),
            self.config.health_check_frequency,
            metrics.clone(),
        );
        let health_task = tokio::spawn(checker.run(shutdown_rx.clone()));

        let proxy_handler = Arc::new(ProxyHandler::new(
            self.pool.clone(),
            balancer,
            metrics.clone(),
        ));
        let handler = RequestHandler::new(proxy_handler);
        let make_proxy = make_service_fn(move |_| {
            let handler = handler.clone();
            async move { Ok::<_, Infallible>(handler) }
        });

        let admin = Arc::new(AdminHandler::new(self.pool.clone(), metrics_registry));
        let make_admin = make_service_fn(move |_| {
            let admin = admin.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let admin = admin.clone();
                    async move { Ok::<_, Infallible>(admin.handle(req).await) }
                }))
            }
        });

        let proxy_addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let admin_addr: SocketAddr = ([0, 0, 0, 0], self.config.admin_port).into();

        let proxy_server = Server::try_bind(&proxy_addr)
            .with_context(|| format!("failed to bind proxy listener on {proxy_addr}"))?
            .serve(make_proxy)
            .with_graceful_shutdown(drained(shutdown_rx.clone()));

        let admin_server = Server::try_bind(&admin_addr)
            .with_context(|| format!("failed to bind admin listener on {admin_addr}"))?
            .serve(make_admin)
            .with_graceful_shutdown(drained(shutdown_rx));

        info!("proxy listening on {proxy_addr}");
        info!("admin listening on {admin_addr}");

        let mut proxy_task = tokio::spawn(proxy_server);
        let mut admin_task = tokio::spawn(admin_server);

        tokio::select! {
            _ = shutdown => {
                info!("shutdown signal received");
            }
            result = &mut proxy_task => {
                return Err(anyhow::anyhow!("proxy server exited: {result:?}"));
            }
            result = &mut admin_task => {
                return Err(anyhow::anyhow!("admin server exited: {result:?}"));
            }
        }

        // Stop accepting immediately; in-flight requests get the grace
        // period, then whatever is left is torn down.
        let _ = shutdown_tx.send(true);
        info!("draining in-flight requests (up to {grace:?})");

        let drain = async {
            let _ = (&mut proxy_task).await;
            let _ = (&mut admin_task).await;
        };

        if timeout(grace, drain).await.is_err() {
            warn!("shutdown grace period exceeded, aborting remaining connections");
            proxy_task.abort();
            admin_task.abort();
        }

        let _ = health_task.await;
        info!("shutdown complete");
        Ok(())
    }
}

/// Resolves once the shutdown flag flips to true.
async fn drained(mut shutdown_rx: watch::Receiver<bool>) {
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }
}
