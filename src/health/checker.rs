// src/health/checker.rs
use crate::metrics::MetricsCollector;
use crate::proxy::ServerPool;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info};
use url::Url;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Background prober that keeps each backend's liveness flag current.
///
/// Every tick it snapshots the pool, releases the lock, and probes the
/// backends one by one. The probe result is written back unconditionally: a
/// backend the proxy marked dead mid-period gets resurrected here as soon as
/// it answers again, and a stale resurrection is corrected on the next tick.
pub struct HealthChecker {
    pool: Arc<ServerPool>,
    period: Duration,
    client: Client,
    metrics: Arc<MetricsCollector>,
}

impl HealthChecker {
    pub fn new(pool: Arc<ServerPool>, period: Duration, metrics: Arc<MetricsCollector>) -> Self {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            pool,
            period,
            client,
            metrics,
        }
    }

    /// Runs until the shutdown signal flips. A sweep in progress is abandoned
    /// at the same signal; individual probes are bounded by the 5s timeout
    /// either way.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        // interval fires immediately; skip the zeroth tick so the first
        // sweep happens one full period after startup.
        ticker.tick().await;

        info!(period = ?self.period, "health checker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.sweep() => {}
                        _ = shutdown.changed() => {
                            info!("health checker stopped");
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("health checker stopped");
                    return;
                }
            }
        }
    }

    async fn sweep(&self) {
        let backends = self.pool.snapshot().await;
        let total = backends.len();
        let mut healthy = 0;

        for backend in backends {
            let alive = self.probe(backend.url()).await;
            backend.set_alive(alive).await;
            self.metrics
                .update_backend_health(backend.url().as_str(), alive);

            if alive {
                healthy += 1;
                debug!(backend = %backend.url(), "health check: UP");
            } else {
                info!(backend = %backend.url(), "health check: DOWN");
            }
        }

        self.metrics.update_backend_counts(healthy, total);
    }

    /// Probes `GET {url}/health`; a backend is alive iff it answers with a
    /// status below 500. Any transport error, timeout, or DNS failure counts
    /// as dead. If the probe URL cannot be constructed, degrade to a bare
    /// `HEAD` against the origin.
    async fn probe(&self, base: &Url) -> bool {
        let probe = format!("{}/health", base.as_str().trim_end_matches('/'));
        let result = match Url::parse(&probe) {
            Ok(probe_url) => self.client.get(probe_url).send().await,
            Err(_) => self.client.head(base.clone()).send().await,
        };

        match result {
            Ok(response) => response.status().as_u16() < 500,
            Err(_) => false,
        }
    }
}
