// src/proxy/pool.rs
use super::backend::Backend;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// Point-in-time view of one backend, as reported on the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub url: String,
    pub alive: bool,
    pub current_connections: i64,
}

/// The registry of upstream backends.
///
/// Backends are kept in insertion order so the round-robin cursor and the
/// least-connections tie-break have a stable notion of "first". Membership
/// changes take the write lock; selection, health sweeps, and the admin
/// readout all work from snapshots taken under the read lock, so an in-flight
/// request keeps its `Arc<Backend>` alive even if the backend is removed
/// underneath it.
pub struct ServerPool {
    backends: RwLock<Vec<Arc<Backend>>>,
}

impl ServerPool {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
        }
    }

    /// Appends a backend to the pool.
    pub async fn add_backend(&self, backend: Arc<Backend>) {
        let mut backends = self.backends.write().await;
        backends.push(backend);
    }

    /// Removes the first backend whose URL equals `url`. Returns whether a
    /// backend was removed; in-flight requests against it run to completion.
    pub async fn remove_backend(&self, url: &Url) -> bool {
        let mut backends = self.backends.write().await;
        if let Some(idx) = backends.iter().position(|b| b.url() == url) {
            backends.remove(idx);
            true
        } else {
            false
        }
    }

    /// Sets the liveness flag of the backend registered under `url`.
    /// No-op if the URL is not in the pool.
    pub async fn set_backend_status(&self, url: &Url, alive: bool) {
        let found = {
            let backends = self.backends.read().await;
            backends.iter().find(|b| b.url() == url).cloned()
        };
        if let Some(backend) = found {
            backend.set_alive(alive).await;
            if alive {
                tracing::info!(backend = %url, "backend is UP");
            } else {
                tracing::warn!(backend = %url, "backend is DOWN");
            }
        }
    }

    /// Clones the current backend references. The lock is released before the
    /// caller does anything slow with them.
    pub async fn snapshot(&self) -> Vec<Arc<Backend>> {
        self.backends.read().await.clone()
    }

    /// Control-plane readout of every registered backend.
    pub async fn all_backends(&self) -> Vec<BackendStatus> {
        let backends = self.snapshot().await;
        let mut statuses = Vec::with_capacity(backends.len());
        for backend in backends {
            statuses.push(BackendStatus {
                url: backend.url().as_str().to_string(),
                alive: backend.is_alive().await,
                current_connections: backend.connections(),
            });
        }
        statuses
    }
}

impl Default for ServerPool {
    fn default() -> Self {
        Self::new()
    }
}
