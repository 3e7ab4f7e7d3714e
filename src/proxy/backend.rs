// src/proxy/backend.rs
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;
use url::Url;

/// A single upstream origin the proxy can forward to.
///
/// The URL is fixed at construction; liveness and the in-flight connection
/// count are the only mutable state. Liveness sits behind a read/write lock
/// because every request reads it and only health transitions write it. The
/// connection counter is a lock-free atomic since both sides are hot-path.
#[derive(Debug)]
pub struct Backend {
    url: Url,
    alive: RwLock<bool>,
    current_conns: AtomicI64,
}

impl Backend {
    /// Creates a backend that starts out alive. The next health sweep
    /// corrects the flag if the origin is actually down.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            alive: RwLock::new(true),
            current_conns: AtomicI64::new(0),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn set_alive(&self, alive: bool) {
        let mut flag = self.alive.write().await;
        *flag = alive;
    }

    pub async fn is_alive(&self) -> bool {
        *self.alive.read().await
    }

    pub fn increment_connections(&self) {
        self.current_conns.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_connections(&self) {
        self.current_conns.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn connections(&self) -> i64 {
        self.current_conns.load(Ordering::Relaxed)
    }
}
