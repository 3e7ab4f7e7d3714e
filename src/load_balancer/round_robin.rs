// src/load_balancer/round_robin.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Rotating-cursor selection over the pool snapshot, skipping dead backends.
///
/// The cursor only ever advances; the starting index is `cursor mod N`
/// against whatever length the snapshot has right now. When the pool changes
/// size between selections the positions shift and a neighbor may be reused
/// or skipped once. Fairness is statistical, not absolute.
pub struct RoundRobinBalancer {
    cursor: AtomicU64,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            cursor: AtomicU64::new(0),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn select(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let len = backends.len() as u64;
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);

        // Scan at most one full lap from the cursor position.
        for i in 0..len {
            let idx = ((start.wrapping_add(i)) % len) as usize;
            let backend = &backends[idx];
            if backend.is_alive().await {
                return Some(backend.clone());
            }
        }

        None
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}
