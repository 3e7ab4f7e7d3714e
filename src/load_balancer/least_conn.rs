// src/load_balancer/least_conn.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

/// Picks the live backend with the fewest in-flight requests; ties go to the
/// earliest-registered backend. The counters can move while the scan runs,
/// so the minimum is approximate by contract.
pub struct LeastConnBalancer;

impl LeastConnBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastConnBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for LeastConnBalancer {
    async fn select(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let mut selected: Option<Arc<Backend>> = None;
        let mut min_conns = i64::MAX;

        for backend in backends {
            if !backend.is_alive().await {
                continue;
            }
            let conns = backend.connections();
            if conns < min_conns {
                min_conns = conns;
                selected = Some(backend.clone());
            }
        }

        selected
    }

    fn name(&self) -> &'static str {
        "least-conn"
    }
}
