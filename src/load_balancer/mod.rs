// src/load_balancer/mod.rs
mod algorithm;
mod least_conn;
mod round_robin;

pub use algorithm::LoadBalancer;
pub use least_conn::LeastConnBalancer;
pub use round_robin::RoundRobinBalancer;

use std::sync::Arc;

/// Maps the configured strategy name to a balancer. Anything other than
/// `"least-conn"` falls back to round-robin, so typos keep the proxy serving
/// rather than failing at startup.
pub fn create_balancer(strategy: &str) -> Arc<dyn LoadBalancer> {
    match strategy {
        "least-conn" => Arc::new(LeastConnBalancer::new()),
        _ => Arc::new(RoundRobinBalancer::new()),
    }
}
