// src/config/models.rs
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use url::Url;

/// Runtime configuration for the proxy.
///
/// `health_check_frequency` arrives as an integer nanosecond count, the wire
/// form the JSON config has always used.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub port: u16,
    pub admin_port: u16,

    /// `"least-conn"` selects least-connections; any other value means
    /// round-robin.
    #[serde(default = "default_strategy")]
    pub strategy: String,

    #[serde(
        default = "default_health_check_frequency",
        deserialize_with = "duration_from_nanos"
    )]
    pub health_check_frequency: Duration,

    #[serde(default)]
    pub backends: Vec<String>,
}

fn default_strategy() -> String {
    "round-robin".to_string()
}

fn default_health_check_frequency() -> Duration {
    Duration::from_secs(10)
}

fn duration_from_nanos<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let nanos = u64::deserialize(deserializer)?;
    Ok(Duration::from_nanos(nanos))
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("proxy port must be non-zero");
        }
        if self.admin_port == 0 {
            bail!("admin port must be non-zero");
        }
        if self.port == self.admin_port {
            bail!("proxy and admin listeners cannot share port {}", self.port);
        }
        if self.health_check_frequency.is_zero() {
            bail!("health_check_frequency must be positive");
        }

        for backend in &self.backends {
            Url::parse(backend)
                .with_context(|| format!("invalid backend URL: {backend}"))?;
        }

        Ok(())
    }
}
