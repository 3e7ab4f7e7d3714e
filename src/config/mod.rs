// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Reads, parses, and validates the proxy configuration. The parser is
/// picked by extension: `.yaml`/`.yml` parse as YAML, everything else as
/// JSON. Any failure here is fatal to startup, so errors carry the config
/// path.
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<ProxyConfig> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config from {}", path.display()))?;

    let config = parse_config(&raw, is_yaml(path))
        .with_context(|| format!("malformed config in {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in {}", path.display()))?;

    Ok(config)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn parse_config(raw: &str, yaml: bool) -> Result<ProxyConfig> {
    let config = if yaml {
        serde_yaml::from_str(raw)?
    } else {
        serde_json::from_str(raw)?
    };
    Ok(config)
}
