//! Configuration file loading.
//!
//! The domain crate owns the configuration model and its validation; this
//! module only reads the TOML file and hands the parsed model over.

use std::path::Path;

use anyhow::Context;
use gateway::{GatewayConfig, ServiceRegistry};

/// Reads and validates the configuration at `path`.
pub fn load_registry(path: &Path) -> anyhow::Result<ServiceRegistry> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    parse_registry(&text).with_context(|| format!("invalid configuration in {}", path.display()))
}

/// Parses and validates configuration text.
pub fn parse_registry(text: &str) -> anyhow::Result<ServiceRegistry> {
    let config: GatewayConfig = toml::from_str(text).context("failed to parse TOML")?;
    let registry = ServiceRegistry::from_config(&config)?;
    tracing::info!(services = registry.len(), "Configuration loaded");
    Ok(registry)
}
