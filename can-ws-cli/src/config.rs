//! Configuration file loading and merging

use anyhow::{bail, Context, Result};
use can_ws_relay::{EndpointConfig, RelayConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub interfaces: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    pub capacity: Option<usize>,
}

/// Settings given on the command line; they win over the file
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides<'a> {
    pub interfaces: &'a [String],
    pub port: Option<u16>,
    pub bind: Option<&'a str>,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

/// Combine the (optional) file configuration with command line overrides
///
/// Interfaces named on the command line replace the file's list; an
/// interface that also appears in the file keeps the file's filters.
pub fn build_relay_config(file: Option<AppConfig>, overrides: Overrides<'_>) -> Result<RelayConfig> {
    let file = file.unwrap_or_default();
    let mut config = RelayConfig::new();

    config.interfaces = if overrides.interfaces.is_empty() {
        file.interfaces.clone()
    } else {
        overrides
            .interfaces
            .iter()
            .map(|name| {
                file.interfaces
                    .iter()
                    .find(|e| &e.name == name)
                    .cloned()
                    .unwrap_or_else(|| EndpointConfig::new(name.as_str()))
            })
            .collect()
    };

    if let Some(capacity) = file.cache.capacity {
        config = config.with_cache_capacity(capacity);
    }
    if let Some(port) = overrides.port.or(file.server.port) {
        config = config.with_port(port);
    }
    if let Some(bind) = overrides.bind.map(str::to_string).or(file.server.bind) {
        config = config.with_bind_address(bind);
    }

    match (file.server.cert_path, file.server.key_path) {
        (Some(cert), Some(key)) => config = config.with_tls(cert, key),
        (None, None) => {}
        _ => bail!("cert_path and key_path must be given together"),
    }

    Ok(config)
}
