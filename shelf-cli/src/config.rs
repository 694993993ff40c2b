use std::path::{Path, PathBuf};
use std::time::Duration;

use shelf_engine::SyncConfig;
use tracing::debug;

use crate::cli::Args;
use crate::error::Result;

pub const DEFAULT_CONFIG_FILE: &str = "shelf.toml";

/// Load the engine configuration from `path`, or from `./shelf.toml` when it exists.
pub fn load(path: Option<&Path>) -> Result<SyncConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !fallback.exists() {
                return Ok(SyncConfig::default());
            }
            fallback
        }
    };

    debug!(path = %path.display(), "Loading configuration");
    let content = std::fs::read_to_string(&path)?;
    Ok(toml::from_str(&content)?)
}

/// Apply command-line overrides on top of the file configuration.
pub fn apply_overrides(mut config: SyncConfig, args: &Args) -> Result<SyncConfig> {
    if let Some(api_base) = &args.api_base {
        config.api_base_url = api_base.clone();
    }
    if let Some(token) = &args.token {
        config.auth_token = Some(token.clone());
    }
    if let Some(secs) = args.timeout {
        config.request_timeout = Duration::from_secs(secs);
    }
    if let Some(proxy) = &args.proxy {
        config.outbound_proxy = Some(proxy.clone());
    }
    config.validate()?;
    Ok(config)
}

pub fn save(config: &SyncConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, show(config)?)?;
    Ok(())
}

pub fn show(config: &SyncConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
