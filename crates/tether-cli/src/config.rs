//! Configuration file parsing for tether.toml.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tether_runtime::{ContextConfig, PoolConfig};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Engine limits for every context
    #[serde(default)]
    pub context: ContextConfig,

    /// Pool settings for `tether run`
    #[serde(default)]
    pub pool: PoolSection,
}

/// `[pool]` table.
#[derive(Debug, Default, Deserialize)]
pub struct PoolSection {
    /// Number of contexts. Default: number of CPU cores
    pub size: Option<usize>,
}

impl Config {
    /// Pool configuration, with `size` from the command line taking precedence.
    pub fn pool_config(&self, size: Option<usize>) -> PoolConfig {
        let mut pool = PoolConfig {
            context: self.context.clone(),
            ..PoolConfig::default()
        };
        if let Some(size) = size.or(self.pool.size) {
            pool.size = size.max(1);
        }
        pool
    }
}

/// Load configuration from a file or search for default config files.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = path {
        // An explicit path must exist.
        return parse_file(path);
    }
    match find_config_file() {
        Some(path) => parse_file(&path),
        None => Ok(Config::default()),
    }
}

fn parse_file(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Search for tether.toml in the current directory and its parents.
fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_in_ancestors(&cwd)
}

fn find_in_ancestors(start: &Path) -> Option<PathBuf> {
    const CONFIG_NAMES: &[&str] = &["tether.toml", ".tetherrc.toml"];

    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }
    None
}
