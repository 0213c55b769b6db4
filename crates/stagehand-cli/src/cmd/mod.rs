pub mod availability;
pub mod config;
pub mod init;
pub mod model;
pub mod stage;

use anyhow::Context;
use stagehand_core::config::Config;
use std::path::Path;

/// Load the campaign config for a command that acts on it. Problems found by
/// `Config::validate` are logged, not fatal; `config validate` reports them.
pub fn load_config(root: &Path) -> anyhow::Result<Config> {
    let config = Config::load(root).context("failed to load config")?;
    for w in config.validate() {
        tracing::warn!(level = ?w.level, "config: {}", w.message);
    }
    Ok(config)
}
