use crate::output::print_json;
use anyhow::Context;
use stagehand_core::config::Config;
use stagehand_core::{io, paths};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let dir = paths::stagehand_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let config_data =
        serde_yaml::to_string(&Config::default()).context("failed to render default config")?;
    let created = io::write_if_missing(&paths::config_path(root), config_data.as_bytes())
        .context("failed to write config.yaml")?;

    if json {
        return print_json(&serde_json::json!({
            "root": root,
            "config": paths::CONFIG_FILE,
            "created": created,
        }));
    }

    println!("Initializing stagehand in: {}", root.display());
    if created {
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }
    Ok(())
}
