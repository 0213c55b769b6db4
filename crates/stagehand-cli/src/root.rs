use stagehand_core::paths::STAGEHAND_DIR;
use std::path::{Path, PathBuf};

/// Resolve the campaign root directory.
///
/// Priority:
/// 1. `--root` flag / `STAGEHAND_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.stagehand/`
/// 3. Walk upward from `cwd` looking for `.git/`
/// 4. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_from(&cwd)
}

fn resolve_from(cwd: &Path) -> PathBuf {
    for marker in [STAGEHAND_DIR, ".git"] {
        if let Some(found) = cwd.ancestors().find(|dir| dir.join(marker).is_dir()) {
            return found.to_path_buf();
        }
    }
    cwd.to_path_buf()
}
