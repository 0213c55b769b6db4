use crate::error::{Result, StagehandError};
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const STAGEHAND_DIR: &str = ".stagehand";
pub const CONFIG_FILE: &str = ".stagehand/config.yaml";
pub const STAGES_FILE: &str = ".stagehand/stages.json";

pub const LOCK_SUFFIX: &str = ".lock";
pub const GUARD_SUFFIX: &str = ".guard";

/// Subdirectory of the persistent state dir holding one file per provider.
pub const AVAILABILITY_DIR: &str = "availability";

pub const STATE_DIR_ENV: &str = "STAGEHAND_STATE_DIR";
const APP_DIR_NAME: &str = "stagehand";

// ---------------------------------------------------------------------------
// Campaign paths
// ---------------------------------------------------------------------------

pub fn stagehand_dir(root: &Path) -> PathBuf {
    root.join(STAGEHAND_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn stages_path(root: &Path) -> PathBuf {
    root.join(STAGES_FILE)
}

/// `stages.json` → `stages.json.lock`
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// `stages.json.lock` → `stages.json.lock.guard`. Never deleted; it only
/// carries an OS-level lock.
pub fn guard_path(lock_path: &Path) -> PathBuf {
    let mut name = lock_path.as_os_str().to_owned();
    name.push(GUARD_SUFFIX);
    PathBuf::from(name)
}

// ---------------------------------------------------------------------------
// Persistent state directory
// ---------------------------------------------------------------------------

/// Resolve the per-user persistent state directory.
///
/// Priority:
/// 1. `explicit` (the `--state-dir` flag)
/// 2. `STAGEHAND_STATE_DIR`
/// 3. `$XDG_STATE_HOME/stagehand`
/// 4. `%LOCALAPPDATA%\stagehand` (Windows)
/// 5. `~/.local/state/stagehand`
pub fn state_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    resolve_state_dir(explicit, |key| std::env::var_os(key), home::home_dir())
}

fn resolve_state_dir(
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<OsString>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    let non_empty = |key: &str| env(key).filter(|v| !v.is_empty()).map(PathBuf::from);

    if let Some(p) = non_empty(STATE_DIR_ENV) {
        return Ok(p);
    }
    if let Some(p) = non_empty("XDG_STATE_HOME") {
        return Ok(p.join(APP_DIR_NAME));
    }
    if cfg!(windows) {
        if let Some(p) = non_empty("LOCALAPPDATA") {
            return Ok(p.join(APP_DIR_NAME));
        }
    }
    home.map(|h| h.join(".local").join("state").join(APP_DIR_NAME))
        .ok_or(StagehandError::StateDirNotFound)
}

pub fn availability_dir(state_dir: &Path) -> PathBuf {
    state_dir.join(AVAILABILITY_DIR)
}

pub fn availability_path(state_dir: &Path, provider: &str) -> PathBuf {
    availability_dir(state_dir).join(format!("{provider}.json"))
}

// ---------------------------------------------------------------------------
// Provider id validation
// ---------------------------------------------------------------------------

static PROVIDER_RE: OnceLock<Regex> = OnceLock::new();

fn provider_re() -> &'static Regex {
    PROVIDER_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

/// Provider ids become file names, so they are restricted to slugs.
pub fn validate_provider(provider: &str) -> Result<()> {
    if provider.is_empty() || provider.len() > 64 || !provider_re().is_match(provider) {
        return Err(StagehandError::InvalidProvider(provider.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
