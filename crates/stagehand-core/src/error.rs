use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StagehandError {
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("invalid stage status '{0}': expected pending, passed or failed")]
    InvalidStatus(String),

    #[error("invalid failure reason: {0}")]
    InvalidReason(String),

    #[error("invalid provider id '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidProvider(String),

    #[error("no priority list configured for provider: {0}")]
    UnknownProvider(String),

    #[error("timed out acquiring lock {} after {attempts} attempts", path.display())]
    LockTimeout { path: PathBuf, attempts: u32 },

    #[error("corrupt state file {}: {source}", path.display())]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("state directory not found: set STAGEHAND_STATE_DIR or HOME")]
    StateDirNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StagehandError>;
