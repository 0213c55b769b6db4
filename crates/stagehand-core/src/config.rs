use crate::error::{Result, StagehandError};
use crate::paths;
use crate::store::{LockOptions, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, DEFAULT_STALE_AFTER};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ProviderConfig
// ---------------------------------------------------------------------------

/// Candidate models for one provider, most preferred first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub models: Vec<String>,
    /// Cooldown applied when a quota or rate-limit failure carries no usable
    /// reset hint.
    #[serde(default = "default_cooldown_ms")]
    pub default_cooldown_ms: u64,
}

fn default_cooldown_ms() -> u64 {
    15 * 60 * 1000
}

impl ProviderConfig {
    fn with_models(models: &[&str]) -> Self {
        Self {
            models: models.iter().map(|m| m.to_string()).collect(),
            default_cooldown_ms: default_cooldown_ms(),
        }
    }
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut m = BTreeMap::new();
    m.insert(
        "claude".to_string(),
        ProviderConfig::with_models(&["opus", "sonnet", "haiku"]),
    );
    m.insert(
        "codex".to_string(),
        ProviderConfig::with_models(&["gpt-5-codex", "gpt-5", "gpt-5-mini"]),
    );
    m.insert(
        "gemini".to_string(),
        ProviderConfig::with_models(&["gemini-2.5-pro", "gemini-2.5-flash"]),
    );
    m
}

// ---------------------------------------------------------------------------
// LockConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_stale_after_secs() -> u64 {
    DEFAULT_STALE_AFTER.as_secs()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl LockConfig {
    pub fn options(&self) -> LockOptions {
        LockOptions {
            stale_after: Duration::from_secs(self.stale_after_secs),
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Replaces the built-in provider table as a whole when present.
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub lock: LockConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            providers: default_providers(),
            lock: LockConfig::default(),
        }
    }
}

impl Config {
    /// Load `<root>/.stagehand/config.yaml`, or the built-in defaults when the
    /// campaign has no config file.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn provider(&self, provider: &str) -> Result<&ProviderConfig> {
        self.providers
            .get(provider)
            .ok_or_else(|| StagehandError::UnknownProvider(provider.to_string()))
    }

    /// The provider's priority list, most preferred first.
    pub fn priority_list(&self, provider: &str) -> Result<&[String]> {
        Ok(self.provider(provider)?.models.as_slice())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.providers.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "no providers configured".to_string(),
            });
        }

        for (name, provider) in &self.providers {
            if paths::validate_provider(name).is_err() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "provider id '{name}' must be lowercase alphanumeric with hyphens"
                    ),
                });
            }

            if provider.models.is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("provider '{name}' has an empty model list"),
                });
            }

            let mut seen = HashSet::new();
            for model in &provider.models {
                if model.trim().is_empty() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Error,
                        message: format!("provider '{name}' lists an empty model id"),
                    });
                } else if !seen.insert(model.as_str()) {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!("provider '{name}' lists model '{model}' more than once"),
                    });
                }
            }

            if provider.default_cooldown_ms == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "provider '{name}' has default_cooldown_ms=0; hintless rate limits \
                         will not block retries"
                    ),
                });
            }
        }

        if self.lock.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "lock.max_attempts must be at least 1".to_string(),
            });
        }
        if self.lock.stale_after_secs < 5 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "lock.stale_after_secs={} is short; live holders may be taken over",
                    self.lock.stale_after_secs
                ),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, cfg);
        assert_eq!(parsed.version, 1);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.priority_list("claude").unwrap()[0], "opus");
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "providers:\n  claude:\n    models: [sonnet, haiku]\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let claude = cfg.provider("claude").unwrap();
        assert_eq!(claude.models, vec!["sonnet", "haiku"]);
        assert_eq!(claude.default_cooldown_ms, 900_000);
        assert_eq!(cfg.lock, LockConfig::default());
        // A provider table replaces the built-in one.
        assert!(matches!(
            cfg.provider("codex"),
            Err(StagehandError::UnknownProvider(_))
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.lock.max_attempts = 42;
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.lock.max_attempts, 42);
        assert_eq!(loaded.lock.options().max_attempts, 42);
    }

    #[test]
    fn lock_options_conversion() {
        let opts = LockConfig::default().options();
        assert_eq!(opts, LockOptions::default());
    }

    #[test]
    fn validate_flags_problems() {
        let yaml = r#"
providers:
  claude:
    models: [opus, opus, ""]
    default_cooldown_ms: 0
  Bad_Id:
    models: []
lock:
  max_attempts: 0
  stale_after_secs: 1
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let warnings = cfg.validate();
        let errors: Vec<_> = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message.as_str())
            .collect();
        assert!(errors.iter().any(|m| m.contains("Bad_Id")));
        assert!(errors.iter().any(|m| m.contains("empty model list")));
        assert!(errors.iter().any(|m| m.contains("empty model id")));
        assert!(errors.iter().any(|m| m.contains("max_attempts")));
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("more than once")));
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("default_cooldown_ms=0")));
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("stale_after_secs=1")));
    }
}
