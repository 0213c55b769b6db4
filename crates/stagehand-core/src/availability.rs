//! Which `(provider, model)` pairs are temporarily unusable.
//!
//! Each provider has its own JSON file under `<state_dir>/availability/`, so
//! providers never contend on the same lock. Expiry is evaluated at read time;
//! [`AvailabilityCache::clear_expired_model_availability`] only garbage
//! collects.

use crate::error::Result;
use crate::paths;
use crate::store::{LockOptions, LockedFile};
use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

/// Upper bound on a single unavailability window.
pub const MAX_WINDOW_MS: u64 = 30 * 24 * 3_600_000;

// ---------------------------------------------------------------------------
// Reset hint parsing
// ---------------------------------------------------------------------------

static HINT_RE: OnceLock<Regex> = OnceLock::new();

fn hint_re() -> &'static Regex {
    // Longer spellings first: alternation is leftmost-first.
    HINT_RE.get_or_init(|| {
        Regex::new(
            r"(?i)(\d+(?:\.\d+)?)\s*(hours?|hrs?|h|minutes?|mins?|milliseconds?|msecs?|ms|m|seconds?|secs?|s)",
        )
        .unwrap()
    })
}

fn unit_ms(unit: &str) -> f64 {
    match unit.to_ascii_lowercase().as_str() {
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
        _ => 1.0,
    }
}

/// Parse a provider cooldown phrase such as `"1h 2m 3s"`, `"2s"` or
/// `"try again in 4m12.345s"` into milliseconds.
///
/// Every number immediately followed by an hour, minute, second or millisecond
/// marker contributes to the sum. Returns `None` when the text holds no such
/// pair, so the caller can fall back to a default.
pub fn parse_reset_hint_ms(hint: &str) -> Option<u64> {
    let mut total = 0.0_f64;
    let mut matched = false;

    for caps in hint_re().captures_iter(hint) {
        let unit = &caps[2];
        let unit_end = caps.get(2).map(|m| m.end()).unwrap_or(hint.len());
        // "2 monkeys" is not two minutes.
        if hint[unit_end..]
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic())
        {
            continue;
        }
        let Ok(qty) = caps[1].parse::<f64>() else {
            continue;
        };
        total += qty * unit_ms(unit);
        matched = true;
    }

    // `as` saturates, so absurd quantities clamp to u64::MAX.
    matched.then(|| total.round() as u64)
}

/// Whole milliseconds in `d`, rounded up so a caller sleeping this long
/// never wakes before the window closes.
fn ceil_ms(d: TimeDelta) -> u64 {
    let ms = d.num_milliseconds();
    let ms = if d > TimeDelta::milliseconds(ms) { ms + 1 } else { ms };
    ms.max(0) as u64
}

// ---------------------------------------------------------------------------
// Persisted types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailabilityEntry {
    pub provider: String,
    pub model: String,
    pub until: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ModelWindow {
    until: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProviderAvailability {
    #[serde(default)]
    models: BTreeMap<String, ModelWindow>,
}

impl ProviderAvailability {
    fn active(&self, now: DateTime<Utc>) -> impl Iterator<Item = (&String, &ModelWindow)> {
        self.models.iter().filter(move |(_, w)| w.until > now)
    }
}

// ---------------------------------------------------------------------------
// AvailabilityCache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AvailabilityCache {
    state_dir: PathBuf,
    options: LockOptions,
}

impl AvailabilityCache {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            options: LockOptions::default(),
        }
    }

    /// Cache rooted at the resolved persistent state directory.
    pub fn open(explicit_state_dir: Option<&Path>) -> Result<Self> {
        Ok(Self::new(paths::state_dir(explicit_state_dir)?))
    }

    pub fn with_options(mut self, options: LockOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn store(&self, provider: &str) -> Result<LockedFile> {
        paths::validate_provider(provider)?;
        Ok(
            LockedFile::new(paths::availability_path(&self.state_dir, provider))
                .with_options(self.options),
        )
    }

    fn load(&self, provider: &str) -> Result<ProviderAvailability> {
        self.store(provider)?.read()
    }

    /// Record that `model` may not be used until `now` plus the hinted
    /// cooldown (or `default_ms` when the hint is missing or unparseable).
    /// Replaces any earlier window for the same model.
    pub fn mark_model_unavailable(
        &self,
        provider: &str,
        model: &str,
        hint: Option<&str>,
        default_ms: u64,
        now: DateTime<Utc>,
    ) -> Result<UnavailabilityEntry> {
        let duration_ms = hint
            .and_then(parse_reset_hint_ms)
            .unwrap_or(default_ms)
            .min(MAX_WINDOW_MS);
        let until = now + TimeDelta::milliseconds(duration_ms as i64);

        self.store(provider)?
            .update(|state: &mut ProviderAvailability| {
                state
                    .models
                    .insert(model.to_string(), ModelWindow { until });
                Ok(())
            })?;

        info!(provider, model, duration_ms, until = %until, "model marked unavailable");
        Ok(UnavailabilityEntry {
            provider: provider.to_string(),
            model: model.to_string(),
            until,
        })
    }

    pub fn is_model_unavailable(
        &self,
        provider: &str,
        model: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .load(provider)?
            .models
            .get(model)
            .is_some_and(|w| w.until > now))
    }

    /// Active windows for `provider`, ordered by model id.
    pub fn unavailable_entries(
        &self,
        provider: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<UnavailabilityEntry>> {
        Ok(self
            .load(provider)?
            .active(now)
            .map(|(model, w)| UnavailabilityEntry {
                provider: provider.to_string(),
                model: model.clone(),
                until: w.until,
            })
            .collect())
    }

    pub fn list_unavailable_models(
        &self,
        provider: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        Ok(self
            .load(provider)?
            .active(now)
            .map(|(model, _)| model.clone())
            .collect())
    }

    /// Milliseconds until the soonest active window for `provider` closes, or
    /// `None` when nothing is pending.
    pub fn next_availability_ms(&self, provider: &str, now: DateTime<Utc>) -> Result<Option<u64>> {
        Ok(self
            .load(provider)?
            .active(now)
            .map(|(_, w)| ceil_ms(w.until - now))
            .min())
    }

    /// Drop every window with `until <= now` from every provider file.
    /// Returns the number of entries removed.
    pub fn clear_expired_model_availability(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for provider in self.providers()? {
            removed += self
                .store(&provider)?
                .update(|state: &mut ProviderAvailability| {
                    let before = state.models.len();
                    state.models.retain(|_, w| w.until > now);
                    Ok(before - state.models.len())
                })?;
        }
        if removed > 0 {
            info!(removed, "expired availability entries cleared");
        }
        Ok(removed)
    }

    /// Operator override: forget the window for one model, expired or not.
    /// Returns whether an entry existed.
    pub fn clear_model(&self, provider: &str, model: &str) -> Result<bool> {
        self.store(provider)?
            .update(|state: &mut ProviderAvailability| Ok(state.models.remove(model).is_some()))
    }

    /// Providers that have a cache file, sorted.
    pub fn providers(&self) -> Result<Vec<String>> {
        let dir = paths::availability_dir(&self.state_dir);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut providers: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
            .filter(|stem| paths::validate_provider(stem).is_ok())
            .collect();
        providers.sort();
        Ok(providers)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
