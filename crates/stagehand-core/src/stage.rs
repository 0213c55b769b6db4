use crate::error::Result;
use crate::paths;
use crate::store::{LockOptions, LockedFile};
use crate::types::{StageName, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// StageRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: StageName,
    pub status: StageStatus,
    #[serde(default)]
    pub detail: String,
    /// `None` for a stage that has never been marked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    pub fn pending(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Pending,
            detail: String::new(),
            updated_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// StageSnapshot
// ---------------------------------------------------------------------------

/// Outcome of every stage for one campaign. Only marked stages are stored;
/// everything else reads as `pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StageFile")]
pub struct StageSnapshot {
    pub version: u32,
    stages: BTreeMap<StageName, StageRecord>,
}

/// On-disk shape of [`StageSnapshot`], checked before it is accepted.
#[derive(Deserialize)]
struct StageFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    stages: BTreeMap<StageName, StageRecord>,
}

fn default_version() -> u32 {
    1
}

impl TryFrom<StageFile> for StageSnapshot {
    type Error = String;

    fn try_from(file: StageFile) -> std::result::Result<Self, Self::Error> {
        if let Some((key, record)) = file.stages.iter().find(|(k, r)| **k != r.name) {
            return Err(format!(
                "stage entry '{key}' holds a record for '{}'",
                record.name
            ));
        }
        Ok(Self {
            version: file.version,
            stages: file.stages,
        })
    }
}

impl Default for StageSnapshot {
    fn default() -> Self {
        Self {
            version: default_version(),
            stages: BTreeMap::new(),
        }
    }
}

impl StageSnapshot {
    pub fn status(&self, stage: StageName) -> StageStatus {
        self.stages
            .get(&stage)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn record(&self, stage: StageName) -> StageRecord {
        self.stages
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| StageRecord::pending(stage))
    }

    /// All stages in gate order, unmarked ones as `pending`.
    pub fn records(&self) -> Vec<StageRecord> {
        StageName::all().iter().map(|s| self.record(*s)).collect()
    }

    /// Insert or replace the record for `stage`. The latest call always wins,
    /// whatever the timestamps say.
    pub fn upsert(
        &mut self,
        stage: StageName,
        status: StageStatus,
        detail: &str,
        at: DateTime<Utc>,
    ) -> StageRecord {
        let record = StageRecord {
            name: stage,
            status,
            detail: detail.to_string(),
            updated_at: Some(at),
        };
        self.stages.insert(stage, record.clone());
        record
    }

    /// First stage not yet passed; `None` once the whole pipeline has passed.
    pub fn next_stage(&self) -> Option<StageName> {
        StageName::all()
            .iter()
            .copied()
            .find(|s| self.status(*s) != StageStatus::Passed)
    }

    pub fn is_complete(&self) -> bool {
        self.next_stage().is_none()
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

fn stage_store(root: &Path, options: LockOptions) -> LockedFile {
    LockedFile::new(paths::stages_path(root)).with_options(options)
}

/// Load the campaign's snapshot. A campaign with no state file yet is all
/// `pending`.
pub fn load_stage_snapshot(root: &Path) -> Result<StageSnapshot> {
    stage_store(root, LockOptions::default()).read()
}

pub fn mark_stage(
    root: &Path,
    stage: StageName,
    status: StageStatus,
    detail: &str,
) -> Result<StageRecord> {
    mark_stage_with_options(root, stage, status, detail, LockOptions::default())
}

/// Upsert one stage record under the campaign's lock.
pub fn mark_stage_with_options(
    root: &Path,
    stage: StageName,
    status: StageStatus,
    detail: &str,
    options: LockOptions,
) -> Result<StageRecord> {
    let record = stage_store(root, options).update(|snapshot: &mut StageSnapshot| {
        Ok(snapshot.upsert(stage, status, detail, Utc::now()))
    })?;
    tracing::debug!(stage = %stage, status = %status, "stage marked");
    Ok(record)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StagehandError;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_all_pending() {
        let dir = TempDir::new().unwrap();
        let snapshot = load_stage_snapshot(dir.path()).unwrap();
        assert_eq!(snapshot.records().len(), StageName::all().len());
        assert!(snapshot
            .records()
            .iter()
            .all(|r| r.status == StageStatus::Pending && r.updated_at.is_none()));
        assert_eq!(snapshot.next_stage(), Some(StageName::Discovery));
    }

    #[test]
    fn mark_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        mark_stage(
            dir.path(),
            StageName::Discovery,
            StageStatus::Passed,
            "scope agreed",
        )
        .unwrap();

        let snapshot = load_stage_snapshot(dir.path()).unwrap();
        let record = snapshot.record(StageName::Discovery);
        assert_eq!(record.status, StageStatus::Passed);
        assert_eq!(record.detail, "scope agreed");
        assert!(record.updated_at.is_some());
        assert_eq!(
            snapshot.status(StageName::FunctionalRequirements),
            StageStatus::Pending
        );
        assert!(paths::stages_path(dir.path()).exists());
    }

    #[test]
    fn later_mark_supersedes_earlier() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        mark_stage(root, StageName::Implementation, StageStatus::Failed, "tests red").unwrap();
        mark_stage(root, StageName::Implementation, StageStatus::Passed, "tests green").unwrap();

        let snapshot = load_stage_snapshot(root).unwrap();
        let record = snapshot.record(StageName::Implementation);
        assert_eq!(record.status, StageStatus::Passed);
        assert_eq!(record.detail, "tests green");
    }

    #[test]
    fn repeated_mark_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for _ in 0..3 {
            mark_stage(root, StageName::Discovery, StageStatus::Passed, "ok").unwrap();
        }
        let snapshot = load_stage_snapshot(root).unwrap();
        assert_eq!(snapshot.status(StageName::Discovery), StageStatus::Passed);
        assert_eq!(snapshot.record(StageName::Discovery).detail, "ok");
        assert_eq!(snapshot.stages.len(), 1);
    }

    #[test]
    fn upsert_ignores_timestamp_order() {
        let mut snapshot = StageSnapshot::default();
        let later = Utc::now();
        let earlier = later - chrono::Duration::hours(1);
        snapshot.upsert(StageName::Discovery, StageStatus::Failed, "first", later);
        snapshot.upsert(StageName::Discovery, StageStatus::Passed, "second", earlier);
        assert_eq!(snapshot.status(StageName::Discovery), StageStatus::Passed);
    }

    #[test]
    fn next_stage_skips_passed_prefix() {
        let mut snapshot = StageSnapshot::default();
        let now = Utc::now();
        snapshot.upsert(StageName::Discovery, StageStatus::Passed, "", now);
        snapshot.upsert(StageName::FunctionalRequirements, StageStatus::Failed, "", now);
        assert_eq!(
            snapshot.next_stage(),
            Some(StageName::FunctionalRequirements)
        );

        for stage in StageName::all() {
            snapshot.upsert(*stage, StageStatus::Passed, "", now);
        }
        assert!(snapshot.is_complete());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = paths::stages_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[1, 2").unwrap();

        assert!(matches!(
            load_stage_snapshot(dir.path()),
            Err(StagehandError::CorruptState { .. })
        ));
        assert!(matches!(
            mark_stage(dir.path(), StageName::Discovery, StageStatus::Passed, ""),
            Err(StagehandError::CorruptState { .. })
        ));
    }

    #[test]
    fn mismatched_record_name_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = paths::stages_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let raw = r#"{"version":1,"stages":{"discovery":{"name":"implementation","status":"passed"}}}"#;
        std::fs::write(&path, raw).unwrap();

        match load_stage_snapshot(dir.path()) {
            Err(StagehandError::CorruptState { source, .. }) => {
                assert!(source.to_string().contains("discovery"));
            }
            other => panic!("expected CorruptState, got {other:?}"),
        }
        assert!(matches!(
            mark_stage(dir.path(), StageName::Discovery, StageStatus::Passed, ""),
            Err(StagehandError::CorruptState { .. })
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), raw);
    }

    #[test]
    fn persisted_format_uses_stage_names() {
        let dir = TempDir::new().unwrap();
        mark_stage(
            dir.path(),
            StageName::TechnicalBacklog,
            StageStatus::Failed,
            "missing estimates",
        )
        .unwrap();
        let raw = std::fs::read_to_string(paths::stages_path(dir.path())).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["stages"]["technical_backlog"]["status"], "failed");
        assert_eq!(
            value["stages"]["technical_backlog"]["detail"],
            "missing estimates"
        );
    }

    #[test]
    fn concurrent_marks_on_different_stages_all_survive() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let handles: Vec<_> = StageName::all()
            .iter()
            .copied()
            .map(|stage| {
                let root = root.clone();
                std::thread::spawn(move || {
                    mark_stage(&root, stage, StageStatus::Passed, stage.as_str()).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snapshot = load_stage_snapshot(&root).unwrap();
        assert!(snapshot.is_complete());
    }
}
